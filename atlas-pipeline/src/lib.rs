//! Atlas research pipeline.
//!
//! Wraps the walk-forward core in an iterative research loop:
//! - [`collaborators`]: text generation, knowledge retrieval and report analysis seams
//! - [`prompt`]: planning prompt rendering and response parsing
//! - [`store`]: SQLite strategy lineage store
//! - [`pipeline`]: the iteration driver

pub mod collaborators;
pub mod pipeline;
pub mod prompt;
pub mod store;

pub use collaborators::{
    AnalysisRequest, KnowledgeRetriever, KnowledgeSnippet, NoKnowledge, ReportAnalyst,
    StrategyGenerator,
};
pub use pipeline::{IterationOutcome, Pipeline, PipelineSummary};
pub use prompt::{parse_strategy_response, seed_strategy, PlanningPrompt, StrategyDraft};
pub use store::{NewStrategy, SqliteStrategyStore, StrategyRecord, StrategyStatus, StrategyStore};
