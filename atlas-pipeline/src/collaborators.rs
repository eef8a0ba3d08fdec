//! External collaborators of the research loop.
//!
//! Text generation, knowledge retrieval and report analysis live outside
//! this workspace. The pipeline only sees these traits; concrete clients are
//! injected by the binary or by tests.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use atlas_backtest::PerformanceSummary;

/// Produces free text for a prompt, e.g. an LLM chat endpoint.
#[async_trait]
pub trait StrategyGenerator: Send + Sync {
    /// Generator name for logs.
    fn name(&self) -> &str;

    /// Complete `prompt` under the `system` instructions.
    async fn complete(&self, system: &str, prompt: &str) -> anyhow::Result<String>;
}

/// One retrieved knowledge passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeSnippet {
    pub text: String,
    /// File or document the passage came from, optionally with a `#chunk` suffix
    pub source: String,
    /// Similarity to the query, higher is closer
    pub score: f64,
}

impl KnowledgeSnippet {
    pub fn new(text: impl Into<String>, source: impl Into<String>, score: f64) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            score,
        }
    }

    /// File name of the source without directories or chunk id.
    pub fn source_name(&self) -> &str {
        let path = self.source.split('#').next().unwrap_or_default();
        path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
    }
}

/// Nearest-neighbour lookup over a knowledge base.
#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Up to `n` snippets, most relevant first.
    async fn retrieve(&self, query: &str, n: usize) -> anyhow::Result<Vec<KnowledgeSnippet>>;
}

/// Retriever for running without a knowledge base.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoKnowledge;

#[async_trait]
impl KnowledgeRetriever for NoKnowledge {
    async fn retrieve(&self, _query: &str, _n: usize) -> anyhow::Result<Vec<KnowledgeSnippet>> {
        Ok(Vec::new())
    }
}

/// Everything an analyst needs to write up one backtest.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub strategy_id: i64,
    pub code: String,
    pub motivation: String,
    pub summary: PerformanceSummary,
    /// `{period}_{metric}` aggregate values
    pub metrics: std::collections::BTreeMap<String, f64>,
    /// Plain-text walk-forward report
    pub report: String,
    pub snippets: Vec<KnowledgeSnippet>,
}

impl AnalysisRequest {
    /// Any test window fell below the instability threshold.
    pub fn unstable(&self) -> bool {
        self.summary.is_unstable()
    }

    pub fn metric(&self, key: &str) -> f64 {
        self.metrics.get(key).copied().unwrap_or(0.0)
    }
}

/// Writes the markdown analysis of a finished backtest.
#[async_trait]
pub trait ReportAnalyst: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> anyhow::Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoGenerator;

    #[async_trait]
    impl StrategyGenerator for EchoGenerator {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, system: &str, prompt: &str) -> anyhow::Result<String> {
            Ok(format!("{system}|{prompt}"))
        }
    }

    #[tokio::test]
    async fn test_generator_trait_object() {
        let generator: Box<dyn StrategyGenerator> = Box::new(EchoGenerator);
        assert_eq!(generator.name(), "echo");
        assert_eq!(generator.complete("s", "p").await.unwrap(), "s|p");
    }

    #[test]
    fn test_no_knowledge_is_empty() {
        let snippets = tokio_test::block_on(NoKnowledge.retrieve("momentum", 3)).unwrap();
        assert!(snippets.is_empty());
    }

    #[test]
    fn test_source_name_strips_path_and_chunk() {
        let snippet = KnowledgeSnippet::new("t", "knowledge/risk/position_sizing.md#3", 0.9);
        assert_eq!(snippet.source_name(), "position_sizing.md");
        assert_eq!(KnowledgeSnippet::new("t", "notes.md", 0.1).source_name(), "notes.md");
    }

    #[test]
    fn test_analysis_request_metric_lookup() {
        let request = AnalysisRequest {
            strategy_id: 1,
            code: String::new(),
            motivation: String::new(),
            summary: PerformanceSummary {
                stability_score: 2,
                num_test_windows: 3,
                ..PerformanceSummary::default()
            },
            metrics: [("test_avg_sharpe".to_string(), 0.7)].into_iter().collect(),
            report: String::new(),
            snippets: Vec::new(),
        };
        assert_eq!(request.metric("test_avg_sharpe"), 0.7);
        assert_eq!(request.metric("train_avg_sharpe"), 0.0);
        assert!(request.unstable());
    }
}
