//! The research loop: sample a parent, generate, verify, backtest, analyze, store.
//!
//! Each iteration persists its outcome whatever happens, so failed
//! generations still count towards lineage and failure statistics. Metrics
//! and analysis are written only after the walk-forward report is final.

use std::sync::Arc;

use anyhow::Context;
use atlas_backtest::{
    BacktestEngine, BacktestError, BacktestReport, PerformanceSummary, PriceSeries,
    WalkForwardResult,
};
use atlas_common::logging::generate_run_id;
use atlas_common::PipelineConfig;
use serde::{Deserialize, Serialize};

use crate::collaborators::{
    AnalysisRequest, KnowledgeRetriever, KnowledgeSnippet, NoKnowledge, ReportAnalyst,
    StrategyGenerator,
};
use crate::prompt::{
    extract_next_action, parse_strategy_response, seed_strategy, PlanningPrompt, StrategyDraft,
    PLANNER_SYSTEM_PROMPT, PLANNING_QUERY,
};
use crate::store::{NewStrategy, StrategyRecord, StrategyStatus, StrategyStore};

/// Snippets requested for an analysis prompt.
const ANALYSIS_SNIPPETS: usize = 3;

/// How one iteration ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IterationOutcome {
    Completed {
        strategy_id: i64,
        summary: PerformanceSummary,
    },
    Rejected {
        strategy_id: i64,
        violations: Vec<String>,
    },
    BacktestFailed {
        strategy_id: i64,
        reason: String,
    },
}

impl IterationOutcome {
    pub fn strategy_id(&self) -> i64 {
        match self {
            Self::Completed { strategy_id, .. }
            | Self::Rejected { strategy_id, .. }
            | Self::BacktestFailed { strategy_id, .. } => *strategy_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Totals over a multi-iteration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage of successful iterations
    pub success_rate: f64,
}

impl PipelineSummary {
    fn new(total: usize, successful: usize) -> Self {
        Self {
            total,
            successful,
            failed: total - successful,
            success_rate: if total == 0 {
                0.0
            } else {
                successful as f64 / total as f64 * 100.0
            },
        }
    }
}

/// Wires the backtest core to its external collaborators.
pub struct Pipeline {
    engine: Arc<BacktestEngine>,
    prices: Arc<PriceSeries>,
    store: Arc<dyn StrategyStore>,
    generator: Arc<dyn StrategyGenerator>,
    analyst: Arc<dyn ReportAnalyst>,
    retriever: Arc<dyn KnowledgeRetriever>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        engine: Arc<BacktestEngine>,
        prices: Arc<PriceSeries>,
        store: Arc<dyn StrategyStore>,
        generator: Arc<dyn StrategyGenerator>,
        analyst: Arc<dyn ReportAnalyst>,
    ) -> Self {
        Self {
            engine,
            prices,
            store,
            generator,
            analyst,
            retriever: Arc::new(NoKnowledge),
            config: PipelineConfig::default(),
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn KnowledgeRetriever>) -> Self {
        self.retriever = retriever;
        self
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<dyn StrategyStore> {
        &self.store
    }

    /// Record the built-in seed strategy without running it.
    pub async fn seed(&self) -> anyhow::Result<i64> {
        let draft = seed_strategy();
        self.store
            .store(
                NewStrategy::new(draft.code)
                    .with_motivation(draft.motivation)
                    .with_status(StrategyStatus::Seed),
            )
            .await
    }

    /// Run `iterations` iterations. Errors are counted as failures, never propagated.
    pub async fn run(&self, iterations: usize) -> PipelineSummary {
        let mut successful = 0;
        for i in 0..iterations {
            tracing::info!(iteration = i + 1, total = iterations, "Starting iteration");
            match self.run_iteration().await {
                Ok(outcome) if outcome.is_success() => successful += 1,
                Ok(outcome) => {
                    tracing::info!(strategy_id = outcome.strategy_id(), "Iteration did not complete");
                }
                Err(e) => tracing::error!(error = %e, "Iteration failed"),
            }
        }
        let summary = PipelineSummary::new(iterations, successful);
        tracing::info!(
            total = summary.total,
            successful = summary.successful,
            success_rate = summary.success_rate,
            "Pipeline finished"
        );
        summary
    }

    /// Run the configured number of iterations.
    pub async fn run_configured(&self) -> PipelineSummary {
        self.run(self.config.max_iterations as usize).await
    }

    /// One pass through the loop.
    pub async fn run_iteration(&self) -> anyhow::Result<IterationOutcome> {
        let run_id = generate_run_id();

        let parent = select_parent(
            self.store
                .top_k(&self.config.parent_metric, self.config.parent_pool.max(1))
                .await?,
        );
        let parent_id = parent.as_ref().map(|p| p.id);
        let draft = match &parent {
            Some(parent) => self.plan(parent).await?,
            None => {
                tracing::info!(run_id = %run_id, "No completed parent, using seed strategy");
                seed_strategy()
            }
        };
        tracing::info!(
            run_id = %run_id,
            parent_id = ?parent_id,
            motivation = %atlas_common::util::truncate_with_ellipsis(&draft.motivation, 100),
            "Strategy drafted"
        );

        let strategy = match self.engine.approve(&draft.code) {
            Ok(strategy) => strategy,
            Err(BacktestError::VerificationFailure(verdict)) => {
                let violations = verdict.violations_text();
                tracing::warn!(run_id = %run_id, violations = violations.len(), "Verification failed");
                let strategy_id = self
                    .store
                    .store(
                        self.record(&draft, parent_id, StrategyStatus::Failed)
                            .with_analysis(violations.join("\n")),
                    )
                    .await?;
                return Ok(IterationOutcome::Rejected {
                    strategy_id,
                    violations,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let engine = Arc::clone(&self.engine);
        let prices = Arc::clone(&self.prices);
        let backtest =
            tokio::task::spawn_blocking(move || engine.run_walk_forward_verified(&strategy, &prices))
                .await
                .context("walk-forward task panicked")?;

        let result = match backtest {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(run_id = %run_id, kind = e.kind(), error = %e, "Backtest failed");
                let reason = e.to_string();
                let strategy_id = self
                    .store
                    .store(
                        self.record(&draft, parent_id, StrategyStatus::BacktestFailed)
                            .with_analysis(reason.clone()),
                    )
                    .await?;
                return Ok(IterationOutcome::BacktestFailed {
                    strategy_id,
                    reason,
                });
            }
        };

        let strategy_id = self
            .store
            .store(self.record(&draft, parent_id, StrategyStatus::Analyzing))
            .await?;
        let summary = PerformanceSummary::from_result(&result);
        let analysis = self.analyze(strategy_id, &draft, &result, &summary).await?;

        self.store
            .update_metrics(strategy_id, persisted_metrics(&summary, &result)?)
            .await?;
        self.store.update_analysis(strategy_id, &analysis).await?;
        self.store
            .update_status(strategy_id, StrategyStatus::Completed)
            .await?;

        tracing::info!(
            run_id = %run_id,
            strategy_id,
            test_sharpe = summary.test_sharpe,
            test_maxdd = summary.test_maxdd,
            test_windows = summary.num_test_windows,
            "Iteration completed"
        );
        Ok(IterationOutcome::Completed {
            strategy_id,
            summary,
        })
    }

    async fn plan(&self, parent: &StrategyRecord) -> anyhow::Result<StrategyDraft> {
        let prompt = PlanningPrompt {
            parent_code: parent.code.clone(),
            parent_motivation: parent.motivation.clone().unwrap_or_default(),
            analyzer_feedback: extract_next_action(parent.analysis.as_deref().unwrap_or_default()),
            snippets: self
                .snippets(PLANNING_QUERY, self.config.knowledge_snippets)
                .await,
        };
        let response = self
            .generator
            .complete(PLANNER_SYSTEM_PROMPT, &prompt.render())
            .await
            .with_context(|| format!("generator '{}' failed", self.generator.name()))?;
        Ok(parse_strategy_response(&response)?)
    }

    async fn analyze(
        &self,
        strategy_id: i64,
        draft: &StrategyDraft,
        result: &WalkForwardResult,
        summary: &PerformanceSummary,
    ) -> anyhow::Result<String> {
        let query = format!(
            "trading strategy analysis performance metrics risk management {}",
            draft.motivation
        );
        let request = AnalysisRequest {
            strategy_id,
            code: draft.code.clone(),
            motivation: draft.motivation.clone(),
            summary: summary.clone(),
            metrics: result.aggregate.flat_metrics(),
            report: BacktestReport::generate(result).text_report,
            snippets: self.snippets(&query, ANALYSIS_SNIPPETS).await,
        };
        self.analyst
            .analyze(&request)
            .await
            .context("report analysis failed")
    }

    /// Retrieval is advisory; a failing knowledge base yields no snippets.
    async fn snippets(&self, query: &str, n: usize) -> Vec<KnowledgeSnippet> {
        match self.retriever.retrieve(query, n).await {
            Ok(snippets) => snippets,
            Err(e) => {
                tracing::warn!(error = %e, "Knowledge retrieval failed");
                Vec::new()
            }
        }
    }

    fn record(&self, draft: &StrategyDraft, parent_id: Option<i64>, status: StrategyStatus) -> NewStrategy {
        NewStrategy::new(draft.code.clone())
            .with_motivation(draft.motivation.clone())
            .with_parent(parent_id)
            .with_status(status)
    }
}

/// Best-ranked candidate that carries analyzer feedback, else the best-ranked one.
fn select_parent(candidates: Vec<StrategyRecord>) -> Option<StrategyRecord> {
    let with_feedback = candidates
        .iter()
        .position(|c| c.analysis.as_deref().is_some_and(|a| !a.trim().is_empty()));
    let index = with_feedback.unwrap_or(0);
    candidates.into_iter().nth(index)
}

/// Summary fields plus the flat aggregate, as one JSON object.
fn persisted_metrics(
    summary: &PerformanceSummary,
    result: &WalkForwardResult,
) -> anyhow::Result<serde_json::Value> {
    let mut metrics = serde_json::to_value(summary)?;
    if let Some(object) = metrics.as_object_mut() {
        for (key, value) in result.aggregate.flat_metrics() {
            if let Some(number) = serde_json::Number::from_f64(value) {
                object.insert(key, serde_json::Value::Number(number));
            }
        }
    }
    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_rates() {
        let summary = PipelineSummary::new(4, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.success_rate, 75.0);
        assert_eq!(PipelineSummary::new(0, 0).success_rate, 0.0);
    }

    fn record(id: i64, analysis: Option<&str>) -> StrategyRecord {
        StrategyRecord {
            id,
            created_at: chrono::Utc::now(),
            parent_id: None,
            version: 1,
            code: "signals = close * 0".into(),
            motivation: None,
            metrics: None,
            analysis: analysis.map(String::from),
            status: StrategyStatus::Completed,
        }
    }

    #[test]
    fn test_select_parent_prefers_feedback() {
        let picked = select_parent(vec![record(1, None), record(2, Some("## Next Action"))]);
        assert_eq!(picked.map(|p| p.id), Some(2));

        let picked = select_parent(vec![record(1, Some("  ")), record(2, None)]);
        assert_eq!(picked.map(|p| p.id), Some(1));

        assert!(select_parent(Vec::new()).is_none());
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = IterationOutcome::Rejected {
            strategy_id: 9,
            violations: vec!["Banned import: os".into()],
        };
        assert_eq!(outcome.strategy_id(), 9);
        assert!(!outcome.is_success());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["outcome"], "rejected");
    }
}
