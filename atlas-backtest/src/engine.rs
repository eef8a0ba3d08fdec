//! Walk-forward backtest engine.
//!
//! Verifies a strategy once, then for every planned window runs the sandbox
//! and the cost model over the train, validation and test slices. A failing
//! window is recorded and skipped; only an empty plan or a run with no test
//! results fails the whole backtest.

use atlas_common::{AtlasConfig, BacktestConfig, MetricsConfig, Validate};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::aggregate::{AggregateReport, MetricsAggregator};
use crate::cost::CostModel;
use crate::data::{closes, PriceSeries};
use crate::error::{BacktestError, Result};
use crate::guard::{audit_signals, PolicyVerifier, VerificationVerdict, VerifiedStrategy};
use crate::metrics::PeriodMetrics;
use crate::planner::{Period, Window, WindowPlanner};
use crate::sandbox::SignalSandbox;

/// Metrics of one (window, period) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodResult {
    pub window_index: usize,
    pub period: Period,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: PeriodMetrics,
    /// Advisory signal findings; never fail the run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub advisories: Vec<String>,
}

/// A window skipped because one of its periods failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowFailure {
    pub window_index: usize,
    pub period: Period,
    pub kind: String,
    pub reason: String,
}

/// Everything a walk-forward run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub windows: Vec<Window>,
    pub train_results: Vec<PeriodResult>,
    pub validation_results: Vec<PeriodResult>,
    pub test_results: Vec<PeriodResult>,
    pub failures: Vec<WindowFailure>,
    pub aggregate: AggregateReport,
}

impl WalkForwardResult {
    pub fn results(&self, period: Period) -> &[PeriodResult] {
        match period {
            Period::Train => &self.train_results,
            Period::Validation => &self.validation_results,
            Period::Test => &self.test_results,
        }
    }

    /// Windows that produced all three periods.
    pub fn completed_windows(&self) -> usize {
        self.test_results.len()
    }
}

struct PeriodRun {
    metrics: PeriodMetrics,
    advisories: Vec<String>,
}

/// Verification, signal generation and simulation for strategy scripts.
pub struct BacktestEngine {
    verifier: PolicyVerifier,
    sandbox: SignalSandbox,
    planner: WindowPlanner,
    cost_model: CostModel,
    aggregator: MetricsAggregator,
    periods_per_year: f64,
    max_position_fraction: f64,
    parallel: bool,
}

impl BacktestEngine {
    /// Build an engine from the full configuration.
    pub fn new(config: &AtlasConfig) -> Result<Self> {
        Self::check(&config.backtest)?;
        Self::check(&config.metrics)?;
        Self::check(&config.sandbox)?;
        Self::check(&config.guard)?;

        Ok(Self {
            verifier: PolicyVerifier::new(&config.guard),
            sandbox: SignalSandbox::from(&config.sandbox),
            planner: WindowPlanner::from_config(&config.backtest)?,
            cost_model: CostModel::from(&config.backtest),
            aggregator: MetricsAggregator::from(&config.metrics),
            periods_per_year: config.metrics.periods_per_year,
            max_position_fraction: config.guard.max_position_fraction,
            parallel: config.backtest.parallel,
        })
    }

    fn check(section: &impl Validate) -> Result<()> {
        section
            .validate()
            .map_err(|e| BacktestError::InvalidConfig(e.to_string()))
    }

    /// Replace the window plan and cost model.
    pub fn with_backtest_config(mut self, config: &BacktestConfig) -> Result<Self> {
        Self::check(config)?;
        self.planner = WindowPlanner::from_config(config)?;
        self.cost_model = CostModel::from(config);
        self.parallel = config.parallel;
        Ok(self)
    }

    pub fn with_metrics_config(mut self, config: &MetricsConfig) -> Self {
        self.aggregator = MetricsAggregator::from(config);
        self.periods_per_year = config.periods_per_year;
        self
    }

    pub fn with_verifier(mut self, verifier: PolicyVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SignalSandbox) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn verifier(&self) -> &PolicyVerifier {
        &self.verifier
    }

    pub fn planner(&self) -> &WindowPlanner {
        &self.planner
    }

    pub fn cost_model(&self) -> &CostModel {
        &self.cost_model
    }

    pub fn verify(&self, code: &str) -> VerificationVerdict {
        self.verifier.verify(code)
    }

    pub fn approve(&self, code: &str) -> Result<VerifiedStrategy> {
        self.verifier.approve(code)
    }

    /// Simulate one date range `[start, end]` of `prices`.
    pub fn run_period(
        &self,
        strategy: &VerifiedStrategy,
        prices: &PriceSeries,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PeriodMetrics> {
        self.simulate(strategy, prices, start, end).map(|run| run.metrics)
    }

    fn simulate(
        &self,
        strategy: &VerifiedStrategy,
        prices: &PriceSeries,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PeriodRun> {
        let bars = prices.slice(start, end);
        if bars.len() < 2 {
            return Err(BacktestError::InsufficientData(format!(
                "{} observations between {} and {}",
                bars.len(),
                start.date_naive(),
                end.date_naive()
            )));
        }

        let signals = self.sandbox.run(strategy, bars)?;
        let audit = audit_signals(&signals, bars, self.max_position_fraction);
        for finding in &audit.findings {
            tracing::warn!(start = %start.date_naive(), finding = %finding, "Signal advisory");
        }

        let metrics = PeriodMetrics::compute(
            &signals.values,
            &closes(bars),
            &self.cost_model,
            self.periods_per_year,
        );
        Ok(PeriodRun {
            metrics,
            advisories: audit.findings,
        })
    }

    /// Verify `code` and run it over every planned window.
    pub fn run_walk_forward(&self, code: &str, prices: &PriceSeries) -> Result<WalkForwardResult> {
        let strategy = self.approve(code)?;
        self.run_walk_forward_verified(&strategy, prices)
    }

    pub fn run_walk_forward_verified(
        &self,
        strategy: &VerifiedStrategy,
        prices: &PriceSeries,
    ) -> Result<WalkForwardResult> {
        let windows: Vec<Window> = self.planner.plan(prices).collect();
        if windows.is_empty() {
            return Err(BacktestError::InsufficientData(format!(
                "{} bars cannot fit one walk-forward window",
                prices.len()
            )));
        }
        tracing::info!(
            windows = windows.len(),
            bars = prices.len(),
            parallel = self.parallel,
            "Starting walk-forward backtest"
        );

        let outcomes: Vec<std::result::Result<Vec<PeriodResult>, WindowFailure>> = if self.parallel {
            windows
                .par_iter()
                .map(|w| self.run_window(strategy, prices, w))
                .collect()
        } else {
            windows
                .iter()
                .map(|w| self.run_window(strategy, prices, w))
                .collect()
        };

        let mut by_period: BTreeMap<Period, Vec<PeriodResult>> =
            Period::ALL.iter().map(|p| (*p, Vec::new())).collect();
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(results) => {
                    for result in results {
                        by_period.entry(result.period).or_default().push(result);
                    }
                }
                Err(failure) => failures.push(failure),
            }
        }

        let completed = by_period.get(&Period::Test).map_or(0, Vec::len);
        if completed == 0 {
            tracing::warn!(attempted = windows.len(), "No window produced test results");
            return Err(BacktestError::NoValidWindows {
                attempted: windows.len(),
            });
        }

        let aggregate = self.aggregator.aggregate(&by_period);
        tracing::info!(
            completed,
            failed = failures.len(),
            test_sharpe = aggregate.test().map_or(0.0, |t| t.avg_sharpe),
            "Walk-forward backtest finished"
        );

        let mut take = |p: Period| by_period.remove(&p).unwrap_or_default();
        Ok(WalkForwardResult {
            train_results: take(Period::Train),
            validation_results: take(Period::Validation),
            test_results: take(Period::Test),
            windows,
            failures,
            aggregate,
        })
    }

    fn run_window(
        &self,
        strategy: &VerifiedStrategy,
        prices: &PriceSeries,
        window: &Window,
    ) -> std::result::Result<Vec<PeriodResult>, WindowFailure> {
        let mut results = Vec::with_capacity(Period::ALL.len());
        for period in Period::ALL {
            let (start, end) = window.period(period);
            match self.simulate(strategy, prices, start, end) {
                Ok(run) => results.push(PeriodResult {
                    window_index: window.index,
                    period,
                    start,
                    end,
                    metrics: run.metrics,
                    advisories: run.advisories,
                }),
                Err(e) => {
                    tracing::warn!(
                        window = window.index,
                        period = %period,
                        error = %e,
                        "Window skipped"
                    );
                    return Err(WindowFailure {
                        window_index: window.index,
                        period,
                        kind: e.kind().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_common::Span;
    use chrono::TimeZone;

    const HOLD: &str = "signals = 1.0\n";

    fn prices(n: usize) -> PriceSeries {
        let start = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        let closes: Vec<f64> = (0..n)
            .map(|i| 100.0 + i as f64 * 0.05 + (i as f64 * 0.3).sin() * 2.0)
            .collect();
        PriceSeries::from_closes(start, &closes).unwrap()
    }

    fn short_engine() -> BacktestEngine {
        let mut config = AtlasConfig::default();
        config.backtest.train_span = Span::months(3);
        config.backtest.validation_span = Span::months(1);
        config.backtest.test_span = Span::months(1);
        config.backtest.roll_span = Span::months(1);
        BacktestEngine::new(&config).unwrap()
    }

    #[test]
    fn test_run_period_requires_two_bars() {
        let engine = short_engine();
        let prices = prices(10);
        let strategy = engine.approve(HOLD).unwrap();
        let at = prices.first_timestamp().unwrap();
        let err = engine.run_period(&strategy, &prices, at, at).unwrap_err();
        assert!(matches!(err, BacktestError::InsufficientData(_)));
    }

    #[test]
    fn test_walk_forward_results_are_ordered() {
        let engine = short_engine();
        let result = engine.run_walk_forward(HOLD, &prices(300)).unwrap();
        assert!(result.windows.len() > 3);
        assert_eq!(result.completed_windows(), result.windows.len());
        assert!(result.failures.is_empty());
        for period in Period::ALL {
            let indices: Vec<usize> = result.results(period).iter().map(|r| r.window_index).collect();
            let expected: Vec<usize> = (0..result.windows.len()).collect();
            assert_eq!(indices, expected);
        }
        assert_eq!(result.aggregate.periods.len(), 3);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let code = "fast = price.rolling(5).mean()\nslow = price.rolling(20).mean()\nsignals = np.where(fast > slow, 1.0, -1.0)\n";
        let prices = prices(300);
        let parallel = short_engine().run_walk_forward(code, &prices).unwrap();
        let sequential = short_engine()
            .with_parallel(false)
            .run_walk_forward(code, &prices)
            .unwrap();
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_verification_failure_stops_before_execution() {
        let err = short_engine()
            .run_walk_forward("import requests\nsignals = 1.0\n", &prices(300))
            .unwrap_err();
        assert!(matches!(err, BacktestError::VerificationFailure(_)));
        assert!(err.aborts_backtest());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = AtlasConfig::default();
        config.backtest.spread_rate = 2.0;
        assert!(matches!(
            BacktestEngine::new(&config),
            Err(BacktestError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_failing_windows_are_skipped() {
        // Fails only when the slice is long, i.e. on the train period
        let code = "if len(price) > 40:\n    signals = price.undefined_method()\nelse:\n    signals = 1.0\n";
        let err = short_engine().run_walk_forward(code, &prices(300)).unwrap_err();
        assert!(matches!(err, BacktestError::NoValidWindows { .. }));
    }
}
