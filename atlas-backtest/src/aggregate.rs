//! Cross-window aggregation of period results.

use atlas_common::MetricsConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::PeriodResult;
use crate::metrics::{mean, population_std, unbounded};
use crate::planner::Period;

/// Means and Sharpe stability for one period across windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodAggregate {
    pub num_windows: usize,
    pub avg_total_return: f64,
    pub avg_volatility: f64,
    pub avg_sharpe: f64,
    pub avg_max_drawdown: f64,
    pub avg_turnover: f64,
    pub avg_beta: f64,
    pub avg_num_trades: f64,
    pub avg_win_rate: f64,
    #[serde(with = "unbounded")]
    pub avg_profit_factor: f64,
    /// Population standard deviation of the window Sharpe ratios
    pub sharpe_std: f64,
    pub min_sharpe: f64,
    /// Windows with Sharpe below the instability threshold
    pub unstable_windows: usize,
}

/// Aggregate over every period that produced at least one result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub periods: BTreeMap<Period, PeriodAggregate>,
    pub instability_threshold: f64,
}

impl AggregateReport {
    pub fn period(&self, period: Period) -> Option<&PeriodAggregate> {
        self.periods.get(&period)
    }

    pub fn test(&self) -> Option<&PeriodAggregate> {
        self.period(Period::Test)
    }

    /// Flattened `{period}_{metric}` view, the shape persisted with a strategy.
    pub fn flat_metrics(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for (period, agg) in &self.periods {
            let entries = [
                ("avg_sharpe", agg.avg_sharpe),
                ("avg_return", agg.avg_total_return),
                ("avg_maxdd", agg.avg_max_drawdown),
                ("avg_turnover", agg.avg_turnover),
                ("avg_beta", agg.avg_beta),
                ("sharpe_std", agg.sharpe_std),
                ("min_sharpe", agg.min_sharpe),
                ("unstable_windows", agg.unstable_windows as f64),
            ];
            for (name, value) in entries {
                out.insert(format!("{period}_{name}"), value);
            }
        }
        out
    }
}

/// Reduces per-window results into an [`AggregateReport`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsAggregator {
    instability_threshold: f64,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::from(&MetricsConfig::default())
    }
}

impl From<&MetricsConfig> for MetricsAggregator {
    fn from(config: &MetricsConfig) -> Self {
        Self::new(config.instability_threshold)
    }
}

impl MetricsAggregator {
    pub fn new(instability_threshold: f64) -> Self {
        Self {
            instability_threshold,
        }
    }

    pub fn instability_threshold(&self) -> f64 {
        self.instability_threshold
    }

    /// Aggregate results keyed by period. Empty periods are omitted.
    pub fn aggregate(&self, results: &BTreeMap<Period, Vec<PeriodResult>>) -> AggregateReport {
        let periods = results
            .iter()
            .filter_map(|(period, rows)| Some((*period, self.aggregate_period(rows)?)))
            .collect();
        AggregateReport {
            periods,
            instability_threshold: self.instability_threshold,
        }
    }

    pub fn aggregate_period(&self, results: &[PeriodResult]) -> Option<PeriodAggregate> {
        if results.is_empty() {
            return None;
        }
        let avg = |f: fn(&PeriodResult) -> f64| {
            mean(&results.iter().map(f).collect::<Vec<_>>())
        };
        let sharpes: Vec<f64> = results.iter().map(|r| r.metrics.sharpe_ratio).collect();

        Some(PeriodAggregate {
            num_windows: results.len(),
            avg_total_return: avg(|r| r.metrics.total_return),
            avg_volatility: avg(|r| r.metrics.volatility),
            avg_sharpe: mean(&sharpes),
            avg_max_drawdown: avg(|r| r.metrics.max_drawdown),
            avg_turnover: avg(|r| r.metrics.turnover),
            avg_beta: avg(|r| r.metrics.beta),
            avg_num_trades: avg(|r| r.metrics.num_trades as f64),
            avg_win_rate: avg(|r| r.metrics.win_rate),
            avg_profit_factor: avg(|r| r.metrics.profit_factor),
            sharpe_std: population_std(&sharpes),
            min_sharpe: sharpes.iter().copied().fold(f64::INFINITY, f64::min),
            unstable_windows: sharpes
                .iter()
                .filter(|s| **s < self.instability_threshold)
                .count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PeriodMetrics;
    use chrono::{TimeZone, Utc};

    fn result(window_index: usize, period: Period, sharpe: f64, total_return: f64) -> PeriodResult {
        let at = Utc.with_ymd_and_hms(2022, 1, 3, 0, 0, 0).unwrap();
        PeriodResult {
            window_index,
            period,
            start: at,
            end: at,
            metrics: PeriodMetrics {
                total_return,
                volatility: 0.2,
                sharpe_ratio: sharpe,
                max_drawdown: -0.1,
                turnover: 0.05,
                beta: 0.5,
                num_trades: 2,
                win_rate: 0.5,
                profit_factor: 1.5,
                observations: 21,
                total_cost: 0.0,
            },
            advisories: Vec::new(),
        }
    }

    #[test]
    fn test_aggregate_test_period() {
        let mut results = BTreeMap::new();
        results.insert(
            Period::Test,
            vec![
                result(0, Period::Test, 1.0, 0.02),
                result(1, Period::Test, 0.2, -0.01),
                result(2, Period::Test, 0.6, 0.05),
            ],
        );
        results.insert(Period::Validation, Vec::new());

        let report = MetricsAggregator::default().aggregate(&results);
        assert!(report.period(Period::Validation).is_none());
        let test = report.test().unwrap();
        assert_eq!(test.num_windows, 3);
        assert!((test.avg_sharpe - 0.6).abs() < 1e-12);
        assert!((test.avg_total_return - 0.02).abs() < 1e-12);
        assert_eq!(test.min_sharpe, 0.2);
        assert_eq!(test.unstable_windows, 1);
        let expected_std = ((0.16 + 0.16 + 0.0) / 3.0f64).sqrt();
        assert!((test.sharpe_std - expected_std).abs() < 1e-12);
    }

    #[test]
    fn test_flat_metric_keys() {
        let mut results = BTreeMap::new();
        results.insert(Period::Train, vec![result(0, Period::Train, 0.1, 0.0)]);
        let flat = MetricsAggregator::new(0.3).aggregate(&results).flat_metrics();
        assert_eq!(flat.len(), 8);
        assert_eq!(flat["train_unstable_windows"], 1.0);
        assert_eq!(flat["train_avg_maxdd"], -0.1);
        assert!(!flat.contains_key("test_avg_sharpe"));
    }

    #[test]
    fn test_empty_input_gives_empty_report() {
        let report = MetricsAggregator::default().aggregate(&BTreeMap::new());
        assert!(report.periods.is_empty());
        assert!(report.flat_metrics().is_empty());
    }
}
