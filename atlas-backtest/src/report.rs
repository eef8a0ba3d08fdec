//! Walk-forward report rendering and persisted summaries.

use serde::{Deserialize, Serialize};

use crate::aggregate::PeriodAggregate;
use crate::engine::WalkForwardResult;
use crate::planner::Period;

/// Headline test-period numbers stored with a strategy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub test_sharpe: f64,
    pub test_return: f64,
    pub test_maxdd: f64,
    pub test_turnover: f64,
    pub test_beta: f64,
    /// Test windows minus unstable test windows
    pub stability_score: i64,
    pub num_test_windows: usize,
}

impl PerformanceSummary {
    pub fn from_result(result: &WalkForwardResult) -> Self {
        let num_test_windows = result.test_results.len();
        match result.aggregate.test() {
            Some(test) => Self {
                test_sharpe: test.avg_sharpe,
                test_return: test.avg_total_return,
                test_maxdd: test.avg_max_drawdown,
                test_turnover: test.avg_turnover,
                test_beta: test.avg_beta,
                stability_score: num_test_windows as i64 - test.unstable_windows as i64,
                num_test_windows,
            },
            None => Self {
                num_test_windows,
                ..Self::default()
            },
        }
    }

    /// Any test window fell below the instability threshold.
    pub fn is_unstable(&self) -> bool {
        self.stability_score < self.num_test_windows as i64
    }

    /// Share of stable test windows in percent.
    pub fn stability_pct(&self) -> f64 {
        self.stability_score as f64 / self.num_test_windows.max(1) as f64 * 100.0
    }
}

/// Plain-text summary of a walk-forward run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub title: String,
    /// First train start to last test end
    pub period: String,
    pub summary: PerformanceSummary,
    pub text_report: String,
}

const RULE: &str = "═══════════════════════════════════════════════════════════════\n";
const THIN_RULE: &str = "───────────────────────────────────────────────────────────────\n";

impl BacktestReport {
    pub fn generate(result: &WalkForwardResult) -> Self {
        let period = match (result.windows.first(), result.windows.last()) {
            (Some(first), Some(last)) => format!(
                "{} to {}",
                first.train_start.date_naive(),
                last.test_end.date_naive()
            ),
            _ => "n/a".to_string(),
        };
        let summary = PerformanceSummary::from_result(result);
        let text_report = Self::format_text_report(result, &period, &summary);

        Self {
            title: "Walk-Forward Backtest Report".to_string(),
            period,
            summary,
            text_report,
        }
    }

    fn format_text_report(
        result: &WalkForwardResult,
        period: &str,
        summary: &PerformanceSummary,
    ) -> String {
        let mut report = String::new();

        report.push_str(RULE);
        report.push_str("                 Walk-Forward Backtest Report\n");
        report.push_str(RULE);
        report.push('\n');
        report.push_str(&format!("Period:            {period}\n"));
        report.push_str(&format!(
            "Windows:           {} planned, {} completed, {} skipped\n\n",
            result.windows.len(),
            result.completed_windows(),
            result.failures.len()
        ));

        report.push_str(&format!(
            "{:<12}{:>10}{:>10}{:>10}{:>10}{:>10}{:>10}\n",
            "Period", "Sharpe", "Return", "MaxDD", "Turnover", "Beta", "Unstable"
        ));
        report.push_str(THIN_RULE);
        for p in Period::ALL {
            if let Some(agg) = result.aggregate.period(p) {
                report.push_str(&Self::format_row(p, agg));
            }
        }
        report.push('\n');

        report.push_str(&format!(
            "Stability:         {:.1}% ({} of {} test windows at Sharpe >= {})\n",
            summary.stability_pct(),
            summary.stability_score,
            summary.num_test_windows,
            result.aggregate.instability_threshold
        ));
        if let Some(test) = result.aggregate.test() {
            report.push_str(&format!(
                "Test Sharpe:       mean {:.3}, std {:.3}, min {:.3}\n",
                test.avg_sharpe, test.sharpe_std, test.min_sharpe
            ));
        }

        if !result.failures.is_empty() {
            report.push('\n');
            report.push_str("Skipped windows\n");
            report.push_str(THIN_RULE);
            for failure in &result.failures {
                report.push_str(&format!(
                    "  #{:<4} {:<11} {}\n",
                    failure.window_index, failure.period, failure.reason
                ));
            }
        }

        report.push('\n');
        report.push_str(RULE);
        report
    }

    fn format_row(period: Period, agg: &PeriodAggregate) -> String {
        format!(
            "{:<12}{:>10.3}{:>9.2}%{:>9.2}%{:>10.3}{:>10.3}{:>7}/{:<2}\n",
            period.as_str(),
            agg.avg_sharpe,
            agg.avg_total_return * 100.0,
            agg.avg_max_drawdown * 100.0,
            agg.avg_turnover,
            agg.avg_beta,
            agg.unstable_windows,
            agg.num_windows
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregateReport;
    use crate::engine::WindowFailure;

    fn aggregate(sharpe: f64, unstable: usize, windows: usize) -> PeriodAggregate {
        PeriodAggregate {
            num_windows: windows,
            avg_total_return: 0.012,
            avg_volatility: 0.15,
            avg_sharpe: sharpe,
            avg_max_drawdown: -0.05,
            avg_turnover: 0.1,
            avg_beta: 0.8,
            avg_num_trades: 3.0,
            avg_win_rate: 0.5,
            avg_profit_factor: 1.2,
            sharpe_std: 0.4,
            min_sharpe: -0.2,
            unstable_windows: unstable,
        }
    }

    fn result_with_test(test: Option<PeriodAggregate>) -> WalkForwardResult {
        let mut aggregate = AggregateReport {
            instability_threshold: 0.3,
            ..AggregateReport::default()
        };
        aggregate.periods.insert(Period::Train, aggregate_for_train());
        if let Some(test) = test {
            aggregate.periods.insert(Period::Test, test);
        }
        WalkForwardResult {
            windows: Vec::new(),
            train_results: Vec::new(),
            validation_results: Vec::new(),
            test_results: Vec::new(),
            failures: vec![WindowFailure {
                window_index: 2,
                period: Period::Validation,
                kind: "execution_error".to_string(),
                reason: "boom".to_string(),
            }],
            aggregate,
        }
    }

    fn aggregate_for_train() -> PeriodAggregate {
        aggregate(1.1, 0, 4)
    }

    #[test]
    fn test_summary_without_test_period() {
        let summary = PerformanceSummary::from_result(&result_with_test(None));
        assert_eq!(summary, PerformanceSummary::default());
        assert!(!summary.is_unstable());
    }

    #[test]
    fn test_report_renders_rows_and_failures() {
        let report = BacktestReport::generate(&result_with_test(Some(aggregate(0.45, 1, 4))));
        assert_eq!(report.period, "n/a");
        assert!(report.text_report.contains("train"));
        assert!(report.text_report.contains("test"));
        assert!(report.text_report.contains("boom"));
        assert!(report.text_report.contains("Test Sharpe:       mean 0.450"));
    }

    #[test]
    fn test_summary_serializes_flat_keys() {
        let summary = PerformanceSummary {
            test_sharpe: 0.8,
            stability_score: 3,
            num_test_windows: 4,
            ..PerformanceSummary::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["test_sharpe"], 0.8);
        assert_eq!(json["stability_score"], 3);
        assert!(summary.is_unstable());
        assert!((summary.stability_pct() - 75.0).abs() < 1e-12);
    }
}
