//! End-to-end walk-forward scenarios over synthetic price series.

use atlas_backtest::{BacktestEngine, BacktestError, BacktestReport, Period, PerformanceSummary, PriceSeries};
use atlas_common::AtlasConfig;
use chrono::{DateTime, TimeZone, Utc};

const CROSSOVER: &str = r#"import pandas as pd
import numpy as np

short_window = 20
long_window = 50

short_ma = price.rolling(window=short_window).mean()
long_ma = price.rolling(window=long_window).mean()

signals = pd.Series(0.0, index=price.index)
signals[short_ma > long_ma] = 1.0
signals[short_ma < long_ma] = -1.0
signals = signals.fillna(method='ffill').fillna(0.0)
"#;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap()
}

fn rising(n: usize) -> PriceSeries {
    let closes: Vec<f64> = (0..n).map(|i| 100.0 + i as f64 * 0.25).collect();
    PriceSeries::from_closes(start(), &closes).unwrap()
}

fn wavy(n: usize) -> PriceSeries {
    let closes: Vec<f64> = (0..n)
        .map(|i| {
            let t = i as f64;
            100.0 + t * 0.02 + (t / 15.0).sin() * 6.0 + (t / 4.0).cos()
        })
        .collect();
    PriceSeries::from_closes(start(), &closes).unwrap()
}

fn engine() -> BacktestEngine {
    BacktestEngine::new(&AtlasConfig::default()).unwrap()
}

// ============================================================================
// Period scenarios
// ============================================================================

#[test]
fn test_buy_and_hold_on_rising_prices() {
    let engine = engine();
    let prices = rising(800);
    let strategy = engine.approve("signals = 1.0\n").unwrap();
    let (first, last) = (prices.first_timestamp().unwrap(), prices.last_timestamp().unwrap());

    let metrics = engine.run_period(&strategy, &prices, first, last).unwrap();
    let closes = prices.closes();
    let expected = closes[closes.len() - 1] / closes[0] - 1.0;

    assert_eq!(metrics.observations, 800);
    assert_eq!(metrics.turnover, 0.0);
    assert_eq!(metrics.total_cost, 0.0);
    assert!(metrics.total_return > 0.0);
    assert!((metrics.total_return - expected).abs() < 1e-9);
    assert_eq!(metrics.max_drawdown, 0.0);
}

#[test]
fn test_run_period_is_idempotent() {
    let engine = engine();
    let prices = wavy(300);
    let strategy = engine.approve(CROSSOVER).unwrap();
    let (first, last) = (prices.first_timestamp().unwrap(), prices.last_timestamp().unwrap());

    let a = engine.run_period(&strategy, &prices, first, last).unwrap();
    let b = engine.run_period(&strategy, &prices, first, last).unwrap();
    assert_eq!(a.sharpe_ratio.to_bits(), b.sharpe_ratio.to_bits());
    assert_eq!(a.total_return.to_bits(), b.total_return.to_bits());
    assert_eq!(a, b);
    assert!(a.num_trades > 0);
}

#[test]
fn test_missing_signal_in_period() {
    let engine = engine();
    let prices = wavy(100);
    let strategy = engine.approve("ma = price.rolling(10).mean()\n").unwrap();
    let err = engine
        .run_period(
            &strategy,
            &prices,
            prices.first_timestamp().unwrap(),
            prices.last_timestamp().unwrap(),
        )
        .unwrap_err();
    assert!(err.is_missing_signal());
}

// ============================================================================
// Walk-forward scenarios
// ============================================================================

#[test]
fn test_short_history_is_insufficient_data() {
    let err = engine().run_walk_forward(CROSSOVER, &rising(30)).unwrap_err();
    assert!(matches!(err, BacktestError::InsufficientData(_)), "{err}");
}

#[test]
fn test_missing_signal_everywhere_is_no_valid_windows() {
    // ~4.4 years of weekdays fits several 36M/6M/1M windows
    let err = engine()
        .run_walk_forward("ma = price.rolling(10).mean()\n", &wavy(1150))
        .unwrap_err();
    match err {
        BacktestError::NoValidWindows { attempted } => assert!(attempted >= 1),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_default_walk_forward_produces_report() {
    let prices = wavy(1150);
    let result = engine().run_walk_forward(CROSSOVER, &prices).unwrap();

    assert!(!result.windows.is_empty());
    assert_eq!(result.test_results.len(), result.windows.len());
    for window in &result.windows {
        assert!(window.train_start < window.train_end);
        assert!(window.train_end < window.val_start);
        assert!(window.val_start < window.val_end);
        assert!(window.val_end < window.test_start);
        assert!(window.test_start < window.test_end);
    }
    for period in Period::ALL {
        assert!(result.aggregate.period(period).is_some());
    }

    let flat = result.aggregate.flat_metrics();
    assert!(flat.contains_key("test_avg_sharpe"));
    assert!(flat.contains_key("validation_unstable_windows"));

    let summary = PerformanceSummary::from_result(&result);
    assert_eq!(summary.num_test_windows, result.windows.len());
    let report = BacktestReport::generate(&result);
    assert!(report.text_report.contains("Walk-Forward Backtest Report"));

    let json = serde_json::to_string(&result).unwrap();
    assert!(json.contains("\"test_results\""));
}
