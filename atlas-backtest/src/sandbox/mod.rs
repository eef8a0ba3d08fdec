//! Restricted execution of verified strategy scripts.
//!
//! The namespace is the security boundary: a script sees the bound price
//! data, the `pd`/`np`/`math` library surface and a handful of safe built-ins.
//! Nothing in it can reach the filesystem, network, processes or the clock,
//! whatever the verifier concluded.
//!
//! A run is a pure function of the program and the price slice. Runaway
//! scripts are stopped by the [`SandboxLimits`] budget.

mod interp;
mod kernels;
mod library;
mod limits;
mod ops;
mod value;

pub use limits::SandboxLimits;

use atlas_common::SandboxConfig;
use std::time::Duration;
use thiserror::Error;

use crate::data::PriceBar;
use crate::guard::VerifiedStrategy;

use interp::Interpreter;
use value::Value;

/// Name every script must bind.
pub const SIGNAL_BINDING: &str = "signals";

/// Failure while producing signals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("Strategy must define 'signals' variable")]
    MissingSignal,

    #[error("Execution timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Step limit of {0} evaluation steps exceeded")]
    StepLimit(u64),

    #[error("Memory limit of {0} series cells exceeded")]
    MemoryLimit(u64),

    #[error("Loop exceeded {0} iterations")]
    LoopLimit(u64),

    #[error("{message} (line {line})")]
    Runtime { line: usize, message: String },
}

impl ExecutionError {
    pub(crate) fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            line: 0,
            message: message.into(),
        }
    }

    /// Attach a line number to a runtime error that has none yet.
    pub(crate) fn at_line(self, line: usize) -> Self {
        match self {
            Self::Runtime { line: 0, message } => Self::Runtime { line, message },
            other => other,
        }
    }

    /// True for budget exhaustion rather than a script fault.
    pub fn is_resource_limit(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::StepLimit(_) | Self::MemoryLimit(_) | Self::LoopLimit(_)
        )
    }
}

/// Positions aligned to the input bars, clamped to `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalSeries {
    pub values: Vec<f64>,
    /// Extremes before clamping, after gap filling
    pub raw_min: f64,
    pub raw_max: f64,
}

impl SignalSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Align `raw` to `len` bars: truncate, forward-fill past the end, zero
    /// missing values, then clamp.
    fn align(mut raw: Vec<f64>, len: usize) -> Self {
        match raw.last().copied() {
            Some(last) if raw.len() < len => raw.resize(len, last),
            _ => raw.resize(len, 0.0),
        }
        for v in raw.iter_mut() {
            if v.is_nan() {
                *v = 0.0;
            }
        }
        let raw_min = raw.iter().copied().fold(f64::INFINITY, f64::min);
        let raw_max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let values = raw.into_iter().map(|v| v.clamp(-1.0, 1.0)).collect();
        Self {
            values,
            raw_min: if len == 0 { 0.0 } else { raw_min },
            raw_max: if len == 0 { 0.0 } else { raw_max },
        }
    }
}

fn raw_signals(value: Value, len: usize) -> Result<Vec<f64>, ExecutionError> {
    if let Some(x) = value.as_number() {
        return Ok(vec![x; len]);
    }
    if let Some(values) = value.as_series() {
        return Ok(values.as_ref().clone());
    }
    match &value {
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .map(|item| match item {
                Value::None => Ok(f64::NAN),
                other => other.expect_number("signal value"),
            })
            .collect(),
        other => Err(ExecutionError::runtime(format!(
            "'{SIGNAL_BINDING}' must be numeric or a series, got {}",
            other.type_name()
        ))),
    }
}

/// Executes [`VerifiedStrategy`] programs against price bars.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalSandbox {
    limits: SandboxLimits,
}

impl From<&SandboxConfig> for SignalSandbox {
    fn from(config: &SandboxConfig) -> Self {
        Self::new(SandboxLimits::from(config))
    }
}

impl SignalSandbox {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> SandboxLimits {
        self.limits
    }

    /// Run `strategy` over `bars` and return one signal per bar.
    pub fn run(
        &self,
        strategy: &VerifiedStrategy,
        bars: &[PriceBar],
    ) -> Result<SignalSeries, ExecutionError> {
        let mut interpreter = Interpreter::new(bars, self.limits)?;
        interpreter.execute(strategy.program())?;

        let budget = interpreter.budget();
        tracing::trace!(
            steps = budget.steps(),
            cells = budget.cells(),
            bars = bars.len(),
            "Strategy script finished"
        );

        let value = interpreter
            .take(SIGNAL_BINDING)
            .ok_or(ExecutionError::MissingSignal)?;
        let raw = raw_signals(value, bars.len())?;
        Ok(SignalSeries::align(raw, bars.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PriceSeries;
    use crate::guard::PolicyVerifier;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    fn bars(closes: &[f64]) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2021, 1, 4, 0, 0, 0).unwrap();
        PriceSeries::from_closes(start, closes).unwrap().bars().to_vec()
    }

    fn rising(n: usize) -> Vec<PriceBar> {
        bars(&(0..n).map(|i| 100.0 + i as f64).collect::<Vec<_>>())
    }

    fn strategy(code: &str) -> VerifiedStrategy {
        PolicyVerifier::empty().approve(code).unwrap()
    }

    fn run(code: &str, bars: &[PriceBar]) -> Result<SignalSeries, ExecutionError> {
        SignalSandbox::default().run(&strategy(code), bars)
    }

    // ========================================================================
    // Output shaping
    // ========================================================================

    #[test]
    fn test_scalar_broadcasts() {
        let out = run("signals = 1.0", &rising(5)).unwrap();
        assert_eq!(out.values, vec![1.0; 5]);
    }

    #[test]
    fn test_values_are_clamped_and_raw_extremes_kept() {
        let out = run("signals = price - 102", &rising(5)).unwrap();
        assert_eq!(out.values, vec![-1.0, -1.0, 0.0, 1.0, 1.0]);
        assert_eq!(out.raw_min, -2.0);
        assert_eq!(out.raw_max, 2.0);
    }

    #[test]
    fn test_mask_becomes_unit_positions() {
        let out = run("signals = price > 101.5", &rising(4)).unwrap();
        assert_eq!(out.values, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_nan_becomes_zero() {
        let out = run("signals = price.shift(2) / price.shift(2)", &rising(4)).unwrap();
        assert_eq!(out.values, vec![0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_short_series_forward_fills_and_long_truncates() {
        let out = run("signals = price.iloc[:2] - 100.5", &rising(4)).unwrap();
        assert_eq!(out.values, vec![-0.5, 0.5, 0.5, 0.5]);
        let out = run("signals = [0.5, 0.25, 0.1, 0.0, 1.0]", &rising(3)).unwrap();
        assert_eq!(out.values, vec![0.5, 0.25, 0.1]);
    }

    #[test]
    fn test_missing_signal() {
        assert_eq!(run("x = 1", &rising(3)).unwrap_err(), ExecutionError::MissingSignal);
    }

    #[test]
    fn test_non_numeric_signal_rejected() {
        let err = run("signals = 'long'", &rising(3)).unwrap_err();
        assert!(err.to_string().contains("must be numeric"));
    }

    // ========================================================================
    // Language
    // ========================================================================

    #[test]
    fn test_moving_average_crossover() {
        let code = "import pandas as pd
short_ma = price.rolling(window=2).mean()
long_ma = price.rolling(window=3).mean()
signals = pd.Series(0.0, index=price.index)
signals[short_ma > long_ma] = 1.0
signals[short_ma < long_ma] = -1.0
";
        let out = run(code, &bars(&[10.0, 11.0, 12.0, 11.0, 9.0, 8.0])).unwrap();
        assert_eq!(out.values, vec![0.0, 0.0, 1.0, 1.0, -1.0, -1.0]);
    }

    #[test]
    fn test_loops_and_item_assignment() {
        let code = "signals = np.zeros(len(price))
for i in range(1, len(price)):
    if price.iloc[i] > price.iloc[i - 1]:
        signals[i] = 1
    else:
        signals.iloc[i] = -1
";
        let out = run(code, &bars(&[1.0, 2.0, 1.5, 3.0])).unwrap();
        assert_eq!(out.values, vec![0.0, 1.0, -1.0, 1.0]);
    }

    #[test]
    fn test_list_building_with_append_and_comprehension() {
        let code = "acc = []
for i, p in enumerate(price):
    acc.append(0.5 if i % 2 == 0 else -0.5)
doubled = [x * 2 for x in acc if x > 0]
signals = acc
n = len(doubled)
";
        let out = run(code, &rising(4)).unwrap();
        assert_eq!(out.values, vec![0.5, -0.5, 0.5, -0.5]);
    }

    #[test]
    fn test_comprehension_variable_does_not_leak() {
        let code = "x = 7\nys = [x for x in range(3)]\nsignals = x / 10\n";
        let out = run(code, &rising(2)).unwrap();
        assert_eq!(out.values, vec![0.7, 0.7]);
    }

    #[test]
    fn test_math_requires_import() {
        assert!(run("signals = math.sqrt(0.25)", &rising(2)).is_err());
        let out = run("import math\nsignals = math.sqrt(0.25)", &rising(2)).unwrap();
        assert_eq!(out.values, vec![0.5, 0.5]);
    }

    #[test]
    fn test_data_frame_columns() {
        let code = "rng = data['High'] - data.Low\ndata['Signal'] = rng / 4\nsignals = data['Signal']\n";
        let out = run(code, &rising(3)).unwrap();
        // from_closes uses OHLC = close, so the range is zero
        assert_eq!(out.values, vec![0.0; 3]);
    }

    #[test]
    fn test_inert_module_use_fails() {
        let err = run("import vectorbt as vbt\npf = vbt.Portfolio\nsignals = 1", &rising(2)).unwrap_err();
        assert!(err.to_string().contains("not available in the sandbox"));
    }

    #[test]
    fn test_runtime_negative_shift_rejected_with_line() {
        let err = run("x = 1\nsignals = price.shift(-1)\n", &rising(3)).unwrap_err();
        match err {
            ExecutionError::Runtime { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("looks ahead"));
            }
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    #[test]
    fn test_unbound_builtins_are_absent() {
        let err = run("signals = open", &rising(2)).unwrap_err();
        assert!(err.to_string().contains("name 'open' is not defined"));
        assert!(run("import os\nsignals = 1", &rising(2)).is_err());
    }

    #[test]
    fn test_ambiguous_truth_value() {
        let err = run("if price > 0:\n    signals = 1\n", &rising(2)).unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    // ========================================================================
    // Limits
    // ========================================================================

    #[test]
    fn test_infinite_loop_is_stopped() {
        let err = run("x = 0\nwhile True:\n    x += 1\n", &rising(2)).unwrap_err();
        assert!(err.is_resource_limit(), "unexpected error {err:?}");
    }

    #[test]
    fn test_memory_limit() {
        let sandbox = SignalSandbox::new(SandboxLimits {
            max_allocated_cells: 1_000,
            ..SandboxLimits::default()
        });
        let err = sandbox
            .run(&strategy("big = np.zeros(5000)\nsignals = 1"), &rising(10))
            .unwrap_err();
        assert_eq!(err, ExecutionError::MemoryLimit(1_000));
    }

    #[test]
    fn test_step_limit() {
        let sandbox = SignalSandbox::new(SandboxLimits {
            max_steps: 50,
            ..SandboxLimits::default()
        });
        let err = sandbox
            .run(&strategy("for i in range(100):\n    x = i\nsignals = 1"), &rising(3))
            .unwrap_err();
        assert_eq!(err, ExecutionError::StepLimit(50));
    }

    #[test]
    fn test_timeout() {
        let sandbox = SignalSandbox::new(SandboxLimits {
            timeout: Duration::ZERO,
            ..SandboxLimits::default()
        });
        let err = sandbox.run(&strategy("signals = 1"), &rising(3)).unwrap_err();
        assert_eq!(err, ExecutionError::Timeout(Duration::ZERO));
    }

    fn run_with_cells(code: &str, cells: u64) -> Result<SignalSeries, ExecutionError> {
        SignalSandbox::new(SandboxLimits {
            max_allocated_cells: cells,
            ..SandboxLimits::default()
        })
        .run(&strategy(code), &rising(3))
    }

    #[test_case::test_case("x = sum(range(200000))\nsignals = 1" ; "sum over range")]
    #[test_case::test_case("x = np.mean(range(200000))\nsignals = 1" ; "array from range")]
    #[test_case::test_case("x = max(range(200000))\nsignals = 1" ; "max over range")]
    #[test_case::test_case("for i, v in enumerate(range(200000)):\n    x = v\nsignals = 1" ; "enumerate range")]
    #[test_case::test_case("s = 'ab'\nfor i in range(30):\n    s = s + s\nsignals = 1" ; "string doubling")]
    fn test_builtins_charge_materialized_cells(code: &str) {
        assert_eq!(
            run_with_cells(code, 1_000).unwrap_err(),
            ExecutionError::MemoryLimit(1_000)
        );
    }

    #[test]
    fn test_extreme_ranges_do_not_overflow() {
        let code = "n = len(range(-2 ** 62, 2 ** 62))\n\
                    hit = 3 in range(-2 ** 62, 2 ** 62, 7)\n\
                    signals = 1 if n > 0 else 0";
        let signals = run(code, &rising(3)).unwrap();
        assert_eq!(signals.values, vec![1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_runs_are_deterministic() {
        let code = "signals = np.tanh(price.pct_change().rolling(3).mean() * 50)";
        let prices = bars(&[10.0, 10.5, 10.2, 10.9, 11.3, 10.8, 11.0]);
        let a = run(code, &prices).unwrap();
        let b = run(code, &prices).unwrap();
        assert_eq!(a, b);
    }

    proptest! {
        #[test]
        fn prop_signals_are_bounded_and_aligned(
            closes in prop::collection::vec(1.0f64..500.0, 2..60),
            scale in -50.0f64..50.0,
        ) {
            let prices = bars(&closes);
            let code = format!("signals = price.pct_change() * {scale}");
            let out = run(&code, &prices).unwrap();
            prop_assert_eq!(out.len(), prices.len());
            prop_assert!(out.values.iter().all(|v| (-1.0..=1.0).contains(v)));
        }
    }
}
