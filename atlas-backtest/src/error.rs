//! Error taxonomy for verification and backtesting.

use thiserror::Error;

use crate::guard::VerificationVerdict;
use crate::sandbox::ExecutionError;

/// Result type alias for backtest operations.
pub type Result<T> = std::result::Result<T, BacktestError>;

/// Backtest error types.
#[derive(Debug, Error)]
pub enum BacktestError {
    /// The submission failed static policy checks and must not run
    #[error("Strategy failed verification: {}", .0.violations_text().join("; "))]
    VerificationFailure(VerificationVerdict),

    /// Not enough history to build a window or period
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Signal generation raised inside the sandbox
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Every window failed, so there is no test-period evidence
    #[error("No valid windows: all {attempted} windows failed")]
    NoValidWindows { attempted: usize },

    /// Price bars violate ordering or OHLC invariants
    #[error("Invalid price data at bar {index}: {reason}")]
    InvalidPriceData { index: usize, reason: String },

    /// Window or cost configuration is unusable
    #[error("Invalid backtest configuration: {0}")]
    InvalidConfig(String),
}

impl BacktestError {
    /// True when the strategy never produced a `signals` binding.
    pub fn is_missing_signal(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::MissingSignal))
    }

    /// Whether this error ends the whole backtest attempt.
    ///
    /// Execution errors are recovered per window; everything else is terminal.
    pub fn aborts_backtest(&self) -> bool {
        !matches!(self, Self::Execution(_))
    }

    /// None of these outcomes change on retry with the same inputs.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Short machine-readable tag, used as a persisted failure status detail.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::VerificationFailure(_) => "verification_failure",
            Self::InsufficientData(_) => "insufficient_data",
            Self::Execution(ExecutionError::MissingSignal) => "missing_signal",
            Self::Execution(_) => "execution_error",
            Self::NoValidWindows { .. } => "no_valid_windows",
            Self::InvalidPriceData { .. } => "invalid_price_data",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }
}
