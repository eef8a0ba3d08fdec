//! Atlas Common - Shared types, utilities, and configuration for the Atlas workspace.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Calendar spans used to size walk-forward windows
//! - Error types and handling utilities
//! - Logging setup
//! - Utility functions used across Atlas crates

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod span;
pub mod util;
pub mod validation;

pub use config::{
    AtlasConfig, BacktestConfig, GuardConfig, MetricsConfig, ObservabilityConfig, PipelineConfig,
    SandboxConfig, StorageConfig,
};
pub use error::{Error, Result};
pub use span::{Span, SpanUnit};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::{AtlasConfig, BacktestConfig, GuardConfig, SandboxConfig};
    pub use crate::error::{Error, Result};
    pub use crate::logging::init_logging;
    pub use crate::span::Span;
    pub use crate::validation::{Validate, ValidationError};
}
