//! Configuration validation for Atlas services.
//!
//! Every section reports its own problems; [`AtlasConfig::validate`] gathers
//! them so a bad config file is fixed in one pass.

use std::path::Path;

use thiserror::Error;

use crate::config::{
    AtlasConfig, BacktestConfig, GuardConfig, MetricsConfig, ObservabilityConfig, PipelineConfig,
    SandboxConfig,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    if errors.is_empty() {
        Ok(())
    } else if errors.len() == 1 {
        Err(errors.remove(0))
    } else {
        Err(ValidationError::Multiple(errors))
    }
}

fn check_rate(errors: &mut Vec<ValidationError>, field: &str, value: f64) {
    if !value.is_finite() || !(0.0..1.0).contains(&value) {
        errors.push(ValidationError::invalid(field, "must be in [0, 1)"));
    }
}

impl AtlasConfig {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let sections: [&dyn Validate; 6] = [
            &self.backtest,
            &self.guard,
            &self.sandbox,
            &self.metrics,
            &self.pipeline,
            &self.observability,
        ];

        let errors = sections
            .iter()
            .filter_map(|section| section.validate().err())
            .collect();
        collect(errors)
    }

    /// Load configuration from `path`, or from the default location with
    /// environment overrides, and reject it unless it validates.
    pub fn load_validated(path: Option<&Path>) -> crate::error::Result<Self> {
        let config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load_with_env()?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl Validate for BacktestConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for (field, span) in [
            ("backtest.train_span", self.train_span),
            ("backtest.validation_span", self.validation_span),
            ("backtest.test_span", self.test_span),
            ("backtest.roll_span", self.roll_span),
        ] {
            if span.is_zero() {
                errors.push(ValidationError::invalid(field, "span must be positive"));
            }
        }

        check_rate(&mut errors, "backtest.spread_rate", self.spread_rate);
        check_rate(&mut errors, "backtest.slippage_rate", self.slippage_rate);

        collect(errors)
    }
}

impl Validate for GuardConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if !self.max_leverage.is_finite() || self.max_leverage < 1.0 {
            errors.push(ValidationError::invalid(
                "guard.max_leverage",
                "must be a finite number >= 1.0",
            ));
        }
        if !self.max_position_fraction.is_finite()
            || self.max_position_fraction <= 0.0
            || self.max_position_fraction > 1.0
        {
            errors.push(ValidationError::invalid(
                "guard.max_position_fraction",
                "must be in (0, 1]",
            ));
        }
        if self.allowed_modules.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "guard.allowed_modules".into(),
            });
        }

        collect(errors)
    }
}

impl Validate for SandboxConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("sandbox.timeout_ms", self.timeout_ms),
            ("sandbox.max_steps", self.max_steps),
            ("sandbox.max_allocated_cells", self.max_allocated_cells),
            ("sandbox.max_loop_iterations", self.max_loop_iterations),
        ] {
            if value == 0 {
                errors.push(ValidationError::invalid(field, "must be greater than 0"));
            }
        }

        collect(errors)
    }
}

impl Validate for MetricsConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if !self.instability_threshold.is_finite() {
            errors.push(ValidationError::invalid(
                "metrics.instability_threshold",
                "must be finite",
            ));
        }
        if !self.periods_per_year.is_finite() || self.periods_per_year <= 0.0 {
            errors.push(ValidationError::invalid(
                "metrics.periods_per_year",
                "must be greater than 0",
            ));
        }

        collect(errors)
    }
}

impl Validate for PipelineConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.parent_metric.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "pipeline.parent_metric".into(),
            });
        }
        // json_extract path segment; anything else would be spliced into SQL
        if !self
            .parent_metric
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ValidationError::invalid(
                "pipeline.parent_metric",
                "must contain only letters, digits and underscores",
            ));
        }
        if self.parent_pool == 0 {
            return Err(ValidationError::Conflict {
                reason: "pipeline.parent_pool must select at least one parent".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::invalid(
                "observability.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(ValidationError::invalid(
                "observability.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AtlasConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_span_rejected() {
        let mut config = AtlasConfig::default();
        config.backtest.test_span = Span::months(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backtest.test_span"));
    }

    #[test]
    fn test_errors_are_collected_across_sections() {
        let mut config = AtlasConfig::default();
        config.backtest.spread_rate = 1.5;
        config.guard.max_leverage = 0.5;
        config.sandbox.max_steps = 0;

        match config.validate() {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_load_validated_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AtlasConfig::default();
        config.guard.max_leverage = 0.5;
        config.save_to(&path).unwrap();

        let err = AtlasConfig::load_validated(Some(&path)).unwrap_err();
        assert!(matches!(err, crate::error::Error::Invalid(_)));

        AtlasConfig::default().save_to(&path).unwrap();
        assert!(AtlasConfig::load_validated(Some(&path)).is_ok());
    }

    #[test]
    fn test_parent_metric_must_be_identifier() {
        let mut config = PipelineConfig::default();
        config.parent_metric = "test_sharpe') OR 1=1 --".into();
        assert!(config.validate().is_err());

        config.parent_metric = "test_return".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_log_format_validation() {
        let mut config = ObservabilityConfig::default();
        config.log_format = "xml".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidValue { .. })
        ));
    }
}
