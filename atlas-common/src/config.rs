//! Configuration management for Atlas services.
//!
//! All Atlas tools share one configuration file at `~/.atlas/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (ATLAS_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `ATLAS_TRAIN_SPAN` → backtest.train_span
//! - `ATLAS_VALIDATION_SPAN` → backtest.validation_span
//! - `ATLAS_TEST_SPAN` → backtest.test_span
//! - `ATLAS_ROLL_SPAN` → backtest.roll_span
//! - `ATLAS_SPREAD_RATE` → backtest.spread_rate
//! - `ATLAS_SLIPPAGE_RATE` → backtest.slippage_rate
//! - `ATLAS_MAX_LEVERAGE` → guard.max_leverage
//! - `ATLAS_MAX_POSITION_FRACTION` → guard.max_position_fraction
//! - `ATLAS_INSTABILITY_THRESHOLD` → metrics.instability_threshold
//! - `ATLAS_SANDBOX_TIMEOUT_MS` → sandbox.timeout_ms
//! - `ATLAS_DB_PATH` → storage.database_path
//! - `ATLAS_LOG_LEVEL` → observability.log_level
//! - `ATLAS_LOG_FORMAT` → observability.log_format

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::span::Span;

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".atlas"),
        |dirs| dirs.home_dir().join(".atlas"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Backtest Configuration
// ============================================================================

/// Walk-forward window sizing and the transaction-cost model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Training span per window
    #[serde(default = "default_train_span")]
    pub train_span: Span,

    /// Validation span per window
    #[serde(default = "default_validation_span")]
    pub validation_span: Span,

    /// Test span per window
    #[serde(default = "default_test_span")]
    pub test_span: Span,

    /// How far the window start advances between windows
    #[serde(default = "default_roll_span")]
    pub roll_span: Span,

    /// Half bid/ask spread charged per unit of traded exposure
    #[serde(default = "default_cost_rate")]
    pub spread_rate: f64,

    /// Slippage charged per unit of traded exposure
    #[serde(default = "default_cost_rate")]
    pub slippage_rate: f64,

    /// Evaluate windows on the rayon pool
    #[serde(default = "default_true")]
    pub parallel: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            train_span: default_train_span(),
            validation_span: default_validation_span(),
            test_span: default_test_span(),
            roll_span: default_roll_span(),
            spread_rate: default_cost_rate(),
            slippage_rate: default_cost_rate(),
            parallel: true,
        }
    }
}

impl BacktestConfig {
    /// Combined cost rate applied to each unit of position change.
    pub fn total_cost_rate(&self) -> f64 {
        self.spread_rate + self.slippage_rate
    }
}

fn default_train_span() -> Span {
    Span::months(36)
}

fn default_validation_span() -> Span {
    Span::months(6)
}

fn default_test_span() -> Span {
    Span::months(1)
}

fn default_roll_span() -> Span {
    Span::months(1)
}

fn default_cost_rate() -> f64 {
    0.001
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Guard Configuration
// ============================================================================

/// Static policy limits applied before any strategy code runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Largest leverage factor a strategy may express
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,

    /// Largest position as a fraction of average daily volume
    #[serde(default = "default_max_position_fraction")]
    pub max_position_fraction: f64,

    /// Top-level modules a strategy may import
    #[serde(default = "default_allowed_modules")]
    pub allowed_modules: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_leverage: default_max_leverage(),
            max_position_fraction: default_max_position_fraction(),
            allowed_modules: default_allowed_modules(),
        }
    }
}

fn default_max_leverage() -> f64 {
    2.0
}

fn default_max_position_fraction() -> f64 {
    0.05
}

fn default_allowed_modules() -> Vec<String> {
    ["pandas", "numpy", "vectorbt", "math", "datetime"]
        .into_iter()
        .map(String::from)
        .collect()
}

// ============================================================================
// Sandbox Configuration
// ============================================================================

/// Resource ceilings for one strategy execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Wall-clock budget per execution, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum evaluation steps (statements plus expressions)
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Maximum series cells allocated over the whole run
    #[serde(default = "default_max_allocated_cells")]
    pub max_allocated_cells: u64,

    /// Maximum iterations of any single loop
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_steps: default_max_steps(),
            max_allocated_cells: default_max_allocated_cells(),
            max_loop_iterations: default_max_loop_iterations(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    2_000
}

fn default_max_steps() -> u64 {
    5_000_000
}

fn default_max_allocated_cells() -> u64 {
    20_000_000
}

fn default_max_loop_iterations() -> u64 {
    1_000_000
}

// ============================================================================
// Metrics Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Windows with a Sharpe ratio below this are counted as unstable
    #[serde(default = "default_instability_threshold")]
    pub instability_threshold: f64,

    /// Annualization factor for daily returns
    #[serde(default = "default_periods_per_year")]
    pub periods_per_year: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            instability_threshold: default_instability_threshold(),
            periods_per_year: default_periods_per_year(),
        }
    }
}

fn default_instability_threshold() -> f64 {
    0.3
}

fn default_periods_per_year() -> f64 {
    252.0
}

// ============================================================================
// Storage / Pipeline / Observability
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    /// SQLite database path; defaults to `~/.atlas/strategies.db`
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| config_dir().join("strategies.db"))
    }
}

/// Research loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Iterations run by `Pipeline::run_configured`
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Knowledge snippets requested per planning prompt
    #[serde(default = "default_knowledge_snippets")]
    pub knowledge_snippets: usize,

    /// Metric used to rank candidate parents
    #[serde(default = "default_parent_metric")]
    pub parent_metric: String,

    /// Number of top-ranked parents considered per iteration; the best one with analyzer feedback wins
    #[serde(default = "default_parent_pool")]
    pub parent_pool: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            knowledge_snippets: default_knowledge_snippets(),
            parent_metric: default_parent_metric(),
            parent_pool: default_parent_pool(),
        }
    }
}

fn default_max_iterations() -> u32 {
    10
}

fn default_knowledge_snippets() -> usize {
    3
}

fn default_parent_metric() -> String {
    "test_sharpe".into()
}

fn default_parent_pool() -> usize {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration shared by every Atlas crate.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AtlasConfig {
    #[serde(default)]
    pub backtest: BacktestConfig,

    #[serde(default)]
    pub guard: GuardConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl AtlasConfig {
    /// Load configuration from the default path, falling back to defaults.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&content).map_err(|e| Error::config(path, e))
    }

    /// Load configuration with environment variable overrides applied.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            let raw = lookup(key)?;
            match raw.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key = %key, value = %raw, "Ignoring unparsable override");
                    None
                }
            }
        }

        if let Some(span) = parsed(&lookup, "ATLAS_TRAIN_SPAN") {
            self.backtest.train_span = span;
        }
        if let Some(span) = parsed(&lookup, "ATLAS_VALIDATION_SPAN") {
            self.backtest.validation_span = span;
        }
        if let Some(span) = parsed(&lookup, "ATLAS_TEST_SPAN") {
            self.backtest.test_span = span;
        }
        if let Some(span) = parsed(&lookup, "ATLAS_ROLL_SPAN") {
            self.backtest.roll_span = span;
        }
        if let Some(rate) = parsed(&lookup, "ATLAS_SPREAD_RATE") {
            self.backtest.spread_rate = rate;
        }
        if let Some(rate) = parsed(&lookup, "ATLAS_SLIPPAGE_RATE") {
            self.backtest.slippage_rate = rate;
        }
        if let Some(lev) = parsed(&lookup, "ATLAS_MAX_LEVERAGE") {
            self.guard.max_leverage = lev;
        }
        if let Some(frac) = parsed(&lookup, "ATLAS_MAX_POSITION_FRACTION") {
            self.guard.max_position_fraction = frac;
        }
        if let Some(threshold) = parsed(&lookup, "ATLAS_INSTABILITY_THRESHOLD") {
            self.metrics.instability_threshold = threshold;
        }
        if let Some(ms) = parsed(&lookup, "ATLAS_SANDBOX_TIMEOUT_MS") {
            self.sandbox.timeout_ms = ms;
        }
        if let Some(path) = lookup("ATLAS_DB_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }
        if let Some(level) = lookup("ATLAS_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("ATLAS_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Write the configuration as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).map_err(|e| Error::io(path, e))
    }
}
