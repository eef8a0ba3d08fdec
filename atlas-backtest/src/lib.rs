//! Atlas Backtest - strategy verification and walk-forward simulation.
//!
//! # Architecture
//!
//! ```text
//! strategy script ──► PolicyVerifier ──► VerifiedStrategy
//!                                              │
//! PriceSeries ──► WindowPlanner ──► windows    ▼
//!                                   └──► BacktestEngine ──► SignalSandbox
//!                                              │              + CostModel
//!                                              ▼
//!                                   MetricsAggregator ──► AggregateReport
//! ```
//!
//! Verification is static and best effort. The sandbox namespace is the hard
//! boundary: scripts run in a small interpreter that binds only price data and
//! a numeric library surface, under a step, memory and wall-clock budget.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod aggregate;
pub mod cost;
pub mod data;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod guard;
pub mod metrics;
pub mod planner;
pub mod report;
pub mod sandbox;

pub use aggregate::{AggregateReport, MetricsAggregator, PeriodAggregate};
pub use cost::CostModel;
pub use data::{PriceBar, PriceSeries};
pub use engine::{BacktestEngine, PeriodResult, WalkForwardResult, WindowFailure};
pub use error::{BacktestError, Result};
pub use guard::{
    PolicyRule, PolicyVerifier, VerificationVerdict, VerifiedStrategy, Violation, ViolationKind,
};
pub use metrics::PeriodMetrics;
pub use planner::{Period, Window, WindowPlanner};
pub use report::{BacktestReport, PerformanceSummary};
pub use sandbox::{ExecutionError, SandboxLimits, SignalSandbox, SignalSeries};
