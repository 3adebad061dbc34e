//! SessionLab Runner: configuration, data loading, the backtest loop,
//! statistics and export.
//!
//! This crate builds on `sessionlab-core` to provide:
//! - TOML configuration with validation into a resolved form
//! - CSV bar loading and JSON bias / sentiment loading
//! - The per-instrument, per-day backtest runner (parallel across instruments)
//! - R-based performance statistics
//! - Spread / slippage sensitivity scenarios
//! - CSV, JSON and Markdown artifacts

pub mod bias_loader;
pub mod config;
pub mod data_loader;
pub mod export;
pub mod metrics;
pub mod runner;
pub mod scenarios;

pub use bias_loader::{build_bias_store, BiasLoadError, BiasSources};
pub use config::{BacktestConfig, ConfigError, ResolvedConfig, RunId};
pub use data_loader::{load_universe, InstrumentBars, LoadError};
pub use export::{save_artifacts, RunSummary};
pub use metrics::{GroupStats, StatsSummary};
pub use runner::{run_backtest, run_from_sources, BacktestResult, RunError, RunInputs, SkipReason};
pub use scenarios::{run_scenarios, sensitivity_scenarios, Scenario, ScenarioOutcome};
