//! SessionLab Core: session calendar, bias lookups, entry detection and
//! trade simulation for intraday FX backtests.
//!
//! This crate contains the pure, deterministic part of the engine:
//! - Domain types (bars, bar series, instruments, trade results)
//! - Session calendar with DST-safe local-time resolution
//! - As-of bias and sentiment store
//! - Indicators (Bollinger bands, daily ranges / ADR)
//! - Entry models: sweep-and-reclaim, ADR pullback, Bollinger fade
//! - Bar-by-bar trade simulator with partial target and breakeven rules
//!
//! Nothing here touches the filesystem or installs a logger.

pub mod bias;
pub mod domain;
pub mod indicators;
pub mod session;
pub mod signals;
pub mod simulator;

pub use bias::{BiasError, BiasRecord, BiasStore, SentimentRecord};
pub use domain::{pip_size, Bar, BarSeries, Direction, ExitReason, Instrument, TradeResult};
pub use session::{session_bounds, CalendarError, SessionBounds, SessionRef, SessionWindow};
pub use signals::{
    BarWindow, DetectionContext, EntryModel, EntryModelKind, Signal, SignalModel,
};
pub use simulator::{
    simulate_trade, CostModel, ExitRules, PartialTarget, PositionState, SimulationOutcome,
    TradeSetup,
};
