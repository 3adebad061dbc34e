//! Domain types for SessionLab

pub mod bar;
pub mod direction;
pub mod instrument;
pub mod series;
pub mod trade;

pub use bar::Bar;
pub use direction::{Direction, ParseDirectionError};
pub use instrument::{pip_size, Instrument};
pub use series::{extremes, BarSeries};
pub use trade::{ExitReason, TradeResult};
