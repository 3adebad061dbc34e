//! PositionState: the small value threaded through one trade's bar walk.
//!
//! Transitions return a new state; nothing else in the simulator mutates it.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    /// Open fraction of the initial size, in (0, 1].
    pub remaining_fraction: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub breakeven_moved: bool,
    pub partial_taken: bool,
}

impl PositionState {
    pub fn open(stop_price: f64, target_price: f64) -> Self {
        Self {
            remaining_fraction: 1.0,
            stop_price,
            target_price,
            breakeven_moved: false,
            partial_taken: false,
        }
    }

    /// Close `fraction` of the initial size and move the stop to `breakeven`.
    pub fn take_partial(self, fraction: f64, breakeven: f64) -> Self {
        Self {
            remaining_fraction: (self.remaining_fraction - fraction).max(0.0),
            stop_price: breakeven,
            breakeven_moved: true,
            partial_taken: true,
            ..self
        }
    }

    pub fn move_to_breakeven(self, breakeven: f64) -> Self {
        Self {
            stop_price: breakeven,
            breakeven_moved: true,
            ..self
        }
    }

    pub fn is_open(&self) -> bool {
        self.remaining_fraction > 0.0
    }
}
