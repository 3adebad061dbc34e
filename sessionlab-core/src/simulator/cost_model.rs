//! Cost model: half-spread plus slippage, charged against the trader.
//!
//! Entry: longs pay more, shorts receive less. Exit is mirrored: longs
//! receive less, shorts pay more. Raw quotes are treated as mid prices.

use serde::{Deserialize, Serialize};

use crate::domain::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    pub pip_size: f64,
    pub spread_pips: f64,
    pub slippage_pips: f64,
}

impl CostModel {
    pub fn new(pip_size: f64, spread_pips: f64, slippage_pips: f64) -> Self {
        Self {
            pip_size,
            spread_pips,
            slippage_pips,
        }
    }

    pub fn frictionless(pip_size: f64) -> Self {
        Self::new(pip_size, 0.0, 0.0)
    }

    /// Half the quoted spread, in price units.
    pub fn half_spread(&self) -> f64 {
        self.spread_pips * self.pip_size / 2.0
    }

    fn friction(&self) -> f64 {
        self.half_spread() + self.slippage_pips * self.pip_size
    }

    /// Execution price for opening a position at `raw`.
    pub fn apply_entry(&self, raw: f64, direction: Direction) -> f64 {
        raw + direction.sign() * self.friction()
    }

    /// Execution price for closing a position at `raw`.
    pub fn apply_exit(&self, raw: f64, direction: Direction) -> f64 {
        raw - direction.sign() * self.friction()
    }

    /// Signed pip result of moving from `entry` to `exit` in `direction`.
    pub fn pnl_pips(&self, entry: f64, exit: f64, direction: Direction) -> f64 {
        direction.sign() * (exit - entry) / self.pip_size
    }
}
