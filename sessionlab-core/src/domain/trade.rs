//! TradeResult: the terminal, fill-accurate record of one simulated trade.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::direction::Direction;

/// Why a trade closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Tp,
    Sl,
    TimeStop,
}

impl ExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ExitReason::Tp => "tp",
            ExitReason::Sl => "sl",
            ExitReason::TimeStop => "time_stop",
        }
    }
}

/// A closed trade.
///
/// `*_raw` prices are the market levels; `entry_price` and `exit_price` carry
/// half-spread and slippage against the trader. `stop_price` and
/// `target_price` are the initial levels, before any breakeven move.
/// `pnl_pips` and `pnl_r` are size-weighted over partial and final fills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeResult {
    pub instrument: String,
    pub direction: Direction,
    pub entry_time: DateTime<Utc>,
    pub entry_price_raw: f64,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price_raw: f64,
    pub exit_price: f64,
    pub pnl_pips: f64,
    pub pnl_r: f64,
    pub exit_reason: ExitReason,
    pub spread_pips: f64,
    pub slippage_pips: f64,
    pub ref_high: f64,
    pub ref_low: f64,
}

impl TradeResult {
    pub fn is_win(&self) -> bool {
        self.pnl_r > 0.0
    }

    pub fn is_loss(&self) -> bool {
        self.pnl_r < 0.0
    }
}
