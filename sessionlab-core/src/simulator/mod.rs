//! Trade simulator: walks one position forward bar by bar until it exits.
//!
//! Per bar, in order:
//! 1. time stop (bar time >= deadline) closes the remainder at the close
//! 2. stop/target hit test against the bar's range, half-spread adjusted;
//!    with the conservative flag a bar touching both counts as a stop
//! 3. optional partial target at `entry ± r_multiple × initial risk`;
//!    realizes a fraction and moves the stop to the execution entry
//! 4. full target closes the remainder
//! 5. stop closes the remainder (at the current, possibly breakeven, stop)
//! 6. optional breakeven move once favorable excursion reaches the trigger
//!
//! A walk that runs out of bars produces no trade.

pub mod cost_model;
pub mod state;

pub use cost_model::CostModel;
pub use state::PositionState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Direction, ExitReason, TradeResult};

/// A confirmed entry, ready to simulate. Prices are raw market levels.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeSetup {
    pub instrument: String,
    pub direction: Direction,
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub stop_price: f64,
    pub target_price: f64,
    pub time_stop: Option<DateTime<Utc>>,
    pub ref_high: f64,
    pub ref_low: f64,
}

/// Scale-out at a multiple of initial risk.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartialTarget {
    pub r_multiple: f64,
    /// Fraction of the initial size closed at the partial level.
    pub fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ExitRules {
    pub partial_target: Option<PartialTarget>,
    pub breakeven_trigger_pips: Option<f64>,
    /// Stop wins when a bar touches both stop and target.
    pub conservative_tie_break: bool,
}

/// How a simulation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationOutcome {
    Closed(TradeResult),
    /// Bars ran out before any exit condition.
    OpenAtEnd,
    /// Execution entry and stop coincide (or are not finite).
    InvalidRisk,
    /// The entry bar is the last bar of the series.
    NoBarsAfterEntry,
}

impl SimulationOutcome {
    pub fn into_trade(self) -> Option<TradeResult> {
        match self {
            SimulationOutcome::Closed(trade) => Some(trade),
            _ => None,
        }
    }
}

/// `(target_hit, stop_hit)` for one bar.
fn hit_test(bar: &Bar, direction: Direction, stop: f64, target: f64, half_spread: f64) -> (bool, bool) {
    match direction {
        Direction::Long => (bar.high >= target + half_spread, bar.low <= stop + half_spread),
        Direction::Short => (bar.low <= target - half_spread, bar.high >= stop - half_spread),
    }
}

struct Fills {
    realized_pips: f64,
}

/// Simulate `setup` over `bars`, starting strictly after `setup.entry_index`.
pub fn simulate_trade(
    bars: &[Bar],
    setup: &TradeSetup,
    costs: &CostModel,
    rules: &ExitRules,
) -> SimulationOutcome {
    if setup.entry_index + 1 >= bars.len() {
        return SimulationOutcome::NoBarsAfterEntry;
    }

    let direction = setup.direction;
    let pip = costs.pip_size;
    let half = costs.half_spread();
    let entry_exec = costs.apply_entry(setup.entry_price, direction);
    let risk_pips = (entry_exec - setup.stop_price).abs() / pip;
    if !(risk_pips > 0.0 && risk_pips.is_finite()) {
        return SimulationOutcome::InvalidRisk;
    }

    let partial_level = rules
        .partial_target
        .map(|p| entry_exec + direction.sign() * p.r_multiple * risk_pips * pip);

    let mut state = PositionState::open(setup.stop_price, setup.target_price);
    let mut fills = Fills { realized_pips: 0.0 };

    let close = |fills: &Fills, fraction: f64, bar: &Bar, raw: f64, reason: ExitReason| {
        let exit_exec = costs.apply_exit(raw, direction);
        let pnl_pips = fills.realized_pips + costs.pnl_pips(entry_exec, exit_exec, direction) * fraction;
        SimulationOutcome::Closed(TradeResult {
            instrument: setup.instrument.clone(),
            direction,
            entry_time: setup.entry_time,
            entry_price_raw: setup.entry_price,
            entry_price: entry_exec,
            stop_price: setup.stop_price,
            target_price: setup.target_price,
            exit_time: bar.time,
            exit_price_raw: raw,
            exit_price: exit_exec,
            pnl_pips,
            pnl_r: pnl_pips / risk_pips,
            exit_reason: reason,
            spread_pips: costs.spread_pips,
            slippage_pips: costs.slippage_pips,
            ref_high: setup.ref_high,
            ref_low: setup.ref_low,
        })
    };

    for bar in &bars[setup.entry_index + 1..] {
        if setup.time_stop.is_some_and(|deadline| bar.time >= deadline) {
            return close(&fills, state.remaining_fraction, bar, bar.close, ExitReason::TimeStop);
        }

        let (mut target_hit, stop_hit) =
            hit_test(bar, direction, state.stop_price, state.target_price, half);
        if target_hit && stop_hit && rules.conservative_tie_break {
            target_hit = false;
        }

        if let (Some(partial), Some(level)) = (rules.partial_target, partial_level) {
            let (partial_hit, _) = hit_test(bar, direction, state.stop_price, level, half);
            if partial_hit && !state.partial_taken {
                let fraction = partial.fraction.min(state.remaining_fraction);
                let exit_exec = costs.apply_exit(level, direction);
                fills.realized_pips += costs.pnl_pips(entry_exec, exit_exec, direction) * fraction;
                state = state.take_partial(fraction, entry_exec);
                if !state.is_open() {
                    return close(&fills, 0.0, bar, level, ExitReason::Tp);
                }
            }
        }

        if target_hit {
            return close(&fills, state.remaining_fraction, bar, state.target_price, ExitReason::Tp);
        }
        if stop_hit {
            return close(&fills, state.remaining_fraction, bar, state.stop_price, ExitReason::Sl);
        }

        if let Some(trigger) = rules.breakeven_trigger_pips {
            if !state.breakeven_moved {
                let excursion = match direction {
                    Direction::Long => (bar.high - entry_exec) / pip,
                    Direction::Short => (entry_exec - bar.low) / pip,
                };
                if excursion >= trigger {
                    state = state.move_to_breakeven(entry_exec);
                }
            }
        }
    }

    SimulationOutcome::OpenAtEnd
}
