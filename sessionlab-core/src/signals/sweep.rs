//! Sweep-and-reclaim: a liquidity grab beyond the reference range, a close
//! back inside it, then a confirming candle.
//!
//! Sequence (short shown; long mirrors it around `ref_low`):
//! 1. sweep bar: first bar with `high >= ref_high + buffer`
//! 2. retest bar: first later bar with `close < ref_high`
//! 3. confirmation: first bar after the retest passing the configured rule

use serde::{Deserialize, Serialize};

use super::{BarWindow, DetectionContext, Signal, SignalModel};
use crate::domain::{Bar, Direction};

/// Confirmation rule applied after the retest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confirmation {
    /// Large body in the trade direction, closing near the extreme.
    Displacement,
    /// Close beyond the recent swing extreme.
    Structure,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepDetector {
    pub buffer_pips: f64,
    pub min_body_pips: f64,
    /// Close must sit within this fraction of the range from the extreme.
    pub close_pct: f64,
    pub confirmation: Confirmation,
    /// Bars considered for the structure-break swing extreme.
    pub lookback: usize,
}

impl SweepDetector {
    fn is_displacement(&self, bar: &Bar, direction: Direction, pip_size: f64) -> bool {
        let body = direction.sign() * bar.body();
        let range = bar.range();
        if body <= 0.0 || range <= 0.0 || body < self.min_body_pips * pip_size {
            return false;
        }
        match direction {
            Direction::Short => bar.close <= bar.low + range * self.close_pct,
            Direction::Long => bar.close >= bar.high - range * self.close_pct,
        }
    }

    /// Close beyond the extreme of up to `lookback` window bars strictly
    /// before `index`.
    fn is_structure_break(&self, window: &BarWindow<'_>, index: usize, bar: &Bar, direction: Direction) -> bool {
        if self.lookback == 0 || index == 0 {
            return false;
        }
        let from = index.saturating_sub(self.lookback);
        let prior = window.span(from, index - 1);
        if prior.is_empty() {
            return false;
        }
        match direction {
            Direction::Short => {
                let swing_low = prior.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
                bar.close < swing_low
            }
            Direction::Long => {
                let swing_high = prior.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
                bar.close > swing_high
            }
        }
    }
}

impl SignalModel for SweepDetector {
    fn name(&self) -> &str {
        "sweep"
    }

    fn detect(
        &self,
        window: &BarWindow<'_>,
        ctx: &DetectionContext<'_>,
        direction: Direction,
    ) -> Option<Signal> {
        let buffer = self.buffer_pips * ctx.pip_size;
        let reference = ctx.session_ref;

        let (sweep_idx, _) = window.find_from(window.range().start, |_, b| match direction {
            Direction::Short => b.high >= reference.ref_high + buffer,
            Direction::Long => b.low <= reference.ref_low - buffer,
        })?;

        let (retest_idx, _) = window.find_from(sweep_idx + 1, |_, b| match direction {
            Direction::Short => b.close < reference.ref_high,
            Direction::Long => b.close > reference.ref_low,
        })?;

        let (confirm_idx, _) = window.find_from(retest_idx + 1, |i, b| match self.confirmation {
            Confirmation::Displacement => self.is_displacement(b, direction, ctx.pip_size),
            Confirmation::Structure => self.is_structure_break(window, i, b, direction),
        })?;

        window.signal(direction, sweep_idx, confirm_idx, None)
    }
}
