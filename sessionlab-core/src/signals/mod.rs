//! Signal detection: entry models that scan a session window for a setup.
//!
//! Detectors are pure functions of the bars they are given. They never look
//! at positions or results, and they trust the caller to have bounded the
//! window to the active entry session.
//!
//! # Invariants
//! - the triggering bar (sweep, pullback, band touch) comes strictly before
//!   the confirmation bar
//! - `confirm_index` is an absolute index into the instrument's bar series
//! - `sweep_high` / `sweep_low` span the trigger bar through confirmation

pub mod adr_pullback;
pub mod bollinger;
pub mod sweep;

pub use adr_pullback::AdrPullbackDetector;
pub use bollinger::BollingerDetector;
pub use sweep::{Confirmation, SweepDetector};

use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{extremes, Bar, Direction};
use crate::indicators::BandSeries;
use crate::session::SessionRef;

/// A completed setup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: Direction,
    pub sweep_time: DateTime<Utc>,
    pub sweep_high: f64,
    pub sweep_low: f64,
    pub confirm_time: DateTime<Utc>,
    pub confirm_index: usize,
    /// Model-supplied take-profit level (Bollinger: opposite band).
    pub target_price: Option<f64>,
}

/// A bounded view into an instrument's bar series.
///
/// Iteration yields absolute indices so detectors can report positions the
/// simulator understands.
#[derive(Debug, Clone)]
pub struct BarWindow<'a> {
    bars: &'a [Bar],
    range: Range<usize>,
}

impl<'a> BarWindow<'a> {
    /// `range` is clamped to `bars`.
    pub fn new(bars: &'a [Bar], range: Range<usize>) -> Self {
        let end = range.end.min(bars.len());
        let start = range.start.min(end);
        Self {
            bars,
            range: start..end,
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.range.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn len(&self) -> usize {
        self.range.len()
    }

    /// `(absolute_index, bar)` pairs from `from` (absolute, clamped) to the
    /// end of the window.
    pub fn iter_from(&self, from: usize) -> impl Iterator<Item = (usize, &'a Bar)> + '_ {
        let start = from.max(self.range.start).min(self.range.end);
        let bars = self.bars;
        (start..self.range.end).map(move |i| (i, &bars[i]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &'a Bar)> + '_ {
        self.iter_from(self.range.start)
    }

    /// Bars inside the window in `[from, to]` (absolute, inclusive).
    pub fn span(&self, from: usize, to: usize) -> &'a [Bar] {
        let start = from.max(self.range.start);
        let end = (to + 1).min(self.range.end);
        if start >= end {
            return &[];
        }
        &self.bars[start..end]
    }

    /// First bar at or after `from` matching `pred`.
    pub fn find_from<F>(&self, from: usize, mut pred: F) -> Option<(usize, &'a Bar)>
    where
        F: FnMut(usize, &Bar) -> bool,
    {
        self.iter_from(from).find(|(i, b)| pred(*i, b))
    }

    /// Assemble a signal, taking extremes over `trigger..=confirm`.
    pub(crate) fn signal(
        &self,
        direction: Direction,
        trigger: usize,
        confirm: usize,
        target_price: Option<f64>,
    ) -> Option<Signal> {
        let (sweep_high, sweep_low) = extremes(self.span(trigger, confirm))?;
        Some(Signal {
            direction,
            sweep_time: self.bars[trigger].time,
            sweep_high,
            sweep_low,
            confirm_time: self.bars[confirm].time,
            confirm_index: confirm,
            target_price,
        })
    }
}

/// Everything a detector may read besides the bars themselves.
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    pub session_ref: &'a SessionRef,
    pub pip_size: f64,
    pub entry_start: DateTime<Utc>,
    /// Average daily range (price units), when the model needs it.
    pub adr: Option<f64>,
    /// Bollinger bands covering the detection window, when the model needs them.
    pub bands: Option<&'a BandSeries>,
}

/// Common contract for all entry models.
pub trait SignalModel: Send + Sync {
    fn name(&self) -> &str;

    /// Scan `window` for a setup in `direction`.
    fn detect(
        &self,
        window: &BarWindow<'_>,
        ctx: &DetectionContext<'_>,
        direction: Direction,
    ) -> Option<Signal>;
}

/// Entry model selector, as named in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryModelKind {
    Sweep,
    AdrPullback,
    Bollinger,
}

impl EntryModelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryModelKind::Sweep => "sweep",
            EntryModelKind::AdrPullback => "adr_pullback",
            EntryModelKind::Bollinger => "bollinger",
        }
    }
}

/// One configured entry model. Dispatches to the concrete detector.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryModel {
    Sweep(SweepDetector),
    AdrPullback(AdrPullbackDetector),
    Bollinger(BollingerDetector),
}

impl EntryModel {
    pub fn kind(&self) -> EntryModelKind {
        match self {
            EntryModel::Sweep(_) => EntryModelKind::Sweep,
            EntryModel::AdrPullback(_) => EntryModelKind::AdrPullback,
            EntryModel::Bollinger(_) => EntryModelKind::Bollinger,
        }
    }

    fn inner(&self) -> &dyn SignalModel {
        match self {
            EntryModel::Sweep(d) => d,
            EntryModel::AdrPullback(d) => d,
            EntryModel::Bollinger(d) => d,
        }
    }
}

impl SignalModel for EntryModel {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn detect(
        &self,
        window: &BarWindow<'_>,
        ctx: &DetectionContext<'_>,
        direction: Direction,
    ) -> Option<Signal> {
        self.inner().detect(window, ctx, direction)
    }
}

/// Bars on a fixed 5-minute grid starting 2025-01-02 08:00 UTC, for tests.
#[cfg(test)]
pub(crate) fn bars_from(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Bar> {
    use chrono::{Duration, TimeZone};
    let t0 = Utc.with_ymd_and_hms(2025, 1, 2, 8, 0, 0).unwrap();
    ohlc.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| Bar {
            time: t0 + Duration::minutes(5 * i as i64),
            open,
            high,
            low,
            close,
        })
        .collect()
}
