//! BarSeries: a time-ordered bar array with binary-search window queries.
//!
//! Window lookups return index ranges into the full array so detectors can
//! report absolute bar indices, and the simulator can keep walking past the
//! end of the window that produced the signal.

use std::ops::Range;

use chrono::{DateTime, TimeZone, Utc};

use super::bar::Bar;

/// Per-instrument bar sequence, strictly increasing in time.
#[derive(Debug, Clone, Default)]
pub struct BarSeries {
    bars: Vec<Bar>,
}

impl BarSeries {
    /// Build a series, sorting by time and dropping duplicate timestamps
    /// (first occurrence wins).
    pub fn new(mut bars: Vec<Bar>) -> Self {
        bars.sort_by_key(|b| b.time);
        bars.dedup_by_key(|b| b.time);
        Self { bars }
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Bar> {
        self.bars.get(index)
    }

    /// Indices of bars with `start <= time <= end` (both ends inclusive).
    ///
    /// Equivalent to `searchsorted(start, left)..searchsorted(end, right)`.
    pub fn range_inclusive<Tz: TimeZone>(
        &self,
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
    ) -> Range<usize> {
        let start = start.with_timezone(&Utc);
        let end = end.with_timezone(&Utc);
        let lo = self.bars.partition_point(|b| b.time < start);
        let hi = self.bars.partition_point(|b| b.time <= end);
        lo..hi.max(lo)
    }

    /// Indices of bars with `start <= time < end` (half-open).
    pub fn range_half_open<Tz: TimeZone>(
        &self,
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
    ) -> Range<usize> {
        let start = start.with_timezone(&Utc);
        let end = end.with_timezone(&Utc);
        let lo = self.bars.partition_point(|b| b.time < start);
        let hi = self.bars.partition_point(|b| b.time < end);
        lo..hi.max(lo)
    }

    /// Highest high and lowest low over a range, or `None` if it is empty.
    pub fn extremes(&self, range: Range<usize>) -> Option<(f64, f64)> {
        extremes(&self.bars[range])
    }
}

/// Highest high and lowest low of a bar slice, or `None` if it is empty.
pub fn extremes(bars: &[Bar]) -> Option<(f64, f64)> {
    let first = bars.first()?;
    let init = (first.high, first.low);
    Some(bars.iter().fold(init, |(hi, lo), b| (hi.max(b.high), lo.min(b.low))))
}
