//! Session calendar: resolves named local-time trading sessions to instants.
//!
//! A session is a recurring wall-clock window in a single configured timezone
//! (e.g. Asia 19:00–00:00 America/Toronto). Sessions whose end is not after
//! their start wrap into the next calendar day.
//!
//! DST handling: an ambiguous wall-clock time (fall-back hour) resolves to
//! its earliest instant; a nonexistent one (spring-forward gap) is pushed
//! forward to the first valid wall-clock time.

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{extremes, BarSeries};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalendarError {
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

/// Parse an IANA timezone name (e.g. `America/Toronto`).
pub fn parse_timezone(name: &str) -> Result<Tz, CalendarError> {
    name.parse::<Tz>()
        .map_err(|_| CalendarError::UnknownTimezone(name.to_string()))
}

/// A named recurring session in local wall-clock time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub name: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SessionWindow {
    pub fn new(name: impl Into<String>, start: NaiveTime, end: NaiveTime) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    /// True if the session spans into the next calendar day.
    pub fn wraps_midnight(&self) -> bool {
        self.end <= self.start
    }

    /// Resolve this session on `date` in `tz`.
    pub fn bounds(&self, date: NaiveDate, tz: Tz) -> SessionBounds {
        session_bounds(self.start, self.end, date, tz)
    }
}

/// Concrete start/end instants of one session occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBounds {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl SessionBounds {
    pub fn start_utc(&self) -> DateTime<Utc> {
        self.start.with_timezone(&Utc)
    }

    pub fn end_utc(&self) -> DateTime<Utc> {
        self.end.with_timezone(&Utc)
    }

    /// Inclusive on both ends, matching the window slicing used for entries.
    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start_utc() <= time && time <= self.end_utc()
    }
}

/// Combine each local time with `date` in `tz`. If the end instant is not
/// after the start, the end is rolled to the next calendar day.
pub fn session_bounds(
    start_time: NaiveTime,
    end_time: NaiveTime,
    date: NaiveDate,
    tz: Tz,
) -> SessionBounds {
    let start = resolve_local(tz, date.and_time(start_time));
    let mut end = resolve_local(tz, date.and_time(end_time));
    if end <= start {
        let next = date.succ_opt().unwrap_or(date);
        end = resolve_local(tz, next.and_time(end_time));
    }
    SessionBounds { start, end }
}

/// Local midnight of `date` to local midnight of the following day.
pub fn local_day_bounds(date: NaiveDate, tz: Tz) -> SessionBounds {
    let start = resolve_local(tz, date.and_time(NaiveTime::MIN));
    let next = date.succ_opt().unwrap_or(date);
    let end = resolve_local(tz, next.and_time(NaiveTime::MIN));
    SessionBounds { start, end }
}

/// Calendar date of an instant in `tz`.
pub fn local_date(time: DateTime<Utc>, tz: Tz) -> NaiveDate {
    time.with_timezone(&tz).date_naive()
}

fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    let mut candidate = naive;
    // DST gaps are at most a couple of hours.
    for _ in 0..8 {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => candidate += Duration::minutes(30),
        }
    }
    tz.from_utc_datetime(&naive)
}

/// Price range used as the breakout / pullback reference for one day.
///
/// For the sweep model this is the high/low of a prior session; for the
/// pullback and Bollinger models both levels are the day's opening price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionRef {
    pub ref_high: f64,
    pub ref_low: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SessionRef {
    /// High/low of the bars inside `bounds` (inclusive). `None` if empty.
    pub fn from_session(series: &BarSeries, bounds: &SessionBounds) -> Option<Self> {
        let range = series.range_inclusive(&bounds.start, &bounds.end);
        let (ref_high, ref_low) = extremes(&series.bars()[range])?;
        Some(Self {
            ref_high,
            ref_low,
            start: bounds.start_utc(),
            end: bounds.end_utc(),
        })
    }

    /// Single-price anchor (ref_high == ref_low == `price`).
    pub fn anchored(price: f64, bounds: &SessionBounds) -> Self {
        Self {
            ref_high: price,
            ref_low: price,
            start: bounds.start_utc(),
            end: bounds.end_utc(),
        }
    }
}
