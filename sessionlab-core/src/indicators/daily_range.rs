//! Daily OHLC aggregation and average daily range (ADR).
//!
//! Days are local calendar days in the session timezone. Only days with at
//! least one bar appear; weekends and holidays are simply absent.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::domain::BarSeries;
use crate::session::local_date;

/// OHLC of one local calendar day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayRange {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Absolute index of the day's first bar.
    pub first_index: usize,
}

impl DayRange {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Per-day ranges for one instrument, sorted by date.
#[derive(Debug, Clone, Default)]
pub struct DailyRanges {
    days: Vec<DayRange>,
}

impl DailyRanges {
    pub fn from_series(series: &BarSeries, tz: Tz) -> Self {
        let mut map: BTreeMap<NaiveDate, DayRange> = BTreeMap::new();
        for (i, bar) in series.bars().iter().enumerate() {
            let date = local_date(bar.time, tz);
            map.entry(date)
                .and_modify(|d| {
                    d.high = d.high.max(bar.high);
                    d.low = d.low.min(bar.low);
                    d.close = bar.close;
                })
                .or_insert(DayRange {
                    date,
                    open: bar.open,
                    high: bar.high,
                    low: bar.low,
                    close: bar.close,
                    first_index: i,
                });
        }
        Self {
            days: map.into_values().collect(),
        }
    }

    pub fn days(&self) -> &[DayRange] {
        &self.days
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DayRange> {
        self.days
            .binary_search_by_key(&date, |d| d.date)
            .ok()
            .map(|i| &self.days[i])
    }

    /// Opening price of the first bar of `date`.
    pub fn day_open(&self, date: NaiveDate) -> Option<f64> {
        self.day(date).map(|d| d.open)
    }

    /// Mean high-low range over the `lookback` most recent days strictly
    /// before `date`. `None` if fewer days are available or `lookback` is 0.
    pub fn adr_before(&self, date: NaiveDate, lookback: usize) -> Option<f64> {
        if lookback == 0 {
            return None;
        }
        let end = self.days.partition_point(|d| d.date < date);
        let start = end.checked_sub(lookback)?;
        let total: f64 = self.days[start..end].iter().map(DayRange::range).sum();
        Some(total / lookback as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Bar;
    use chrono::{TimeZone, Utc};

    fn bar(day: u32, hour: u32, high: f64, low: f64) -> Bar {
        let mid = (high + low) / 2.0;
        Bar {
            time: Utc.with_ymd_and_hms(2025, 1, day, hour, 0, 0).unwrap(),
            open: mid,
            high,
            low,
            close: mid,
        }
    }

    fn ranges() -> DailyRanges {
        let series = BarSeries::new(vec![
            bar(6, 12, 1.1010, 1.0990),
            bar(6, 15, 1.1030, 1.1000),
            bar(7, 12, 1.1020, 1.1000),
            bar(8, 12, 1.1060, 1.1000),
            bar(9, 12, 1.1005, 1.0995),
        ]);
        DailyRanges::from_series(&series, chrono_tz::UTC)
    }

    #[test]
    fn aggregates_per_local_day() {
        let r = ranges();
        assert_eq!(r.days().len(), 4);
        let d6 = r.day(NaiveDate::from_ymd_opt(2025, 1, 6).unwrap()).unwrap();
        assert_eq!(d6.high, 1.1030);
        assert_eq!(d6.low, 1.0990);
        assert_eq!(d6.open, 1.1000);
        assert_eq!(d6.first_index, 0);
    }

    #[test]
    fn adr_uses_prior_days_only() {
        let r = ranges();
        let d9 = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        // ranges: 40, 20, 60 pips -> mean 40 pips
        let adr = r.adr_before(d9, 3).unwrap();
        assert!((adr - 0.0040).abs() < 1e-12);
        let adr2 = r.adr_before(d9, 2).unwrap();
        assert!((adr2 - 0.0040).abs() < 1e-12);
    }

    #[test]
    fn adr_requires_full_lookback() {
        let r = ranges();
        let d7 = NaiveDate::from_ymd_opt(2025, 1, 7).unwrap();
        assert!(r.adr_before(d7, 2).is_none());
        assert!(r.adr_before(d7, 1).is_some());
        assert!(r.adr_before(d7, 0).is_none());
    }

    #[test]
    fn local_days_follow_timezone() {
        // 03:00 UTC on the 7th is still the 6th in Toronto.
        let series = BarSeries::new(vec![bar(6, 15, 1.1, 1.0), bar(7, 3, 1.2, 1.0)]);
        let tz: Tz = "America/Toronto".parse().unwrap();
        let r = DailyRanges::from_series(&series, tz);
        assert_eq!(r.days().len(), 1);
        assert_eq!(r.days()[0].high, 1.2);
    }
}
