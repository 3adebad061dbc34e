//! BiasStore: as-of lookups for directional bias and crowd sentiment.
//!
//! Records are grouped per instrument and sorted once at construction, so
//! every lookup is a binary search for the latest record at or before the
//! query point. The store is immutable after construction.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::domain::Direction;

/// Directional bias published for one instrument on one report date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiasRecord {
    pub instrument: String,
    pub direction: Direction,
    pub report_date: NaiveDate,
}

/// Crowd positioning snapshot (percent of traders long / short).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentRecord {
    pub instrument: String,
    pub timestamp: DateTime<Utc>,
    pub long_pct: f64,
    pub short_pct: f64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BiasError {
    #[error(
        "conflicting bias for {instrument} on {report_date}: {first} vs {second}"
    )]
    ConflictingBias {
        instrument: String,
        report_date: NaiveDate,
        first: Direction,
        second: Direction,
    },
}

/// Pre-sorted per-instrument bias and sentiment sequences.
#[derive(Debug, Clone, Default)]
pub struct BiasStore {
    bias: BTreeMap<String, Vec<(NaiveDate, Direction)>>,
    sentiment: BTreeMap<String, Vec<SentimentRecord>>,
}

impl BiasStore {
    /// Build a store from records gathered across any number of sources.
    ///
    /// Identical bias records (same instrument, date and direction) are
    /// collapsed. Two records for the same instrument and date that disagree
    /// are rejected: there is no precedence between sources. Instruments are
    /// checked in symbol order, so the first conflict reported is stable.
    /// Sentiment snapshots sharing an instrument and timestamp keep the last
    /// one given.
    pub fn new(
        bias: impl IntoIterator<Item = BiasRecord>,
        sentiment: impl IntoIterator<Item = SentimentRecord>,
    ) -> Result<Self, BiasError> {
        let mut by_instrument: BTreeMap<String, Vec<(NaiveDate, Direction)>> = BTreeMap::new();
        for rec in bias {
            by_instrument
                .entry(rec.instrument)
                .or_default()
                .push((rec.report_date, rec.direction));
        }

        for (instrument, records) in by_instrument.iter_mut() {
            records.sort();
            let before = records.len();
            records.dedup();
            if records.len() != before {
                debug!(
                    instrument = %instrument,
                    collapsed = before - records.len(),
                    "collapsed duplicate bias records"
                );
            }
            if let Some(pair) = records.windows(2).find(|w| w[0].0 == w[1].0) {
                return Err(BiasError::ConflictingBias {
                    instrument: instrument.clone(),
                    report_date: pair[0].0,
                    first: pair[0].1,
                    second: pair[1].1,
                });
            }
        }

        let mut by_symbol: BTreeMap<String, Vec<SentimentRecord>> = BTreeMap::new();
        for rec in sentiment {
            by_symbol.entry(rec.instrument.clone()).or_default().push(rec);
        }
        for records in by_symbol.values_mut() {
            // Stable sort keeps load order among equal timestamps; the
            // reverse/dedup/reverse pass then keeps the last loaded.
            records.sort_by_key(|r| r.timestamp);
            records.reverse();
            records.dedup_by_key(|r| r.timestamp);
            records.reverse();
        }

        Ok(Self {
            bias: by_instrument,
            sentiment: by_symbol,
        })
    }

    /// A store with no records. Every lookup returns `None`.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Direction of the latest report dated on or before `date`.
    pub fn cot_direction_on(&self, instrument: &str, date: NaiveDate) -> Option<Direction> {
        let records = self.bias.get(instrument)?;
        let idx = records.partition_point(|(d, _)| *d <= date);
        idx.checked_sub(1).map(|i| records[i].1)
    }

    /// Latest sentiment snapshot at or before `timestamp`.
    pub fn sentiment_at(
        &self,
        instrument: &str,
        timestamp: DateTime<Utc>,
    ) -> Option<&SentimentRecord> {
        let records = self.sentiment.get(instrument)?;
        let idx = records.partition_point(|r| r.timestamp <= timestamp);
        idx.checked_sub(1).map(|i| &records[i])
    }

    pub fn bias_record_count(&self) -> usize {
        self.bias.values().map(Vec::len).sum()
    }

    pub fn sentiment_record_count(&self) -> usize {
        self.sentiment.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bias.is_empty() && self.sentiment.is_empty()
    }
}
