//! Bar loading for the runner.
//!
//! Bars come from CSV files under a data root. For a symbol and timeframe
//! the first existing file among these wins:
//! 1. `{root}/{timeframe}/{symbol}.csv`
//! 2. `{root}/{symbol}/{timeframe}.csv`
//! 3. `{root}/{symbol}_{timeframe}.csv`
//!
//! The time column is the first of `time`, `timestamp`, `date`, `datetime`
//! (case-insensitive). Numeric timestamps are epoch values whose unit is
//! inferred from the column's magnitude; text timestamps are RFC 3339 or
//! `YYYY-MM-DD HH:MM[:SS]` in UTC.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use sessionlab_core::{Bar, BarSeries};

/// Errors from the data loading layer.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("csv error in {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("json error in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} has no {column} column")]
    MissingColumn { path: PathBuf, column: &'static str },

    #[error("{path} row {row}: cannot parse timestamp '{value}'")]
    BadTimestamp { path: PathBuf, row: usize, value: String },

    #[error("{path} row {row}: cannot parse {column} value '{value}'")]
    BadValue {
        path: PathBuf,
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("no bar file for {symbol} {timeframe}; searched {searched:?}")]
    NoBarFile {
        symbol: String,
        timeframe: String,
        searched: Vec<PathBuf>,
    },
}

/// Bars for one instrument.
#[derive(Debug, Clone)]
pub struct InstrumentBars {
    pub symbol: String,
    pub series: BarSeries,
}

/// Candidate bar file paths, in lookup order.
pub fn bar_file_candidates(root: &Path, symbol: &str, timeframe: &str) -> Vec<PathBuf> {
    vec![
        root.join(timeframe).join(format!("{symbol}.csv")),
        root.join(symbol).join(format!("{timeframe}.csv")),
        root.join(format!("{symbol}_{timeframe}.csv")),
    ]
}

pub fn find_bar_file(root: &Path, symbol: &str, timeframe: &str) -> Result<PathBuf, LoadError> {
    let searched = bar_file_candidates(root, symbol, timeframe);
    searched
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| LoadError::NoBarFile {
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            searched,
        })
}

/// Load every symbol in `symbols`. Symbols without a bar file are skipped
/// with a warning; malformed files are errors.
pub fn load_universe(
    root: &Path,
    symbols: &[String],
    timeframe: &str,
) -> Result<Vec<InstrumentBars>, LoadError> {
    let mut out = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let path = match find_bar_file(root, symbol, timeframe) {
            Ok(p) => p,
            Err(LoadError::NoBarFile { searched, .. }) => {
                warn!(symbol = %symbol, searched = ?searched, "no bar file, skipping instrument");
                continue;
            }
            Err(e) => return Err(e),
        };
        let bars = read_bars_csv(&path)?;
        info!(symbol = %symbol, path = %path.display(), bars = bars.len(), "loaded bars");
        out.push(InstrumentBars {
            symbol: symbol.clone(),
            series: BarSeries::new(bars),
        });
    }
    Ok(out)
}

/// Read OHLC bars from a CSV file. Insane rows (high < low, non-positive
/// prices) are dropped with a warning.
pub fn read_bars_csv(path: &Path) -> Result<Vec<Bar>, LoadError> {
    let csv_err = |source| LoadError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(csv_err)?;

    let headers: Vec<String> = reader
        .headers()
        .map_err(csv_err)?
        .iter()
        .map(|h| h.to_ascii_lowercase())
        .collect();
    let column = |names: &[&str], label: &'static str| {
        names
            .iter()
            .find_map(|n| headers.iter().position(|h| h == n))
            .ok_or(LoadError::MissingColumn {
                path: path.to_path_buf(),
                column: label,
            })
    };
    let time_col = column(&["time", "timestamp", "date", "datetime"], "time")?;
    let open_col = column(&["open"], "open")?;
    let high_col = column(&["high"], "high")?;
    let low_col = column(&["low"], "low")?;
    let close_col = column(&["close"], "close")?;

    let mut raw_times = Vec::new();
    let mut prices = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(csv_err)?;
        let row = i + 2; // 1-based, after the header
        let field = |idx: usize| record.get(idx).unwrap_or("");
        let price = |idx: usize, label: &'static str| {
            field(idx).parse::<f64>().map_err(|_| LoadError::BadValue {
                path: path.to_path_buf(),
                row,
                column: label,
                value: field(idx).to_string(),
            })
        };
        raw_times.push((row, field(time_col).to_string()));
        prices.push((
            price(open_col, "open")?,
            price(high_col, "high")?,
            price(low_col, "low")?,
            price(close_col, "close")?,
        ));
    }

    let times = parse_time_column(path, &raw_times)?;
    let mut bars = Vec::with_capacity(times.len());
    let mut dropped = 0usize;
    for (time, (open, high, low, close)) in times.into_iter().zip(prices) {
        let bar = Bar { time, open, high, low, close };
        if bar.is_sane() {
            bars.push(bar);
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        warn!(path = %path.display(), dropped, "dropped malformed bars");
    }
    bars.sort_by_key(|b| b.time);
    Ok(bars)
}

/// Epoch unit inferred from the largest value in the column.
fn epoch_to_utc(value: i64, max: i64) -> Option<DateTime<Utc>> {
    if max > 100_000_000_000_000_000 {
        Some(DateTime::from_timestamp_nanos(value))
    } else if max > 100_000_000_000_000 {
        DateTime::from_timestamp_micros(value)
    } else if max > 100_000_000_000 {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

pub(crate) fn parse_text_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_time_column(path: &Path, raw: &[(usize, String)]) -> Result<Vec<DateTime<Utc>>, LoadError> {
    let bad = |row: usize, value: &str| LoadError::BadTimestamp {
        path: path.to_path_buf(),
        row,
        value: value.to_string(),
    };

    let numeric: Option<Vec<i64>> = raw.iter().map(|(_, v)| v.parse::<i64>().ok()).collect();
    match numeric {
        Some(values) if !values.is_empty() => {
            let max = values.iter().copied().max().unwrap_or(0);
            values
                .iter()
                .zip(raw)
                .map(|(v, (row, text))| epoch_to_utc(*v, max).ok_or_else(|| bad(*row, text)))
                .collect()
        }
        _ => raw
            .iter()
            .map(|(row, text)| parse_text_time(text).ok_or_else(|| bad(*row, text)))
            .collect(),
    }
}
