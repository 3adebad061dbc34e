//! Loaders for directional bias reports and crowd sentiment snapshots.
//!
//! Bias reports are JSON documents of the form
//! `{"report_date": "2025-01-07", "pairs": {"EURUSD": {"direction": "LONG"}}}`,
//! read from every `*.json` file of a directory (in file name order) and
//! from an optional single file. Sentiment files are JSON arrays of
//! `{"symbol", "timestamp_utc", "agg_long_pct" | "long_pct", ...}` objects.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use sessionlab_core::{BiasError, BiasRecord, BiasStore, Direction, SentimentRecord};

use crate::data_loader::{parse_text_time, LoadError};

#[derive(Debug, Deserialize)]
struct BiasReport {
    report_date: String,
    #[serde(default)]
    pairs: std::collections::BTreeMap<String, PairEntry>,
}

#[derive(Debug, Deserialize)]
struct PairEntry {
    direction: Option<String>,
}

/// Where bias and sentiment data live. Missing paths are treated as empty.
#[derive(Debug, Clone, Default)]
pub struct BiasSources {
    pub report_dir: Option<PathBuf>,
    pub report_file: Option<PathBuf>,
    pub sentiment_files: Vec<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum BiasLoadError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Store(#[from] BiasError),
}

/// Load all sources and build the lookup store.
pub fn build_bias_store(sources: &BiasSources) -> Result<BiasStore, BiasLoadError> {
    let bias = load_bias_reports(sources.report_dir.as_deref(), sources.report_file.as_deref())?;
    let sentiment = load_sentiment(&sources.sentiment_files)?;
    info!(
        bias_records = bias.len(),
        sentiment_records = sentiment.len(),
        "loaded bias data"
    );
    Ok(BiasStore::new(bias, sentiment)?)
}

fn read_text(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Bias records from a report directory and/or a single report file.
pub fn load_bias_reports(
    dir: Option<&Path>,
    file: Option<&Path>,
) -> Result<Vec<BiasRecord>, LoadError> {
    let mut paths = Vec::new();
    if let Some(dir) = dir.filter(|d| d.is_dir()) {
        let entries = fs::read_dir(dir).map_err(|source| LoadError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut found: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        found.sort();
        paths.extend(found);
    }
    if let Some(file) = file.filter(|f| f.is_file()) {
        paths.push(file.to_path_buf());
    }

    let mut records = Vec::new();
    for path in paths {
        let report: BiasReport =
            serde_json::from_str(&read_text(&path)?).map_err(|source| LoadError::Json {
                path: path.clone(),
                source,
            })?;
        let report_date = parse_report_date(&report.report_date).ok_or_else(|| {
            LoadError::BadTimestamp {
                path: path.clone(),
                row: 0,
                value: report.report_date.clone(),
            }
        })?;
        for (instrument, entry) in report.pairs {
            let Some(raw) = entry.direction else { continue };
            match raw.parse::<Direction>() {
                Ok(direction) => records.push(BiasRecord {
                    instrument,
                    direction,
                    report_date,
                }),
                Err(_) => debug!(%instrument, direction = %raw, "ignoring non-directional bias"),
            }
        }
    }
    Ok(records)
}

/// Accepts a bare date or any timestamp whose first ten characters are one.
fn parse_report_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Sentiment snapshots from JSON array files. Unreadable or malformed files
/// are skipped with a warning, as are entries without symbol or timestamp.
pub fn load_sentiment(files: &[PathBuf]) -> Result<Vec<SentimentRecord>, LoadError> {
    let mut records = Vec::new();
    for path in files.iter().filter(|p| p.is_file()) {
        let items: Vec<Value> = match serde_json::from_str(&read_text(path)?) {
            Ok(items) => items,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unparseable sentiment file");
                continue;
            }
        };
        let before = records.len();
        records.extend(items.iter().filter_map(sentiment_from_value));
        debug!(path = %path.display(), records = records.len() - before, "read sentiment file");
    }
    Ok(records)
}

fn sentiment_from_value(item: &Value) -> Option<SentimentRecord> {
    let instrument = item.get("symbol")?.as_str().filter(|s| !s.is_empty())?;
    let timestamp = item
        .get("timestamp_utc")?
        .as_str()
        .filter(|s| !s.is_empty())
        .and_then(parse_text_time)?;
    Some(SentimentRecord {
        instrument: instrument.to_string(),
        timestamp,
        long_pct: first_nonzero(item, &["agg_long_pct", "long_pct"]),
        short_pct: first_nonzero(item, &["agg_short_pct", "short_pct"]),
    })
}

/// First key holding a non-zero number, else 0.
fn first_nonzero(item: &Value, keys: &[&str]) -> f64 {
    keys.iter()
        .filter_map(|k| item.get(*k).and_then(Value::as_f64))
        .find(|v| *v != 0.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn write(path: &Path, body: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }

    #[test]
    fn reads_report_dir_and_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let reports = dir.path().join("cot");
        write(
            &reports.join("2025-01-07.json"),
            r#"{"report_date": "2025-01-07", "pairs": {"EURUSD": {"direction": "LONG"}, "GBPUSD": {}}}"#,
        );
        write(
            &reports.join("2025-01-14.json"),
            r#"{"report_date": "2025-01-14T00:00:00", "pairs": {"EURUSD": {"direction": "SHORT"}, "AUDUSD": {"direction": "NEUTRAL"}}}"#,
        );
        write(&reports.join("notes.txt"), "ignored");
        let latest = dir.path().join("latest.json");
        write(
            &latest,
            r#"{"report_date": "2025-01-21", "pairs": {"USDJPY": {"direction": "short"}}}"#,
        );

        let records = load_bias_reports(Some(&reports), Some(&latest)).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].instrument, "EURUSD");
        assert_eq!(records[1].direction, Direction::Short);
        assert_eq!(records[2].report_date, NaiveDate::from_ymd_opt(2025, 1, 21).unwrap());
    }

    #[test]
    fn missing_paths_are_empty() {
        let dir = tempfile::tempdir().unwrap();
        let nowhere = dir.path().join("nope");
        assert!(load_bias_reports(Some(&nowhere), Some(&nowhere)).unwrap().is_empty());
        assert!(load_sentiment(&[nowhere]).unwrap().is_empty());
    }

    #[test]
    fn malformed_report_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.json");
        write(&file, "{not json");
        assert!(matches!(
            load_bias_reports(None, Some(&file)),
            Err(LoadError::Json { .. })
        ));
    }

    #[test]
    fn sentiment_fields_and_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let agg = dir.path().join("aggregates.json");
        write(
            &agg,
            r#"[
                {"symbol": "EURUSD", "timestamp_utc": "2025-01-02T07:00:00Z", "agg_long_pct": 72.5, "agg_short_pct": 27.5},
                {"symbol": "EURUSD", "timestamp_utc": "2025-01-02T08:00:00Z", "agg_long_pct": 0, "long_pct": 60, "short_pct": 40},
                {"symbol": "", "timestamp_utc": "2025-01-02T08:00:00Z"},
                {"symbol": "GBPUSD"}
            ]"#,
        );
        let broken = dir.path().join("snapshots.json");
        write(&broken, "[{");

        let records = load_sentiment(&[agg, broken]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].long_pct, 72.5);
        assert_eq!(records[1].long_pct, 60.0);
        assert_eq!(records[1].short_pct, 40.0);
        assert_eq!(records[1].timestamp, Utc.with_ymd_and_hms(2025, 1, 2, 8, 0, 0).unwrap());
    }

    #[test]
    fn build_store_rejects_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("reports/a.json");
        let b = dir.path().join("reports/b.json");
        write(&a, r#"{"report_date": "2025-01-07", "pairs": {"EURUSD": {"direction": "LONG"}}}"#);
        write(&b, r#"{"report_date": "2025-01-07", "pairs": {"EURUSD": {"direction": "SHORT"}}}"#);
        let sources = BiasSources {
            report_dir: Some(dir.path().join("reports")),
            ..BiasSources::default()
        };
        assert!(matches!(
            build_bias_store(&sources),
            Err(BiasLoadError::Store(BiasError::ConflictingBias { .. }))
        ));
    }
}
