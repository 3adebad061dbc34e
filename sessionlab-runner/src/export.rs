//! Reporting and export: JSON, CSV, and Markdown artifacts for one run.
//!
//! A run directory holds:
//! - `trades.csv`: one row per closed trade, in entry-time order
//! - `summary.json`: run id, counters, skip tally, statistics, groupings
//! - `summary_report.md`: the same, human-readable, plus assumptions
//! - `manifest.json`: the full `BacktestResult`, for reloading
//!
//! `summary.json` carries a `schema_version`; newer versions are rejected
//! on load.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sessionlab_core::TradeResult;

use crate::config::BacktestConfig;
use crate::data_loader::InstrumentBars;
use crate::metrics::{by_instrument, by_month, sorted_by_entry, GroupStats, StatsSummary};
use crate::runner::{BacktestResult, SkipReason};
use crate::scenarios::ScenarioOutcome;

/// Current schema version for `summary.json`.
pub const SCHEMA_VERSION: u32 = 1;

/// Bars available per instrument over the loaded data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coverage {
    pub instrument: String,
    pub bars: usize,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub trades: usize,
}

/// Everything `summary.json` and `summary_report.md` report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub run_id: String,
    pub start: chrono::NaiveDate,
    pub end: chrono::NaiveDate,
    pub pair_days: usize,
    pub missing_cot_days: usize,
    pub missing_sentiment_days: usize,
    pub skips: BTreeMap<SkipReason, usize>,
    pub overall: StatsSummary,
    pub by_instrument: Vec<GroupStats>,
    pub by_month: Vec<GroupStats>,
    pub coverage: Vec<Coverage>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioOutcome>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl RunSummary {
    pub fn build(
        result: &BacktestResult,
        universe: &[InstrumentBars],
        scenarios: Vec<ScenarioOutcome>,
    ) -> Self {
        let coverage = universe
            .iter()
            .map(|inst| Coverage {
                instrument: inst.symbol.clone(),
                bars: inst.series.len(),
                first: inst.series.bars().first().map(|b| b.time),
                last: inst.series.bars().last().map(|b| b.time),
                trades: result
                    .trades
                    .iter()
                    .filter(|t| t.instrument == inst.symbol)
                    .count(),
            })
            .collect();
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: result.run_id.clone(),
            start: result.start,
            end: result.end,
            pair_days: result.pair_days,
            missing_cot_days: result.missing_cot_days,
            missing_sentiment_days: result.missing_sentiment_days,
            skips: result.skips.clone(),
            overall: StatsSummary::compute(result),
            by_instrument: by_instrument(&result.trades),
            by_month: by_month(&result.trades),
            coverage,
            scenarios,
        }
    }
}

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_summary_json(summary: &RunSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).context("failed to serialize run summary to JSON")
}

/// Deserialize a summary, rejecting unknown schema versions.
pub fn import_summary_json(json: &str) -> Result<RunSummary> {
    let summary: RunSummary =
        serde_json::from_str(json).context("failed to deserialize run summary from JSON")?;
    if summary.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            summary.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(summary)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Export trades as CSV, sorted by entry time.
///
/// Columns: instrument, direction, entry_time, entry_price_raw, entry_price,
/// stop_price, target_price, exit_time, exit_price_raw, exit_price,
/// pnl_pips, pnl_r, exit_reason, spread_pips, slippage_pips, ref_high, ref_low
pub fn export_trades_csv(trades: &[TradeResult]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    wtr.write_record([
        "instrument",
        "direction",
        "entry_time",
        "entry_price_raw",
        "entry_price",
        "stop_price",
        "target_price",
        "exit_time",
        "exit_price_raw",
        "exit_price",
        "pnl_pips",
        "pnl_r",
        "exit_reason",
        "spread_pips",
        "slippage_pips",
        "ref_high",
        "ref_low",
    ])?;

    for t in sorted_by_entry(trades) {
        wtr.write_record([
            t.instrument.clone(),
            t.direction.to_string(),
            t.entry_time.to_rfc3339(),
            format!("{:.6}", t.entry_price_raw),
            format!("{:.6}", t.entry_price),
            format!("{:.6}", t.stop_price),
            format!("{:.6}", t.target_price),
            t.exit_time.to_rfc3339(),
            format!("{:.6}", t.exit_price_raw),
            format!("{:.6}", t.exit_price),
            format!("{:.2}", t.pnl_pips),
            format!("{:.4}", t.pnl_r),
            t.exit_reason.as_str().to_string(),
            format!("{:.2}", t.spread_pips),
            format!("{:.2}", t.slippage_pips),
            format!("{:.6}", t.ref_high),
            format!("{:.6}", t.ref_low),
        ])?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write the full artifact set into `output_dir`, creating it if needed.
pub fn save_artifacts(
    result: &BacktestResult,
    summary: &RunSummary,
    config: &BacktestConfig,
    output_dir: &Path,
) -> Result<()> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output dir: {}", output_dir.display()))?;

    let write = |name: &str, body: &str| {
        let path = output_dir.join(name);
        std::fs::write(&path, body).with_context(|| format!("failed to write {}", path.display()))
    };
    write("trades.csv", &export_trades_csv(&result.trades)?)?;
    write("summary.json", &export_summary_json(summary)?)?;
    write("summary_report.md", &generate_report(summary, config))?;
    write(
        "manifest.json",
        &serde_json::to_string_pretty(result).context("failed to serialize BacktestResult")?,
    )?;
    Ok(())
}

/// Load the `BacktestResult` from an artifact directory's manifest.json.
pub fn load_manifest(dir: &Path) -> Result<BacktestResult> {
    let path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("failed to parse {}", path.display()))
}

// ─── Markdown report ────────────────────────────────────────────────

/// Generate the Markdown report for one run.
pub fn generate_report(summary: &RunSummary, config: &BacktestConfig) -> String {
    let mut md = String::with_capacity(4096);
    // Writing to a String cannot fail.
    let _ = write_report(&mut md, summary, config);
    md
}

fn write_report(md: &mut String, s: &RunSummary, config: &BacktestConfig) -> std::fmt::Result {
    writeln!(md, "# Session Backtest Report\n")?;

    writeln!(md, "## Metadata\n")?;
    writeln!(md, "| Field | Value |")?;
    writeln!(md, "| --- | --- |")?;
    writeln!(md, "| Run ID | {} |", s.run_id)?;
    writeln!(md, "| Period | {} to {} |", s.start, s.end)?;
    writeln!(md, "| Entry model | {} |", config.entry.model.as_str())?;
    writeln!(md, "| Entry session | {} |", config.entry_session)?;
    if let Some(secondary) = &config.secondary_session {
        writeln!(md, "| Secondary session | {secondary} |")?;
    }
    writeln!(md)?;

    writeln!(md, "## Assumptions\n")?;
    writeln!(
        md,
        "- Spread: default {:.2} pips ({} per-instrument overrides)",
        config.spread.default_pips,
        config.spread.per_instrument.len()
    )?;
    writeln!(md, "- Slippage: {:.2} pips per side", config.execution.slippage_pips)?;
    writeln!(
        md,
        "- Time stop: {}",
        config.time_stop_session.as_deref().unwrap_or("none")
    )?;
    writeln!(
        md,
        "- Same-bar stop/target: {}",
        if config.execution.conservative_tie_break { "stop first" } else { "target first" }
    )?;
    writeln!(md, "- Sentiment missing policy: {:?}", config.sentiment.missing_policy)?;
    writeln!(md)?;

    let o = &s.overall;
    writeln!(md, "## Overall Stats\n")?;
    writeln!(md, "| Metric | Value |")?;
    writeln!(md, "| --- | --- |")?;
    writeln!(md, "| Trades | {} |", o.trades)?;
    writeln!(md, "| Net R | {:.2} |", o.net_r)?;
    writeln!(md, "| Profit Factor | {:.2} |", o.profit_factor)?;
    writeln!(md, "| Max Drawdown (R) | {:.2} |", o.max_drawdown_r)?;
    writeln!(md, "| Win Rate | {:.1}% |", o.win_rate_pct)?;
    writeln!(md, "| Avg R/trade | {:.2} |", o.avg_r)?;
    writeln!(md, "| Max Consecutive Losses | {} |", o.max_consecutive_losses)?;
    writeln!(md)?;

    write_groups(md, "Stats by Instrument", "Instrument", &s.by_instrument)?;
    write_groups(md, "Stats by Month", "Month", &s.by_month)?;

    writeln!(md, "## Skipped Days\n")?;
    writeln!(md, "- Pair-days: {}", s.pair_days)?;
    writeln!(
        md,
        "- Missing bias: {} ({:.2}%)",
        s.missing_cot_days, o.missing_bias_pct
    )?;
    writeln!(
        md,
        "- Missing sentiment: {} ({:.2}%)",
        s.missing_sentiment_days, o.missing_sentiment_pct
    )?;
    if !s.skips.is_empty() {
        writeln!(md, "\n| Reason | Days |")?;
        writeln!(md, "| --- | --- |")?;
        for (reason, n) in &s.skips {
            writeln!(md, "| {} | {n} |", reason.as_str())?;
        }
    }
    writeln!(md)?;

    writeln!(md, "## Data Coverage\n")?;
    writeln!(md, "| Instrument | Bars | First | Last | Trades |")?;
    writeln!(md, "| --- | --- | --- | --- | --- |")?;
    for c in &s.coverage {
        let date = |t: Option<DateTime<Utc>>| {
            t.map(|t| t.date_naive().to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        writeln!(
            md,
            "| {} | {} | {} | {} | {} |",
            c.instrument,
            c.bars,
            date(c.first),
            date(c.last),
            c.trades
        )?;
    }
    writeln!(md)?;

    if !s.scenarios.is_empty() {
        writeln!(md, "## Spread/Slippage Sensitivity\n")?;
        writeln!(md, "| Scenario | Spread | Slippage | Trades | Net R | Profit Factor | Max DD (R) |")?;
        writeln!(md, "| --- | --- | --- | --- | --- | --- | --- |")?;
        for out in &s.scenarios {
            writeln!(
                md,
                "| {} | {:.2} | {:.2} | {} | {:.2} | {:.2} | {:.2} |",
                out.scenario.name,
                out.scenario.spread_pips,
                out.scenario.slippage_pips,
                out.stats.trades,
                out.stats.net_r,
                out.stats.profit_factor,
                out.stats.max_drawdown_r
            )?;
        }
        writeln!(md)?;
    }
    Ok(())
}

fn write_groups(md: &mut String, title: &str, label: &str, groups: &[GroupStats]) -> std::fmt::Result {
    writeln!(md, "## {title}\n")?;
    if groups.is_empty() {
        return writeln!(md, "No trades.\n");
    }
    writeln!(md, "| {label} | Trades | Sum R | Mean R |")?;
    writeln!(md, "| --- | --- | --- | --- |")?;
    for g in groups {
        writeln!(md, "| {} | {} | {:.2} | {:.2} |", g.key, g.count, g.sum_r, g.mean_r)?;
    }
    writeln!(md)
}
