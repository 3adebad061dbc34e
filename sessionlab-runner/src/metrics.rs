//! Performance statistics, in R multiples.
//!
//! Every metric is a pure function over a trade list ordered by entry time.
//! No dependencies on the runner, loaders or simulator.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sessionlab_core::TradeResult;

use crate::runner::BacktestResult;

/// Cap for profit factor when there are no losing trades.
pub const PROFIT_FACTOR_CAP: f64 = 100.0;

/// Aggregate statistics for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    pub trades: usize,
    pub net_r: f64,
    pub profit_factor: f64,
    /// Largest dip of the cumulative R curve below its running peak (<= 0).
    pub max_drawdown_r: f64,
    /// Percentage of trades with positive R.
    pub win_rate_pct: f64,
    pub avg_r: f64,
    pub max_consecutive_losses: usize,
    pub missing_bias_pct: f64,
    pub missing_sentiment_pct: f64,
}

/// Count / sum / mean of R for one group (an instrument or a month).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupStats {
    pub key: String,
    pub count: usize,
    pub sum_r: f64,
    pub mean_r: f64,
}

impl StatsSummary {
    /// Compute all statistics for a finished run.
    pub fn compute(result: &BacktestResult) -> Self {
        let trades = sorted_by_entry(&result.trades);
        let r = r_values(&trades);
        Self {
            trades: r.len(),
            net_r: r.iter().sum(),
            profit_factor: profit_factor(&r),
            max_drawdown_r: max_drawdown_r(&r),
            win_rate_pct: win_rate_pct(&r),
            avg_r: mean(&r),
            max_consecutive_losses: max_consecutive_losses(&r),
            missing_bias_pct: pct(result.missing_cot_days, result.pair_days),
            missing_sentiment_pct: pct(result.missing_sentiment_days, result.pair_days),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Trades in entry-time order (ties keep their original order).
pub fn sorted_by_entry(trades: &[TradeResult]) -> Vec<&TradeResult> {
    let mut sorted: Vec<&TradeResult> = trades.iter().collect();
    sorted.sort_by_key(|t| t.entry_time);
    sorted
}

pub fn r_values(trades: &[&TradeResult]) -> Vec<f64> {
    trades.iter().map(|t| t.pnl_r).collect()
}

/// Gross winning R over gross losing R.
///
/// Capped at `PROFIT_FACTOR_CAP` when nothing lost; 0.0 with no winners either.
pub fn profit_factor(r: &[f64]) -> f64 {
    let gross_win: f64 = r.iter().filter(|v| **v > 0.0).sum();
    let gross_loss: f64 = r.iter().filter(|v| **v < 0.0).map(|v| v.abs()).sum();
    if gross_loss < 1e-12 {
        return if gross_win > 0.0 { PROFIT_FACTOR_CAP } else { 0.0 };
    }
    (gross_win / gross_loss).min(PROFIT_FACTOR_CAP)
}

/// Minimum of (cumulative R − running max of cumulative R).
pub fn max_drawdown_r(r: &[f64]) -> f64 {
    let mut equity = 0.0;
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd = 0.0_f64;
    for v in r {
        equity += v;
        peak = peak.max(equity);
        max_dd = max_dd.min(equity - peak);
    }
    max_dd
}

pub fn win_rate_pct(r: &[f64]) -> f64 {
    if r.is_empty() {
        return 0.0;
    }
    r.iter().filter(|v| **v > 0.0).count() as f64 / r.len() as f64 * 100.0
}

/// Longest run of trades with negative R. Flat trades break a streak.
pub fn max_consecutive_losses(r: &[f64]) -> usize {
    let mut max_streak = 0;
    let mut current = 0;
    for v in r {
        if *v < 0.0 {
            current += 1;
            max_streak = max_streak.max(current);
        } else {
            current = 0;
        }
    }
    max_streak
}

/// R grouped by instrument, in symbol order.
pub fn by_instrument(trades: &[TradeResult]) -> Vec<GroupStats> {
    group_by(trades, |t| t.instrument.clone())
}

/// R grouped by entry month (`YYYY-MM`, UTC), in calendar order.
pub fn by_month(trades: &[TradeResult]) -> Vec<GroupStats> {
    group_by(trades, |t| t.entry_time.format("%Y-%m").to_string())
}

// ─── Helpers ────────────────────────────────────────────────────────

fn group_by(trades: &[TradeResult], key: impl Fn(&TradeResult) -> String) -> Vec<GroupStats> {
    let mut groups: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for t in trades {
        groups.entry(key(t)).or_default().push(t.pnl_r);
    }
    groups
        .into_iter()
        .map(|(key, r)| GroupStats {
            key,
            count: r.len(),
            sum_r: r.iter().sum(),
            mean_r: mean(&r),
        })
        .collect()
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
