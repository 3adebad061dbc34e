//! Backtest runner: the per-instrument, per-day control loop.
//!
//! Two entry points:
//! - `run_from_sources()`: loads bars and bias data from disk, then runs. Used by the CLI.
//! - `run_backtest()`: takes pre-loaded bars and a bias store. Used by scenarios and tests.
//!
//! Each instrument-day moves through: weekday filter, bias gate, reference
//! build, sentiment gate, detection (with one optional retry on the
//! secondary session), entry resolution, risk check, simulation. Any stage
//! may skip the day; skips are tallied by reason, never raised as errors.
//!
//! Instruments run in parallel on the rayon pool. Each produces its own
//! tally, and tallies are merged in universe order, so results do not
//! depend on scheduling.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{Datelike, Days, NaiveDate};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use sessionlab_core::indicators::{BandSeries, DailyRanges};
use sessionlab_core::session::local_day_bounds;
use sessionlab_core::signals::BollingerDetector;
use sessionlab_core::{
    simulate_trade, BarSeries, BarWindow, BiasStore, CostModel, DetectionContext, Direction,
    EntryModel, EntryModelKind, Instrument, SessionBounds, SessionRef, Signal, SignalModel,
    SimulationOutcome, TradeResult, TradeSetup,
};

use crate::bias_loader::{build_bias_store, BiasLoadError, BiasSources};
use crate::config::{BacktestConfig, ConfigError, EntryTiming, MissingPolicy, ResolvedConfig, RunId};
use crate::data_loader::{load_universe, InstrumentBars, LoadError};

/// Errors from the runner. Only setup can fail; simulation never does.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] LoadError),
    #[error("bias data error: {0}")]
    Bias(#[from] BiasLoadError),
    #[error("start date {start} is after end date {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },
}

/// Why an instrument-day produced no trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Day index is past `max_trade_weekday`.
    Weekday,
    MissingBias,
    EmptyReference,
    MissingSentiment,
    SentimentGate,
    NoSignal,
    /// Entry bar would lie past the end of the data.
    EntryPastData,
    EntryOutsideWindow,
    StopTooWide,
    /// Bollinger target missing or on the losing side of entry.
    InvalidTarget,
    InvalidRisk,
    NoBarsAfterEntry,
    OpenAtEnd,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Weekday => "weekday",
            SkipReason::MissingBias => "missing_bias",
            SkipReason::EmptyReference => "empty_reference",
            SkipReason::MissingSentiment => "missing_sentiment",
            SkipReason::SentimentGate => "sentiment_gate",
            SkipReason::NoSignal => "no_signal",
            SkipReason::EntryPastData => "entry_past_data",
            SkipReason::EntryOutsideWindow => "entry_outside_window",
            SkipReason::StopTooWide => "stop_too_wide",
            SkipReason::InvalidTarget => "invalid_target",
            SkipReason::InvalidRisk => "invalid_risk",
            SkipReason::NoBarsAfterEntry => "no_bars_after_entry",
            SkipReason::OpenAtEnd => "open_at_end",
        }
    }
}

/// Complete result of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub run_id: RunId,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub instruments: Vec<String>,
    pub trades: Vec<TradeResult>,
    /// Every instrument-day in the requested range, weekends included.
    pub pair_days: usize,
    pub missing_cot_days: usize,
    pub missing_sentiment_days: usize,
    pub skips: BTreeMap<SkipReason, usize>,
}

impl BacktestResult {
    pub fn skipped(&self, reason: SkipReason) -> usize {
        self.skips.get(&reason).copied().unwrap_or(0)
    }
}

/// Disk locations for a run.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub bars_dir: PathBuf,
    pub symbols: Vec<String>,
    pub bias: BiasSources,
}

/// Validate `config`, load everything from `inputs`, and run.
pub fn run_from_sources(
    config: &BacktestConfig,
    inputs: &RunInputs,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<BacktestResult, RunError> {
    if start > end {
        return Err(RunError::InvalidDateRange { start, end });
    }
    let resolved = config.validate()?;
    let universe = load_universe(&inputs.bars_dir, &inputs.symbols, &config.timeframe)?;
    let store = build_bias_store(&inputs.bias)?;
    Ok(run_backtest(&universe, &store, &resolved, start, end))
}

/// Run the backtest over pre-loaded data for every day in `start..=end`.
pub fn run_backtest(
    universe: &[InstrumentBars],
    store: &BiasStore,
    cfg: &ResolvedConfig,
    start: NaiveDate,
    end: NaiveDate,
) -> BacktestResult {
    info!(
        run_id = %cfg.run_id,
        model = cfg.model.kind().as_str(),
        instruments = universe.len(),
        %start,
        %end,
        "starting backtest"
    );

    let tallies: Vec<InstrumentTally> = universe
        .par_iter()
        .map(|inst| InstrumentPass::new(inst, store, cfg).run(start, end))
        .collect();

    let mut result = BacktestResult {
        run_id: cfg.run_id.clone(),
        start,
        end,
        instruments: universe.iter().map(|i| i.symbol.clone()).collect(),
        trades: Vec::new(),
        pair_days: 0,
        missing_cot_days: 0,
        missing_sentiment_days: 0,
        skips: BTreeMap::new(),
    };
    for tally in tallies {
        result.trades.extend(tally.trades);
        result.pair_days += tally.pair_days;
        result.missing_cot_days += tally.missing_cot_days;
        result.missing_sentiment_days += tally.missing_sentiment_days;
        for (reason, n) in tally.skips {
            *result.skips.entry(reason).or_insert(0) += n;
        }
    }

    info!(
        run_id = %cfg.run_id,
        trades = result.trades.len(),
        pair_days = result.pair_days,
        missing_cot_days = result.missing_cot_days,
        missing_sentiment_days = result.missing_sentiment_days,
        "backtest finished"
    );
    result
}

/// Calendar days from `start` to `end`, inclusive.
fn days_between(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

#[derive(Debug, Default)]
struct InstrumentTally {
    trades: Vec<TradeResult>,
    pair_days: usize,
    missing_cot_days: usize,
    missing_sentiment_days: usize,
    skips: BTreeMap<SkipReason, usize>,
}

impl InstrumentTally {
    fn skip(&mut self, reason: SkipReason) {
        *self.skips.entry(reason).or_insert(0) += 1;
    }
}

/// Per-instrument state shared by every day of the run.
struct InstrumentPass<'a> {
    instrument: Instrument,
    series: &'a BarSeries,
    store: &'a BiasStore,
    cfg: &'a ResolvedConfig,
    costs: CostModel,
    /// Local-day aggregates, only built for models that anchor on the day open.
    daily: Option<DailyRanges>,
}

impl<'a> InstrumentPass<'a> {
    fn new(bars: &'a InstrumentBars, store: &'a BiasStore, cfg: &'a ResolvedConfig) -> Self {
        let instrument = Instrument::forex(&bars.symbol, cfg.spread.for_instrument(&bars.symbol));
        let costs = CostModel::new(instrument.pip_size, instrument.spread_pips, cfg.slippage_pips);
        let daily = match cfg.model.kind() {
            EntryModelKind::Sweep => None,
            EntryModelKind::AdrPullback | EntryModelKind::Bollinger => {
                Some(DailyRanges::from_series(&bars.series, cfg.timezone))
            }
        };
        Self {
            instrument,
            series: &bars.series,
            store,
            cfg,
            costs,
            daily,
        }
    }

    fn run(&self, start: NaiveDate, end: NaiveDate) -> InstrumentTally {
        let mut tally = InstrumentTally::default();
        let symbol = self.instrument.symbol.as_str();
        if self.series.is_empty() {
            warn!(symbol, "no bars for instrument, skipping");
            return tally;
        }

        for day in days_between(start, end) {
            tally.pair_days += 1;
            if day.weekday().num_days_from_monday() > self.cfg.max_trade_weekday {
                tally.skip(SkipReason::Weekday);
                continue;
            }
            match self.run_day(day, &mut tally) {
                Ok(trade) => {
                    debug!(
                        symbol,
                        %day,
                        direction = %trade.direction,
                        exit = trade.exit_reason.as_str(),
                        pnl_r = trade.pnl_r,
                        "trade closed"
                    );
                    tally.trades.push(trade);
                }
                Err(reason) => {
                    debug!(symbol, %day, reason = reason.as_str(), "day skipped");
                    tally.skip(reason);
                }
            }
        }
        tally
    }

    fn run_day(&self, day: NaiveDate, tally: &mut InstrumentTally) -> Result<TradeResult, SkipReason> {
        let cfg = self.cfg;
        let symbol = self.instrument.symbol.as_str();

        let Some(direction) = self.store.cot_direction_on(symbol, day) else {
            tally.missing_cot_days += 1;
            return Err(SkipReason::MissingBias);
        };

        let entry_bounds = cfg.entry_window.bounds(day, cfg.timezone);
        let reference = self.reference(day).ok_or(SkipReason::EmptyReference)?;

        match self.store.sentiment_at(symbol, entry_bounds.start_utc()) {
            None => {
                tally.missing_sentiment_days += 1;
                if cfg.sentiment.missing_policy == MissingPolicy::Require {
                    return Err(SkipReason::MissingSentiment);
                }
            }
            Some(reading) if !cfg.sentiment.allows(direction, reading) => {
                return Err(SkipReason::SentimentGate);
            }
            Some(_) => {}
        }

        let (signal, active) = self
            .detect(day, &entry_bounds, &reference, direction)
            .map(|s| (s, entry_bounds))
            .or_else(|| {
                let secondary = cfg.secondary_window.as_ref()?.bounds(day, cfg.timezone);
                self.detect(day, &secondary, &reference, direction)
                    .map(|s| (s, secondary))
            })
            .ok_or(SkipReason::NoSignal)?;

        let entry_index = match cfg.entry_timing {
            EntryTiming::NextOpen => signal.confirm_index + 1,
            EntryTiming::ConfirmClose => signal.confirm_index,
        };
        let entry_bar = self.series.get(entry_index).ok_or(SkipReason::EntryPastData)?;
        let entry_price = match cfg.entry_timing {
            EntryTiming::NextOpen => entry_bar.open,
            EntryTiming::ConfirmClose => entry_bar.close,
        };
        if !active.contains(entry_bar.time) {
            return Err(SkipReason::EntryOutsideWindow);
        }

        let (stop_price, target_price) = self.levels(direction, entry_price, &signal)?;
        let setup = TradeSetup {
            instrument: symbol.to_string(),
            direction,
            entry_index,
            entry_time: entry_bar.time,
            entry_price,
            stop_price,
            target_price,
            time_stop: cfg
                .time_stop_window
                .as_ref()
                .map(|w| w.bounds(day, cfg.timezone).end_utc()),
            ref_high: reference.ref_high,
            ref_low: reference.ref_low,
        };

        match simulate_trade(self.series.bars(), &setup, &self.costs, &cfg.exit_rules) {
            SimulationOutcome::Closed(trade) => Ok(trade),
            SimulationOutcome::OpenAtEnd => Err(SkipReason::OpenAtEnd),
            SimulationOutcome::InvalidRisk => Err(SkipReason::InvalidRisk),
            SimulationOutcome::NoBarsAfterEntry => Err(SkipReason::NoBarsAfterEntry),
        }
    }

    /// Sweep: high/low of the reference session `reference_day_offset` days
    /// back. Other models: the day's opening price as a single anchor.
    fn reference(&self, day: NaiveDate) -> Option<SessionRef> {
        let cfg = self.cfg;
        match &self.daily {
            None => {
                let ref_day = day.checked_sub_days(Days::new(u64::from(cfg.reference_day_offset)))?;
                let bounds = cfg.reference_window.bounds(ref_day, cfg.timezone);
                SessionRef::from_session(self.series, &bounds)
            }
            Some(daily) => {
                let open = daily.day_open(day)?;
                Some(SessionRef::anchored(open, &local_day_bounds(day, cfg.timezone)))
            }
        }
    }

    /// Bands warmed up from local midnight (or the session start, if that
    /// comes first) through the session end, so a session that crosses
    /// midnight has values on both sides of it.
    fn session_bands(
        &self,
        day: NaiveDate,
        bounds: &SessionBounds,
        detector: &BollingerDetector,
    ) -> BandSeries {
        let midnight = local_day_bounds(day, self.cfg.timezone).start;
        let from = midnight.min(bounds.start);
        let range = self.series.range_inclusive(&from, &bounds.end);
        BandSeries::compute(self.series.bars(), range, detector.length, detector.std_mult)
    }

    fn detect(
        &self,
        day: NaiveDate,
        bounds: &SessionBounds,
        reference: &SessionRef,
        direction: Direction,
    ) -> Option<Signal> {
        let cfg = self.cfg;
        let session = self.series.range_inclusive(&bounds.start, &bounds.end);
        let (range, adr, bands) = match &cfg.model {
            EntryModel::AdrPullback(detector) => {
                let midnight = local_day_bounds(day, cfg.timezone).start;
                let adr = self
                    .daily
                    .as_ref()
                    .and_then(|d| d.adr_before(day, detector.lookback_days));
                (self.series.range_inclusive(&midnight, &bounds.end), adr, None)
            }
            EntryModel::Bollinger(detector) => {
                (session, None, Some(self.session_bands(day, bounds, detector)))
            }
            EntryModel::Sweep(_) => (session, None, None),
        };
        let ctx = DetectionContext {
            session_ref: reference,
            pip_size: self.instrument.pip_size,
            entry_start: bounds.start_utc(),
            adr,
            bands: bands.as_ref(),
        };
        cfg.model
            .detect(&BarWindow::new(self.series.bars(), range), &ctx, direction)
    }

    /// Stop and target for an entry.
    ///
    /// Sweep / ADR: stop beyond the swept extreme by the buffer (or a fixed
    /// distance from entry), target a fixed distance from entry; structural
    /// stops wider than `max_stop_pips` are rejected. Bollinger: target is
    /// the signal's band, stop sits half the entry-to-target distance on
    /// the other side, with no cap.
    fn levels(&self, direction: Direction, entry: f64, signal: &Signal) -> Result<(f64, f64), SkipReason> {
        let cfg = self.cfg;
        let inst = &self.instrument;
        let s = direction.sign();

        let (stop, target) = match &cfg.model {
            EntryModel::Bollinger(_) => {
                let target = signal.target_price.ok_or(SkipReason::InvalidTarget)?;
                let reward = s * (target - entry);
                if reward.is_nan() || reward <= 0.0 {
                    return Err(SkipReason::InvalidTarget);
                }
                (entry - s * reward / 2.0, target)
            }
            EntryModel::Sweep(_) | EntryModel::AdrPullback(_) => {
                let stop = match cfg.fixed_stop_pips {
                    Some(fixed) => entry - s * inst.pips_to_price(fixed),
                    None => {
                        let buffer = inst.pips_to_price(cfg.stop_buffer_pips);
                        let stop = match direction {
                            Direction::Short => signal.sweep_high + buffer,
                            Direction::Long => signal.sweep_low - buffer,
                        };
                        if inst.price_to_pips((entry - stop).abs()) > cfg.max_stop_pips {
                            return Err(SkipReason::StopTooWide);
                        }
                        stop
                    }
                };
                (stop, entry + s * inst.pips_to_price(cfg.tp_pips))
            }
        };

        if s * (entry - stop) <= 0.0 {
            return Err(SkipReason::InvalidRisk);
        }
        Ok((stop, target))
    }
}
