//! Integration tests for the runner on a hand-built market.
//!
//! Every market is flat 5-minute bars (1.0998 / 1.1000 / 1.1002) from
//! 2025-01-05 to 2025-01-09 UTC, with a scripted sequence on Tuesday
//! 2025-01-07. Sessions are in UTC so bar times read directly.

use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use proptest::prelude::*;

use sessionlab_core::{
    Bar, BarSeries, BiasRecord, BiasStore, Direction, ExitReason, SentimentRecord,
};
use sessionlab_core::EntryModelKind;
use sessionlab_runner::config::{BacktestConfig, EntryTiming, WindowSpec};
use sessionlab_runner::{run_backtest, InstrumentBars, SkipReason};

const CONFIG: &str = r#"
timeframe = "M5"
entry_session = "london"
secondary_session = "ny"
reference_session = "asia"
reference_day_offset = 1
time_stop_session = "london"
max_trade_weekday = 4

[sessions]
timezone = "UTC"

[sessions.windows.asia]
start = "20:00"
end = "00:00"

[sessions.windows.london]
start = "07:00"
end = "10:00"

[sessions.windows.ny]
start = "13:00"
end = "16:00"

[sentiment]
mode = "contrarian"
threshold_long_pct = 55.0
threshold_short_pct = 55.0
missing_policy = "allow"

[entry]
model = "sweep"
entry_timing = "next_open"
sweep_buffer_pips = 1.0
displacement_min_body_pips = 3.0
displacement_close_pct = 0.30
confirmation = "displacement"
swing_lookback_bars = 20
adr_lookback_days = 2
adr_pullback_pct = 1.0
bb_length = 20
bb_std = 2.0

[risk]
stop_buffer_pips = 1.0
max_stop_pips = 40.0
tp_pips = 20.0

[execution]
slippage_pips = 0.0
conservative_tie_break = true

[spread]
default_pips = 1.0
"#;

fn config() -> BacktestConfig {
    BacktestConfig::from_toml_str(CONFIG).unwrap()
}

fn trade_day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 7).unwrap()
}

/// Flat market with `(hour, minute, o, h, l, c)` overrides on the trade day.
fn market(symbol: &str, script: &[(u32, u32, f64, f64, f64, f64)]) -> InstrumentBars {
    market_on(symbol, trade_day(), script)
}

/// Flat market with overrides on `day`.
fn market_on(
    symbol: &str,
    day: NaiveDate,
    script: &[(u32, u32, f64, f64, f64, f64)],
) -> InstrumentBars {
    let t0 = Utc.with_ymd_and_hms(2025, 1, 5, 0, 0, 0).unwrap();
    let mut bars: Vec<Bar> = (0..4 * 288)
        .map(|i| Bar {
            time: t0 + Duration::minutes(5 * i),
            open: 1.1000,
            high: 1.1002,
            low: 1.0998,
            close: 1.1000,
        })
        .collect();
    for &(h, m, open, high, low, close) in script {
        let time = day.and_hms_opt(h, m, 0).unwrap().and_utc();
        if let Some(bar) = bars.iter_mut().find(|b| b.time == time) {
            *bar = Bar { time, open, high, low, close };
        }
    }
    InstrumentBars {
        symbol: symbol.to_string(),
        series: BarSeries::new(bars),
    }
}

/// Sweep above 1.1002, close back inside, bearish displacement, then a
/// drop through the 20 pip target.
fn short_sweep_market(symbol: &str) -> InstrumentBars {
    market(
        symbol,
        &[
            (7, 5, 1.1000, 1.1012, 1.0999, 1.1008),
            (7, 10, 1.1008, 1.1009, 1.0999, 1.1000),
            (7, 15, 1.1000, 1.1001, 1.0980, 1.0982),
            (7, 20, 1.0982, 1.0984, 1.0975, 1.0978),
            (7, 25, 1.0978, 1.0979, 1.0955, 1.0958),
        ],
    )
}

fn bias(symbol: &str, direction: Direction) -> BiasRecord {
    BiasRecord {
        instrument: symbol.to_string(),
        direction,
        report_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
    }
}

fn sentiment(symbol: &str, long_pct: f64) -> SentimentRecord {
    SentimentRecord {
        instrument: symbol.to_string(),
        timestamp: Utc.with_ymd_and_hms(2025, 1, 7, 6, 0, 0).unwrap(),
        long_pct,
        short_pct: 100.0 - long_pct,
    }
}

#[test]
fn short_sweep_trade_end_to_end() {
    let cfg = config().validate().unwrap();
    let universe = vec![short_sweep_market("EURUSD")];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Short)], vec![]).unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());

    assert_eq!(result.trades.len(), 1, "skips: {:?}", result.skips);
    let t = &result.trades[0];
    assert_eq!(t.direction, Direction::Short);
    assert_eq!(t.exit_reason, ExitReason::Tp);
    assert_eq!(t.entry_time, Utc.with_ymd_and_hms(2025, 1, 7, 7, 20, 0).unwrap());
    assert!((t.entry_price_raw - 1.0982).abs() < 1e-9);
    // stop: sweep high 1.1012 + 1 pip
    assert!((t.stop_price - 1.1013).abs() < 1e-9);
    assert!((t.target_price - 1.0962).abs() < 1e-9);
    // half-spread 0.5 pip each way: 20 - 1 = 19 pips over 31.5 pips of risk
    assert!((t.pnl_pips - 19.0).abs() < 1e-6);
    assert!((t.pnl_r - 19.0 / 31.5).abs() < 1e-6);
    assert_eq!(t.ref_high, 1.1002);

    assert_eq!(result.pair_days, 1);
    assert_eq!(result.missing_cot_days, 0);
    assert_eq!(result.missing_sentiment_days, 1);
}

#[test]
fn confirm_close_entry_uses_confirmation_bar() {
    let mut config = config();
    config.entry.entry_timing = EntryTiming::ConfirmClose;
    let cfg = config.validate().unwrap();
    let universe = vec![short_sweep_market("EURUSD")];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Short)], vec![]).unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());

    let t = &result.trades[0];
    assert_eq!(t.entry_time, Utc.with_ymd_and_hms(2025, 1, 7, 7, 15, 0).unwrap());
    assert!((t.entry_price_raw - 1.0982).abs() < 1e-9);
}

#[test]
fn wide_structural_stop_is_rejected() {
    let mut config = config();
    config.risk.max_stop_pips = 20.0;
    let cfg = config.validate().unwrap();
    let universe = vec![short_sweep_market("EURUSD")];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Short)], vec![]).unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());

    assert!(result.trades.is_empty());
    assert_eq!(result.skipped(SkipReason::StopTooWide), 1);
}

#[test]
fn fixed_stop_skips_the_cap() {
    let mut config = config();
    config.risk.max_stop_pips = 5.0;
    config.risk.fixed_stop_pips = Some(10.0);
    let cfg = config.validate().unwrap();
    let universe = vec![short_sweep_market("EURUSD")];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Short)], vec![]).unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());

    assert_eq!(result.trades.len(), 1);
    assert!((result.trades[0].stop_price - 1.0992).abs() < 1e-9);
}

#[test]
fn bias_against_the_setup_finds_no_signal() {
    let cfg = config().validate().unwrap();
    let universe = vec![short_sweep_market("EURUSD")];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Long)], vec![]).unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());

    assert!(result.trades.is_empty());
    assert_eq!(result.skipped(SkipReason::NoSignal), 1);
}

#[test]
fn contrarian_sentiment_gate() {
    let cfg = config().validate().unwrap();
    let universe = vec![short_sweep_market("EURUSD")];

    // Short needs the crowd long: 60% passes, 40% is gated out.
    let crowded = BiasStore::new(
        vec![bias("EURUSD", Direction::Short)],
        vec![sentiment("EURUSD", 60.0)],
    )
    .unwrap();
    let result = run_backtest(&universe, &crowded, &cfg, trade_day(), trade_day());
    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.missing_sentiment_days, 0);

    let thin = BiasStore::new(
        vec![bias("EURUSD", Direction::Short)],
        vec![sentiment("EURUSD", 40.0)],
    )
    .unwrap();
    let result = run_backtest(&universe, &thin, &cfg, trade_day(), trade_day());
    assert!(result.trades.is_empty());
    assert_eq!(result.skipped(SkipReason::SentimentGate), 1);
}

#[test]
fn required_sentiment_skips_when_missing() {
    let mut config = config();
    config.sentiment.missing_policy = sessionlab_runner::config::MissingPolicy::Require;
    let cfg = config.validate().unwrap();
    let universe = vec![short_sweep_market("EURUSD")];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Short)], vec![]).unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());

    assert!(result.trades.is_empty());
    assert_eq!(result.missing_sentiment_days, 1);
    assert_eq!(result.skipped(SkipReason::MissingSentiment), 1);
}

#[test]
fn secondary_session_retry() {
    // Same sequence, six hours later: inside the NY window only.
    let universe = vec![market(
        "EURUSD",
        &[
            (13, 5, 1.1000, 1.1012, 1.0999, 1.1008),
            (13, 10, 1.1008, 1.1009, 1.0999, 1.1000),
            (13, 15, 1.1000, 1.1001, 1.0980, 1.0982),
            (13, 20, 1.0982, 1.0984, 1.0975, 1.0978),
            (13, 25, 1.0978, 1.0979, 1.0955, 1.0958),
        ],
    )];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Short)], vec![]).unwrap();

    let cfg = config().validate().unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());
    assert_eq!(result.trades.len(), 1);
    assert_eq!(
        result.trades[0].entry_time,
        Utc.with_ymd_and_hms(2025, 1, 7, 13, 20, 0).unwrap()
    );
    // The time stop stays on the configured session (London, already over),
    // so the first bar after entry closes the trade.
    assert_eq!(result.trades[0].exit_reason, ExitReason::TimeStop);

    let mut no_retry = config();
    no_retry.secondary_session = None;
    let cfg = no_retry.validate().unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());
    assert!(result.trades.is_empty());
    assert_eq!(result.skipped(SkipReason::NoSignal), 1);
}

#[test]
fn adr_pullback_long_with_time_stop() {
    let mut config = config();
    config.entry.model = EntryModelKind::AdrPullback;
    let cfg = config.validate().unwrap();
    // ADR of the two prior days is 4 pips; a full-ADR pullback below the
    // 1.1000 open happens before London, the reclaim at the London open.
    let universe = vec![market("EURUSD", &[(3, 0, 1.1000, 1.1001, 1.0990, 1.0992)])];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Long)], vec![]).unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());

    assert_eq!(result.trades.len(), 1, "skips: {:?}", result.skips);
    let t = &result.trades[0];
    assert_eq!(t.direction, Direction::Long);
    assert_eq!(t.entry_time, Utc.with_ymd_and_hms(2025, 1, 7, 7, 5, 0).unwrap());
    // stop: pullback low 1.0990 - 1 pip
    assert!((t.stop_price - 1.0989).abs() < 1e-9);
    assert_eq!(t.ref_high, 1.1000);
    assert_eq!(t.ref_low, 1.1000);
    assert_eq!(t.exit_reason, ExitReason::TimeStop);
    assert_eq!(t.exit_time, Utc.with_ymd_and_hms(2025, 1, 7, 10, 0, 0).unwrap());
}

#[test]
fn adr_needs_full_lookback() {
    let mut config = config();
    config.entry.model = EntryModelKind::AdrPullback;
    config.entry.adr_lookback_days = 5;
    let cfg = config.validate().unwrap();
    let universe = vec![market("EURUSD", &[(3, 0, 1.1000, 1.1001, 1.0990, 1.0992)])];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Long)], vec![]).unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());

    assert!(result.trades.is_empty());
    assert_eq!(result.skipped(SkipReason::NoSignal), 1);
}

/// Bollinger fade with 3-bar, 1-sigma bands and a 2 pip stop cap.
fn bollinger_config() -> BacktestConfig {
    let mut config = config();
    config.entry.model = EntryModelKind::Bollinger;
    config.entry.bb_length = 3;
    config.entry.bb_std = 1.0;
    config.risk.max_stop_pips = 2.0;
    config
}

/// Upper band over the closes 1.1000, 1.1000, 1.1010.
fn upper_after_pop() -> f64 {
    let closes = [1.1000, 1.1000, 1.1010];
    let mean = closes.iter().sum::<f64>() / 3.0;
    let var = closes.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / 3.0;
    mean + var.sqrt()
}

/// Flat bars tag the zero-width lower band at the session open; the next
/// bar closes back above it, then price runs through the upper band.
const LONG_FADE: [(u32, u32, f64, f64, f64, f64); 2] = [
    (7, 5, 1.1000, 1.1012, 1.0999, 1.1010),
    (7, 15, 1.1000, 1.1020, 1.0999, 1.1015),
];

#[test]
fn bollinger_long_targets_the_upper_band() {
    let cfg = bollinger_config().validate().unwrap();
    let universe = vec![market("EURUSD", &LONG_FADE)];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Long)], vec![]).unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());

    assert_eq!(result.trades.len(), 1, "skips: {:?}", result.skips);
    assert_eq!(result.skipped(SkipReason::StopTooWide), 0);
    let t = &result.trades[0];
    assert_eq!(t.direction, Direction::Long);
    assert_eq!(t.entry_time, Utc.with_ymd_and_hms(2025, 1, 7, 7, 10, 0).unwrap());
    assert!((t.entry_price_raw - 1.1000).abs() < 1e-9);

    let target = upper_after_pop();
    assert!((t.target_price - target).abs() < 1e-9);
    // Half the reward below entry, about 4 pips: wider than the cap.
    let stop = 1.1000 - (target - 1.1000) / 2.0;
    assert!((t.stop_price - stop).abs() < 1e-9);
    assert!((1.1000 - t.stop_price) / 0.0001 > cfg.max_stop_pips);
    assert_eq!(t.exit_reason, ExitReason::Tp);
    assert_eq!(t.exit_time, Utc.with_ymd_and_hms(2025, 1, 7, 7, 15, 0).unwrap());
}

#[test]
fn bollinger_entry_beyond_the_target_band_is_skipped() {
    let mut config = bollinger_config();
    // Entering at the 1.1010 confirmation close puts the upper band below entry.
    config.entry.entry_timing = EntryTiming::ConfirmClose;
    let cfg = config.validate().unwrap();
    let universe = vec![market("EURUSD", &LONG_FADE)];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Long)], vec![]).unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());

    assert!(upper_after_pop() < 1.1010);
    assert!(result.trades.is_empty());
    assert_eq!(result.skipped(SkipReason::InvalidTarget), 1);
}

#[test]
fn bollinger_session_across_midnight_sees_bands_after_midnight() {
    let mut config = bollinger_config();
    let late = WindowSpec {
        start: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(2, 0, 0).unwrap(),
    };
    config.sessions.windows.insert("london".into(), late);
    let cfg = config.validate().unwrap();
    let next_day = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
    let universe = vec![market_on(
        "EURUSD",
        next_day,
        &[
            (0, 30, 1.1000, 1.1012, 1.0999, 1.1010),
            (0, 40, 1.1000, 1.1020, 1.0999, 1.1015),
        ],
    )];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Long)], vec![]).unwrap();
    let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());

    assert_eq!(result.trades.len(), 1, "skips: {:?}", result.skips);
    let t = &result.trades[0];
    assert_eq!(t.entry_time, Utc.with_ymd_and_hms(2025, 1, 8, 0, 35, 0).unwrap());
    assert!((t.target_price - upper_after_pop()).abs() < 1e-9);
    assert_eq!(t.exit_reason, ExitReason::Tp);
}

#[test]
fn weekend_days_are_counted_but_never_traded() {
    let cfg = config().validate().unwrap();
    let universe = vec![short_sweep_market("EURUSD")];
    let store = BiasStore::new(vec![bias("EURUSD", Direction::Short)], vec![]).unwrap();
    // Sat 2025-01-04 .. Tue 2025-01-07
    let start = NaiveDate::from_ymd_opt(2025, 1, 4).unwrap();
    let result = run_backtest(&universe, &store, &cfg, start, trade_day());

    assert_eq!(result.skipped(SkipReason::Weekday), 2);
    assert_eq!(result.pair_days, 4);
    assert_eq!(result.missing_cot_days, 0);
    assert_eq!(result.trades.len(), 1);
}

#[test]
fn parallel_run_is_idempotent_and_ordered() {
    let cfg = config().validate().unwrap();
    let universe = vec![
        short_sweep_market("GBPUSD"),
        short_sweep_market("EURUSD"),
        short_sweep_market("AUDUSD"),
    ];
    let store = BiasStore::new(
        vec![
            bias("GBPUSD", Direction::Short),
            bias("EURUSD", Direction::Short),
            bias("AUDUSD", Direction::Short),
        ],
        vec![],
    )
    .unwrap();
    let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
    let end = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();

    let first = run_backtest(&universe, &store, &cfg, start, end);
    let second = run_backtest(&universe, &store, &cfg, start, end);
    assert_eq!(first, second);

    let order: Vec<&str> = first.trades.iter().map(|t| t.instrument.as_str()).collect();
    assert_eq!(order, ["GBPUSD", "EURUSD", "AUDUSD"]);
    assert_eq!(first.pair_days, 9);
}

#[test]
fn empty_bias_store_skips_every_day() {
    let cfg = config().validate().unwrap();
    let universe = vec![short_sweep_market("EURUSD"), short_sweep_market("GBPUSD")];
    let start = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
    let end = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
    let result = run_backtest(&universe, &BiasStore::empty(), &cfg, start, end);

    assert!(result.trades.is_empty());
    assert_eq!(result.pair_days, 6);
    assert_eq!(result.missing_cot_days, 6);
}

#[test]
fn shipped_example_config_validates() {
    let text = include_str!("../../config/london_sweep.toml");
    let cfg = BacktestConfig::from_toml_str(text).unwrap().validate().unwrap();
    assert_eq!(cfg.entry_window.name, "london");
    assert!(cfg.reference_window.wraps_midnight());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Structural stops never exceed the configured cap.
    #[test]
    fn structural_stops_respect_cap(
        max_stop in 5.0..60.0_f64,
        buffer in 0.0..5.0_f64,
        next_open in any::<bool>(),
    ) {
        let mut config = config();
        config.risk.max_stop_pips = max_stop;
        config.risk.stop_buffer_pips = buffer;
        config.entry.entry_timing = if next_open { EntryTiming::NextOpen } else { EntryTiming::ConfirmClose };
        let cfg = config.validate().unwrap();
        let universe = vec![short_sweep_market("EURUSD")];
        let store = BiasStore::new(vec![bias("EURUSD", Direction::Short)], vec![]).unwrap();
        let result = run_backtest(&universe, &store, &cfg, trade_day(), trade_day());

        for t in &result.trades {
            let stop_pips = (t.entry_price_raw - t.stop_price).abs() / 0.0001;
            prop_assert!(stop_pips <= max_stop + 1e-9);
        }
        prop_assert_eq!(result.trades.len() + result.skips.values().sum::<usize>(), 1);
    }
}
