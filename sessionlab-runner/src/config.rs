//! Serializable backtest configuration.
//!
//! A `BacktestConfig` is read from TOML and must spell out every strategy
//! parameter; only genuinely optional features are `Option`s. `validate()`
//! resolves names and ranges into a `ResolvedConfig`, which is the only
//! form the runner accepts, so configuration mistakes fail before any
//! simulation starts.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sessionlab_core::session::parse_timezone;
use sessionlab_core::signals::{
    AdrPullbackDetector, BollingerDetector, Confirmation, EntryModel, EntryModelKind,
    SweepDetector,
};
use sessionlab_core::{Direction, ExitRules, PartialTarget, SentimentRecord, SessionWindow};

/// Content hash of a configuration (BLAKE3 hex).
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
    #[error("{field} refers to unknown session '{name}'")]
    UnknownSession { field: &'static str, name: String },
    #[error("invalid {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },
}

// ─── Raw (file) form ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BacktestConfig {
    /// Bar timeframe label used to locate bar files (e.g. "M5").
    pub timeframe: String,
    pub entry_session: String,
    /// Retried once on the same day when the entry session yields no signal.
    pub secondary_session: Option<String>,
    /// Session whose high/low anchors the sweep model.
    pub reference_session: String,
    /// Calendar days back from the trading day to the reference session (1 or 2).
    pub reference_day_offset: u32,
    /// Open trades are closed at the end of this session, if set.
    pub time_stop_session: Option<String>,
    /// Monday = 0 ... Sunday = 6; later days are not traded.
    pub max_trade_weekday: u32,
    pub sessions: SessionsConfig,
    pub sentiment: SentimentConfig,
    pub entry: EntryConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub spread: SpreadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SessionsConfig {
    pub timezone: String,
    pub windows: BTreeMap<String, WindowSpec>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WindowSpec {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentMode {
    /// Trade against the crowd.
    Contrarian,
    /// Trade with the crowd.
    Trend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPolicy {
    /// Skip the day when no sentiment reading exists.
    Require,
    /// Trade ungated when no sentiment reading exists.
    Allow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SentimentConfig {
    pub mode: SentimentMode,
    pub threshold_long_pct: f64,
    pub threshold_short_pct: f64,
    pub missing_policy: MissingPolicy,
}

impl SentimentConfig {
    /// Whether a reading permits a trade in `direction`.
    ///
    /// Contrarian: a short needs `long_pct >= threshold_long_pct`, a long
    /// needs `short_pct >= threshold_short_pct`. Trend: the same-side
    /// percentage must reach its own threshold.
    pub fn allows(&self, direction: Direction, reading: &SentimentRecord) -> bool {
        match (self.mode, direction) {
            (SentimentMode::Contrarian, Direction::Short) | (SentimentMode::Trend, Direction::Long) => {
                reading.long_pct >= self.threshold_long_pct
            }
            (SentimentMode::Contrarian, Direction::Long) | (SentimentMode::Trend, Direction::Short) => {
                reading.short_pct >= self.threshold_short_pct
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryTiming {
    /// Open of the bar after confirmation.
    NextOpen,
    /// Close of the confirmation bar.
    ConfirmClose,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EntryConfig {
    pub model: EntryModelKind,
    pub entry_timing: EntryTiming,
    pub sweep_buffer_pips: f64,
    pub displacement_min_body_pips: f64,
    pub displacement_close_pct: f64,
    pub confirmation: Confirmation,
    pub swing_lookback_bars: usize,
    pub adr_lookback_days: usize,
    pub adr_pullback_pct: f64,
    pub bb_length: usize,
    pub bb_std: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RiskConfig {
    pub stop_buffer_pips: f64,
    pub max_stop_pips: f64,
    /// Fixed stop distance; replaces the structural stop and skips the cap.
    pub fixed_stop_pips: Option<f64>,
    pub tp_pips: f64,
    pub be_trigger_pips: Option<f64>,
    pub partial_target: Option<PartialTarget>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    pub slippage_pips: f64,
    pub conservative_tie_break: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SpreadConfig {
    pub default_pips: f64,
    #[serde(default)]
    pub per_instrument: BTreeMap<String, f64>,
}

impl SpreadConfig {
    pub fn for_instrument(&self, symbol: &str) -> f64 {
        self.per_instrument
            .get(symbol)
            .copied()
            .unwrap_or(self.default_pips)
    }
}

impl BacktestConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Deterministic content hash of this configuration.
    ///
    /// Two runs with identical configs share a RunId.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    /// Resolve timezone and session names and range-check every parameter.
    pub fn validate(&self) -> Result<ResolvedConfig, ConfigError> {
        let timezone = parse_timezone(&self.sessions.timezone)
            .map_err(|_| ConfigError::UnknownTimezone(self.sessions.timezone.clone()))?;

        let entry_window = self.window("entry_session", &self.entry_session)?;
        let secondary_window = self
            .secondary_session
            .as_deref()
            .map(|name| self.window("secondary_session", name))
            .transpose()?;
        let reference_window = self.window("reference_session", &self.reference_session)?;
        let time_stop_window = self
            .time_stop_session
            .as_deref()
            .map(|name| self.window("time_stop_session", name))
            .transpose()?;

        if !(1..=2).contains(&self.reference_day_offset) {
            return Err(invalid("reference_day_offset", "must be 1 or 2"));
        }
        if self.max_trade_weekday > 6 {
            return Err(invalid("max_trade_weekday", "must be 0 (Mon) to 6 (Sun)"));
        }

        let s = &self.sentiment;
        check_range("sentiment.threshold_long_pct", s.threshold_long_pct, 0.0, 100.0)?;
        check_range("sentiment.threshold_short_pct", s.threshold_short_pct, 0.0, 100.0)?;

        let e = &self.entry;
        check_non_negative("entry.sweep_buffer_pips", e.sweep_buffer_pips)?;
        check_non_negative("entry.displacement_min_body_pips", e.displacement_min_body_pips)?;
        check_range("entry.displacement_close_pct", e.displacement_close_pct, 0.0, 1.0)?;
        check_positive("entry.adr_pullback_pct", e.adr_pullback_pct)?;
        check_positive("entry.bb_std", e.bb_std)?;
        if e.swing_lookback_bars == 0 {
            return Err(invalid("entry.swing_lookback_bars", "must be at least 1"));
        }
        if e.adr_lookback_days == 0 {
            return Err(invalid("entry.adr_lookback_days", "must be at least 1"));
        }
        if e.bb_length < 2 {
            return Err(invalid("entry.bb_length", "must be at least 2"));
        }

        let r = &self.risk;
        check_non_negative("risk.stop_buffer_pips", r.stop_buffer_pips)?;
        check_positive("risk.max_stop_pips", r.max_stop_pips)?;
        check_positive("risk.tp_pips", r.tp_pips)?;
        if let Some(fixed) = r.fixed_stop_pips {
            check_positive("risk.fixed_stop_pips", fixed)?;
        }
        if let Some(trigger) = r.be_trigger_pips {
            check_positive("risk.be_trigger_pips", trigger)?;
        }
        if let Some(p) = r.partial_target {
            check_positive("risk.partial_target.r_multiple", p.r_multiple)?;
            if !(p.fraction > 0.0 && p.fraction < 1.0) {
                return Err(invalid("risk.partial_target.fraction", "must be strictly between 0 and 1"));
            }
        }

        check_non_negative("execution.slippage_pips", self.execution.slippage_pips)?;
        check_non_negative("spread.default_pips", self.spread.default_pips)?;
        for pips in self.spread.per_instrument.values() {
            check_non_negative("spread.per_instrument", *pips)?;
        }

        let model = match e.model {
            EntryModelKind::Sweep => EntryModel::Sweep(SweepDetector {
                buffer_pips: e.sweep_buffer_pips,
                min_body_pips: e.displacement_min_body_pips,
                close_pct: e.displacement_close_pct,
                confirmation: e.confirmation,
                lookback: e.swing_lookback_bars,
            }),
            EntryModelKind::AdrPullback => EntryModel::AdrPullback(AdrPullbackDetector {
                lookback_days: e.adr_lookback_days,
                pullback_pct: e.adr_pullback_pct,
            }),
            EntryModelKind::Bollinger => EntryModel::Bollinger(BollingerDetector {
                length: e.bb_length,
                std_mult: e.bb_std,
            }),
        };

        Ok(ResolvedConfig {
            run_id: self.run_id()?,
            timezone,
            entry_window,
            secondary_window,
            reference_window,
            reference_day_offset: self.reference_day_offset,
            time_stop_window,
            max_trade_weekday: self.max_trade_weekday,
            model,
            entry_timing: e.entry_timing,
            sentiment: self.sentiment,
            stop_buffer_pips: r.stop_buffer_pips,
            max_stop_pips: r.max_stop_pips,
            fixed_stop_pips: r.fixed_stop_pips,
            tp_pips: r.tp_pips,
            exit_rules: ExitRules {
                partial_target: r.partial_target,
                breakeven_trigger_pips: r.be_trigger_pips,
                conservative_tie_break: self.execution.conservative_tie_break,
            },
            slippage_pips: self.execution.slippage_pips,
            spread: self.spread.clone(),
        })
    }

    fn window(&self, field: &'static str, name: &str) -> Result<SessionWindow, ConfigError> {
        self.sessions
            .windows
            .get(name)
            .map(|w| SessionWindow::new(name, w.start, w.end))
            .ok_or_else(|| ConfigError::UnknownSession {
                field,
                name: name.to_string(),
            })
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        field,
        reason: reason.to_string(),
    }
}

fn check_range(field: &'static str, value: f64, lo: f64, hi: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, &format!("{value} is outside [{lo}, {hi}]")))
    }
}

fn check_non_negative(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, &format!("{value} must be >= 0")))
    }
}

fn check_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, &format!("{value} must be > 0")))
    }
}

// ─── Resolved form ──────────────────────────────────────────────────

/// Validated configuration with sessions and timezone resolved.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub run_id: RunId,
    pub timezone: Tz,
    pub entry_window: SessionWindow,
    pub secondary_window: Option<SessionWindow>,
    pub reference_window: SessionWindow,
    pub reference_day_offset: u32,
    pub time_stop_window: Option<SessionWindow>,
    pub max_trade_weekday: u32,
    pub model: EntryModel,
    pub entry_timing: EntryTiming,
    pub sentiment: SentimentConfig,
    pub stop_buffer_pips: f64,
    pub max_stop_pips: f64,
    pub fixed_stop_pips: Option<f64>,
    pub tp_pips: f64,
    pub exit_rules: ExitRules,
    pub slippage_pips: f64,
    pub spread: SpreadConfig,
}

/// `"HH:MM"` (or `"HH:MM:SS"`) local times. Always written with seconds so
/// the run id sees every field that reaches the session bounds.
mod hhmm {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&t.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|_| D::Error::custom(format!("expected HH:MM, got '{raw}'")))
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_TOML: &str = r#"
timeframe = "M5"
entry_session = "london"
secondary_session = "ny"
reference_session = "asia"
reference_day_offset = 1
time_stop_session = "london"
max_trade_weekday = 4

[sessions]
timezone = "America/Toronto"

[sessions.windows.asia]
start = "19:00"
end = "00:00"

[sessions.windows.london]
start = "03:00"
end = "06:00"

[sessions.windows.ny]
start = "08:00"
end = "11:00"

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
adr_lookback_days = 20
adr_pullback_pct = 0.35
bb_length = 20
bb_std = 2.0

[risk]
stop_buffer_pips = 1.0
max_stop_pips = 12.0
tp_pips = 40.0
be_trigger_pips = 12.0

[execution]
slippage_pips = 0.2
conservative_tie_break = true

[spread]
default_pips = 1.5

[spread.per_instrument]
GBPJPY = 2.5
"#;
