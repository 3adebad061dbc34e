//! Spread / slippage sensitivity: re-run one configuration under tighter
//! and wider execution costs.
//!
//! Only the default spread and the slippage change; per-instrument spread
//! overrides are kept as configured.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use sessionlab_core::BiasStore;

use crate::config::{BacktestConfig, ConfigError};
use crate::data_loader::InstrumentBars;
use crate::metrics::StatsSummary;
use crate::runner::run_backtest;

const SPREAD_STEP_PIPS: f64 = 0.5;
const SLIPPAGE_STEP_PIPS: f64 = 0.1;

/// Execution costs for one sensitivity run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub spread_pips: f64,
    pub slippage_pips: f64,
}

impl Scenario {
    /// `config` with this scenario's costs.
    pub fn apply(&self, config: &BacktestConfig) -> BacktestConfig {
        let mut out = config.clone();
        out.spread.default_pips = self.spread_pips;
        out.execution.slippage_pips = self.slippage_pips;
        out
    }
}

/// Base, tight (costs lowered, floored at zero) and wide (costs raised).
pub fn sensitivity_scenarios(config: &BacktestConfig) -> Vec<Scenario> {
    let spread = config.spread.default_pips;
    let slippage = config.execution.slippage_pips;
    vec![
        Scenario {
            name: "base".into(),
            spread_pips: spread,
            slippage_pips: slippage,
        },
        Scenario {
            name: "tight".into(),
            spread_pips: (spread - SPREAD_STEP_PIPS).max(0.0),
            slippage_pips: (slippage - SLIPPAGE_STEP_PIPS).max(0.0),
        },
        Scenario {
            name: "wide".into(),
            spread_pips: spread + SPREAD_STEP_PIPS,
            slippage_pips: slippage + SLIPPAGE_STEP_PIPS,
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub scenario: Scenario,
    pub run_id: String,
    pub stats: StatsSummary,
}

/// Run every sensitivity scenario over the same data.
pub fn run_scenarios(
    config: &BacktestConfig,
    universe: &[InstrumentBars],
    store: &BiasStore,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<ScenarioOutcome>, ConfigError> {
    sensitivity_scenarios(config)
        .into_iter()
        .map(|scenario| {
            let resolved = scenario.apply(config).validate()?;
            let result = run_backtest(universe, store, &resolved, start, end);
            let stats = StatsSummary::compute(&result);
            info!(
                scenario = %scenario.name,
                trades = stats.trades,
                net_r = stats.net_r,
                "scenario finished"
            );
            Ok(ScenarioOutcome {
                scenario,
                run_id: result.run_id,
                stats,
            })
        })
        .collect()
}
