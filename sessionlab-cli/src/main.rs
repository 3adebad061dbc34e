//! SessionLab CLI: run and config-validation commands.
//!
//! Commands:
//! - `run`: load bars and bias data, backtest a TOML config, write artifacts
//! - `validate-config`: parse and validate a TOML config without running

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sessionlab_runner::{
    build_bias_store, load_universe, run_backtest, run_scenarios, save_artifacts, BacktestConfig,
    BacktestResult, BiasSources, RunSummary, SkipReason, StatsSummary,
};

/// The 28 pairs formed by the eight majors, used when `--pairs` is omitted.
const DEFAULT_PAIRS: [&str; 28] = [
    "EURUSD", "GBPUSD", "AUDUSD", "NZDUSD", "USDJPY", "USDCHF", "USDCAD", "EURGBP", "EURJPY",
    "EURCHF", "EURAUD", "EURNZD", "EURCAD", "GBPJPY", "GBPCHF", "GBPAUD", "GBPNZD", "GBPCAD",
    "AUDJPY", "AUDCHF", "AUDCAD", "AUDNZD", "NZDJPY", "NZDCHF", "NZDCAD", "CADJPY", "CADCHF",
    "CHFJPY",
];

#[derive(Parser)]
#[command(
    name = "sessionlab",
    about = "SessionLab CLI: session-based intraday FX backtester"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Backtest a TOML config over a date range and save artifacts.
    Run(RunArgs),
    /// Parse and validate a TOML config, then print its run id.
    ValidateConfig {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Path to a TOML config file.
    #[arg(long)]
    config: PathBuf,

    /// First trading day (YYYY-MM-DD).
    #[arg(long)]
    start: NaiveDate,

    /// Last trading day, inclusive (YYYY-MM-DD).
    #[arg(long)]
    end: NaiveDate,

    /// Comma-separated pairs. Defaults to the 28 major pairs and crosses.
    #[arg(long, value_delimiter = ',')]
    pairs: Vec<String>,

    /// Root directory holding bar CSV files.
    #[arg(long, default_value = "data/ohlc")]
    bars_dir: PathBuf,

    /// Directory of positioning report snapshots (*.json).
    #[arg(long)]
    cot_dir: Option<PathBuf>,

    /// Single positioning report snapshot.
    #[arg(long)]
    cot_file: Option<PathBuf>,

    /// Sentiment JSON files (repeatable).
    #[arg(long)]
    sentiment: Vec<PathBuf>,

    /// Output directory; artifacts go in a per-run subdirectory.
    #[arg(long, default_value = "results")]
    output_dir: PathBuf,

    /// Also run the spread / slippage sensitivity scenarios.
    #[arg(long, default_value_t = false)]
    scenarios: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run_backtest_cmd(args),
        Commands::ValidateConfig { config } => validate_config_cmd(&config),
    }
}

fn load_config(path: &Path) -> Result<BacktestConfig> {
    BacktestConfig::from_file(path)
        .with_context(|| format!("failed to load config: {}", path.display()))
}

fn validate_config_cmd(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let resolved = config
        .validate()
        .with_context(|| format!("invalid config: {}", path.display()))?;
    println!("Config OK: {}", path.display());
    println!("Run ID:         {}", resolved.run_id);
    println!("Entry model:    {}", resolved.model.kind().as_str());
    println!(
        "Entry session:  {} ({} - {}, {})",
        resolved.entry_window.name,
        resolved.entry_window.start.format("%H:%M"),
        resolved.entry_window.end.format("%H:%M"),
        resolved.timezone
    );
    Ok(())
}

fn run_backtest_cmd(args: RunArgs) -> Result<()> {
    if args.start > args.end {
        anyhow::bail!("--start {} is after --end {}", args.start, args.end);
    }

    let config = load_config(&args.config)?;
    let resolved = config
        .validate()
        .with_context(|| format!("invalid config: {}", args.config.display()))?;

    let pairs: Vec<String> = if args.pairs.is_empty() {
        DEFAULT_PAIRS.iter().map(|p| p.to_string()).collect()
    } else {
        args.pairs
            .iter()
            .map(|p| p.trim().to_ascii_uppercase())
            .filter(|p| !p.is_empty())
            .collect()
    };

    let universe = load_universe(&args.bars_dir, &pairs, &config.timeframe)
        .with_context(|| format!("failed to load bars from {}", args.bars_dir.display()))?;
    let store = build_bias_store(&BiasSources {
        report_dir: args.cot_dir.clone(),
        report_file: args.cot_file.clone(),
        sentiment_files: args.sentiment.clone(),
    })
    .context("failed to load bias data")?;
    info!(
        instruments = universe.len(),
        bias_records = store.bias_record_count(),
        sentiment_records = store.sentiment_record_count(),
        "inputs loaded"
    );

    let result = run_backtest(&universe, &store, &resolved, args.start, args.end);

    let scenarios = if args.scenarios {
        run_scenarios(&config, &universe, &store, args.start, args.end)
            .context("failed to run sensitivity scenarios")?
    } else {
        Vec::new()
    };

    let summary = RunSummary::build(&result, &universe, scenarios);
    print_summary(&result, &summary.overall);

    let run_dir = args
        .output_dir
        .join(result.run_id.get(..16).unwrap_or(&result.run_id));
    save_artifacts(&result, &summary, &config, &run_dir)?;
    println!("Artifacts saved to: {}", run_dir.display());

    Ok(())
}

fn print_summary(result: &BacktestResult, stats: &StatsSummary) {
    println!();
    println!("=== Backtest Result ===");
    println!("Run ID:         {}", result.run_id);
    println!("Period:         {} to {}", result.start, result.end);
    println!("Instruments:    {}", result.instruments.join(", "));
    println!("Pair-days:      {}", result.pair_days);
    println!("Trades:         {}", stats.trades);
    println!();
    println!("--- Performance (R) ---");
    println!("Net R:          {:.2}", stats.net_r);
    println!("Avg R:          {:.3}", stats.avg_r);
    println!("Profit Factor:  {:.2}", stats.profit_factor);
    println!("Max Drawdown:   {:.2}", stats.max_drawdown_r);
    println!("Win Rate:       {:.1}%", stats.win_rate_pct);
    println!("Max Consec Loss:{}", stats.max_consecutive_losses);
    println!();
    println!("--- Coverage ---");
    println!(
        "Missing bias:      {} ({:.1}%)",
        result.missing_cot_days, stats.missing_bias_pct
    );
    println!(
        "Missing sentiment: {} ({:.1}%)",
        result.missing_sentiment_days, stats.missing_sentiment_pct
    );
    let skipped: Vec<String> = result
        .skips
        .iter()
        .map(|(reason, n)| format!("{}={n}", SkipReason::as_str(*reason)))
        .collect();
    if !skipped.is_empty() {
        println!("Skipped days:      {}", skipped.join(", "));
    }
    println!();
}
