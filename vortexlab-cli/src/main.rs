//! VortexLab CLI: replay and simulate live trading sessions.
//!
//! Commands:
//! - `replay`: warm up from candle CSVs, then push a tick CSV through the feed
//! - `simulate`: warm up and trade against a seeded random-walk feed
//! - `check-config`: load, validate and print the effective config
//!
//! Snapshots go to stdout as JSON lines; logs go to stderr.

mod feeds;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vortexlab_core::data::{
    parse_timestamp, CandleSource, CsvSource, FetchRange, MemorySource, SourceError,
};
use vortexlab_core::domain::{Candle, Instrument};
use vortexlab_core::engine::{Session, SessionSummary, WarmupSources};
use vortexlab_core::feed::FeedEvent;
use vortexlab_core::EngineConfig;

use feeds::{read_ticks, JsonLinesSink, RandomWalk, ScriptedFeed};

#[derive(Parser)]
#[command(
    name = "vortexlab",
    about = "VortexLab CLI: live candle reconciliation and Vortex strategy sessions"
)]
struct Cli {
    /// Log as JSON instead of human-readable text.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded session from CSV files.
    Replay {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Historical candles as SYMBOL=PATH (repeatable).
        #[arg(long, value_parser = parse_symbol_path)]
        historical: Vec<(String, PathBuf)>,

        /// Same-day candles as SYMBOL=PATH (repeatable).
        #[arg(long, value_parser = parse_symbol_path)]
        intraday: Vec<(String, PathBuf)>,

        /// Tick CSV: timestamp,instrument,ltp[,volume].
        #[arg(long)]
        ticks: PathBuf,

        /// Session start ("YYYY-MM-DD HH:MM[:SS]"). Defaults to the first tick.
        #[arg(long)]
        start: Option<String>,

        /// Delay between ticks in microseconds.
        #[arg(long, default_value_t = 0)]
        pace_us: u64,
    },
    /// Run against a seeded random-walk feed.
    Simulate {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// RNG seed.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Session start ("YYYY-MM-DD HH:MM[:SS]").
        #[arg(long, default_value = "2024-03-04 09:15:00")]
        start: String,

        /// Starting price for every instrument.
        #[arg(long, default_value_t = 100.0)]
        price: f64,

        /// Per-step relative volatility of the walk.
        #[arg(long, default_value_t = 0.002)]
        volatility: f64,

        /// Warm-up bars generated before the start.
        #[arg(long, default_value_t = 60)]
        history_bars: usize,

        /// Simulated session length in minutes.
        #[arg(long, default_value_t = 120)]
        minutes: i64,

        /// Seconds between simulated ticks.
        #[arg(long, default_value_t = 15)]
        tick_secs: i64,
    },
    /// Load, validate and print the effective config.
    CheckConfig {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Commands::Replay {
            config,
            historical,
            intraday,
            ticks,
            start,
            pace_us,
        } => run_replay(&config, historical, intraday, &ticks, start, pace_us),
        Commands::Simulate {
            config,
            seed,
            start,
            price,
            volatility,
            history_bars,
            minutes,
            tick_secs,
        } => run_simulate(
            &config,
            seed,
            &start,
            price,
            volatility,
            history_bars,
            minutes,
            tick_secs,
        ),
        Commands::CheckConfig { config } => run_check_config(&config),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn parse_symbol_path(s: &str) -> Result<(String, PathBuf), String> {
    match s.split_once('=') {
        Some((sym, path)) if !sym.is_empty() && !path.is_empty() => {
            Ok((sym.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected SYMBOL=PATH, got '{s}'")),
    }
}

fn load_config(path: &Path) -> Result<EngineConfig> {
    EngineConfig::from_file(path).with_context(|| format!("loading config {}", path.display()))
}

fn run_replay(
    config_path: &Path,
    historical: Vec<(String, PathBuf)>,
    intraday: Vec<(String, PathBuf)>,
    ticks_path: &Path,
    start: Option<String>,
    pace_us: u64,
) -> Result<()> {
    let config = load_config(config_path)?;

    let ticks = read_ticks(ticks_path)?;
    let start = match start.as_deref() {
        Some(s) => parse_timestamp(s)?,
        None => match ticks.first() {
            Some(t) => t.timestamp,
            None => bail!("{} has no ticks and no --start was given", ticks_path.display()),
        },
    };

    let mut hist = CsvSource::new("historical");
    for (sym, path) in historical {
        hist = hist.with_file(sym, path);
    }
    let mut intra = CsvSource::new("intraday");
    for (sym, path) in intraday {
        intra = intra.with_file(sym, path);
    }
    // Instruments without a file warm up empty.
    let (hist, intra) = fill_missing(&config, hist, intra);

    let events = ticks.into_iter().map(FeedEvent::Tick).collect();
    let feed = ScriptedFeed::new("replay", events, Duration::from_micros(pace_us));
    run_session(config, &hist, &intra, feed, start)
}

/// Back every instrument that has no CSV with an empty in-memory source.
fn fill_missing(
    config: &EngineConfig,
    hist: CsvSource,
    intra: CsvSource,
) -> (FallbackSource, FallbackSource) {
    let mut empty = MemorySource::new("empty");
    for inst in config.all_instruments() {
        empty = empty.with_candles(&inst.symbol, Vec::new());
    }
    (
        FallbackSource { primary: hist, fallback: empty.clone() },
        FallbackSource { primary: intra, fallback: empty },
    )
}

/// CSV first, empty when the CSV source does not know the symbol.
struct FallbackSource {
    primary: CsvSource,
    fallback: MemorySource,
}

impl CandleSource for FallbackSource {
    fn name(&self) -> &str {
        self.primary.name()
    }

    fn fetch(
        &self,
        instrument: &Instrument,
        range: &FetchRange,
    ) -> Result<Vec<Candle>, SourceError> {
        match self.primary.fetch(instrument, range) {
            Err(SourceError::UnknownInstrument { .. }) => {
                self.fallback.fetch(instrument, range)
            }
            other => other,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_simulate(
    config_path: &Path,
    seed: u64,
    start: &str,
    price: f64,
    volatility: f64,
    history_bars: usize,
    minutes: i64,
    tick_secs: i64,
) -> Result<()> {
    if tick_secs <= 0 || minutes <= 0 {
        bail!("--minutes and --tick-secs must be positive");
    }
    let config = load_config(config_path)?;
    let start = parse_timestamp(start)?;
    let interval = config.session.bar_interval_minutes;

    let mut walk = RandomWalk::new(seed, volatility);
    let mut history = MemorySource::new("simulated-history");
    let mut starts = Vec::new();
    for inst in config.all_instruments() {
        let bars = walk.history(inst, price, start, interval, history_bars);
        let last = bars.last().map_or(price, |c| c.close);
        history = history.with_candles(&inst.symbol, bars);
        starts.push((inst.clone(), last));
    }

    let events = walk.ticks(
        &starts,
        start,
        chrono::Duration::seconds(tick_secs),
        chrono::Duration::minutes(minutes),
    );
    let feed = ScriptedFeed::new("simulated", events, Duration::ZERO);
    run_session(config, &history, &history, feed, start)
}

fn run_session(
    config: EngineConfig,
    historical: &dyn CandleSource,
    intraday: &dyn CandleSource,
    feed: ScriptedFeed,
    start: NaiveDateTime,
) -> Result<()> {
    let finished = feed.finished_flag();
    let sink = JsonLinesSink::new(std::io::stdout());
    let session = Session::start(
        config,
        WarmupSources { historical, intraday },
        Box::new(feed),
        Box::new(sink),
        start,
    )?;

    wait_for_feed(&session, &finished);
    let summary = session.stop();
    report(&summary);
    Ok(())
}

fn wait_for_feed(session: &Session, finished: &Arc<AtomicBool>) {
    while !finished.load(Ordering::Acquire) || session.feed_stats().queued > 0 {
        thread::sleep(Duration::from_millis(10));
    }
}

fn report(summary: &SessionSummary) {
    let realized: f64 = summary
        .positions
        .iter()
        .filter(|p| !p.is_open())
        .map(|p| p.pnl())
        .sum();
    for p in &summary.positions {
        info!(
            id = %p.id,
            leg = p.symbol(),
            entry = p.entry_price,
            exit = ?p.exit_price,
            reason = ?p.exit_reason,
            pnl = p.pnl(),
            "position"
        );
    }
    info!(
        status = ?summary.view.bot_status,
        positions = summary.positions.len(),
        realized_pnl = realized,
        ticks_delivered = summary.feed.delivered,
        ticks_dropped = summary.feed.dropped,
        snapshots = summary.snapshots_sent,
        discarded_signals = summary.view.discarded_signals,
        "session summary"
    );
}

fn run_check_config(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    println!("{}", config.to_toml()?);
    eprintln!(
        "config OK: {} closed bars needed for indicators, candle gate at {}",
        config.required_bars(),
        config.session.min_warmup_bars
    );
    Ok(())
}
