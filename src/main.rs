use std::io::{self, BufRead};
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use roundstats::{
    logging, AggregateRecord, GameEvent, HitLocation, Identity, ScalarField, SqliteStore, StatsHandle,
    StatsStore, Tracker, TrackerConfig,
};

#[derive(Parser)]
#[command(author, version, about = "Per-player gameplay statistics")]
struct Cli {
    /// Path to the JSON configuration file. Created with defaults if missing.
    #[arg(long, default_value = "roundstats.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest newline-delimited JSON events from stdin until EOF or Ctrl-C
    Run,
    /// Print one player's stored stats
    Show { identity: String },
    /// Rank players by a stat
    Top {
        /// kills, deaths, assists, headshots, rounds_played, damage_dealt, damage_taken
        #[arg(long, default_value = "kills")]
        field: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Delete one player's stored stats
    Reset { identity: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let Cli { config, command } = Cli::parse();

    let config_path = config;
    let config = TrackerConfig::load_or_create(&config_path)
        .with_context(|| format!("failed loading {}", config_path.display()))?;
    logging::init(&config.log_filter);

    match command {
        Commands::Run => run(config).await?,
        Commands::Show { identity } => show(&config, Identity::new(identity))?,
        Commands::Top { field, limit } => top(&config, &field, limit)?,
        Commands::Reset { identity } => reset(&config, Identity::new(identity))?,
    }

    Ok(())
}

fn open_store(config: &TrackerConfig) -> Result<SqliteStore> {
    SqliteStore::open(&config.database_path)
        .with_context(|| format!("failed opening {}", config.database_path.display()))
}

// =============================================================================
// run
// =============================================================================

async fn run(config: TrackerConfig) -> Result<()> {
    let store = open_store(&config)?;
    let mut tracker = Tracker::new(store, config.clone());
    let handle = tracker.handle();

    let (eof_tx, mut eof_rx) = oneshot::channel::<usize>();
    thread::Builder::new()
        .name("roundstats-stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            let count = read_events(stdin.lock(), &handle);
            let _ = eof_tx.send(count);
        })
        .context("failed spawning stdin reader")?;

    let mut ticker = tokio::time::interval(config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(
        database = %config.database_path.display(),
        tick_ms = config.tick_interval_ms,
        "tracker running"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tracker.tick();
            }
            count = &mut eof_rx => {
                info!(events = count.unwrap_or(0), "input closed");
                break;
            }
            res = &mut ctrl_c => {
                if let Err(err) = res {
                    warn!("failed to listen for ctrl-c: {err}");
                }
                info!("interrupt received");
                break;
            }
        }
    }

    let written = tracker.shutdown().context("shutdown flush lost data")?;
    info!(written, "shutdown complete");
    Ok(())
}

/// Parses one event per line and submits it. Bad lines are logged and skipped.
fn read_events<R: BufRead, S: StatsStore + 'static>(reader: R, handle: &StatsHandle<S>) -> usize {
    let mut submitted = 0;
    for (idx, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("stdin read failed: {err}");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<GameEvent>(trimmed) {
            Ok(event) => {
                debug!(line = idx + 1, event = event.kind(), "event");
                handle.submit(event);
                submitted += 1;
            }
            Err(err) => warn!(line = idx + 1, "skipping malformed event: {err}"),
        }
    }
    submitted
}

// =============================================================================
// queries
// =============================================================================

fn show(config: &TrackerConfig, identity: Identity) -> Result<()> {
    let mut store = open_store(config)?;
    match store.load(&identity)? {
        Some(record) => print_record(&record),
        None => println!("no stats for {identity}"),
    }
    Ok(())
}

fn top(config: &TrackerConfig, field: &str, limit: usize) -> Result<()> {
    let field: ScalarField = field.parse()?;
    let mut store = open_store(config)?;
    let rows = store.top(field, limit)?;
    if rows.is_empty() {
        println!("no stats recorded");
        return Ok(());
    }
    for (rank, record) in rows.iter().enumerate() {
        println!(
            "{:>3}. {:<24} {:>8} {}",
            rank + 1,
            record.display_name,
            record.scalar(field),
            record.identity
        );
    }
    Ok(())
}

fn reset(config: &TrackerConfig, identity: Identity) -> Result<()> {
    let mut store = open_store(config)?;
    if store.reset(&identity)? {
        println!("reset stats for {identity}");
    } else {
        println!("no stats for {identity}");
    }
    Ok(())
}

fn print_record(record: &AggregateRecord) {
    println!("{} ({})", record.display_name, record.identity);
    println!("  last updated: {}", record.last_updated.to_rfc3339());
    for field in ScalarField::ALL {
        println!("  {:<14} {}", field.name(), record.scalar(field));
    }
    if record.weapons.is_empty() {
        return;
    }
    println!("  {:<14} {:>6} {:>6} {:>6} {:>6}", "weapon", "kills", "deaths", "assist", "hs");
    for (category, c) in &record.weapons {
        println!(
            "  {:<14} {:>6} {:>6} {:>6} {:>6}",
            category.key(),
            c.kills,
            c.deaths,
            c.assists,
            c.headshots()
        );
        let by_location: Vec<String> = HitLocation::ALL
            .iter()
            .filter(|loc| c.location(**loc) > 0)
            .map(|loc| format!("{}={}", loc.column(), c.location(*loc)))
            .collect();
        if !by_location.is_empty() {
            println!("  {:<14} {}", "", by_location.join(" "));
        }
    }
}
