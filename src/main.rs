use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tradebot::accounting::{recompute, CapitalCheckpoint, CapitalPolicy, LedgerEvent};
use tradebot::db::PostgresStore;
use tradebot::engine::{CycleInput, TradingCycle};
use tradebot::execution::{ExchangeAdapter, PaperExchange, RateLimitedAdapter};
use tradebot::instrumentation::PrometheusSink;
use tradebot::persistence::{IdempotencyStore, InMemoryIdempotencyStore, RedisIdempotencyStore};
use tradebot::settings::Settings;

/// Spot trade lifecycle pipeline: planning, risk admission, execution and accounting.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Extra configuration file layered over config/default.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild the accounting state from a ledger event log.
    Replay(ReplayArgs),
    /// Append ledger events from a JSON file to the Postgres ledger.
    Import(ImportArgs),
    /// Run one plan/admit/execute cycle against the paper exchange.
    Cycle(CycleArgs),
}

#[derive(Parser)]
struct ReplayArgs {
    /// JSON array of ledger events. Reads from Postgres when omitted.
    #[arg(long)]
    events: Option<PathBuf>,

    /// Point in time to replay up to (RFC 3339). Defaults to now.
    #[arg(long)]
    as_of: Option<DateTime<Utc>>,

    /// JSON object of symbol -> mark price
    #[arg(long)]
    marks: Option<PathBuf>,

    /// Sweep realized profit into treasury. Against Postgres the REBALANCE event and
    /// checkpoint are persisted; with --events the plan is only printed.
    #[arg(long)]
    rebalance: bool,

    /// Last capital checkpoint (JSON) for --events replays
    #[arg(long, requires = "events")]
    checkpoint: Option<PathBuf>,
}

#[derive(Parser)]
struct ImportArgs {
    /// JSON array of ledger events
    #[arg(long)]
    events: PathBuf,
}

#[derive(Parser)]
struct CycleArgs {
    /// JSON cycle input (intents, open orders, mid prices, pnl, positions)
    #[arg(long)]
    input: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;

    match cli.command {
        Commands::Replay(args) => handle_replay(args, &settings).await,
        Commands::Import(args) => handle_import(args, &settings).await,
        Commands::Cycle(args) => handle_cycle(args, &settings).await,
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tradebot=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn connect_to_postgres(settings: &Settings) -> anyhow::Result<PostgresStore> {
    let database_url = settings
        .storage
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .context("no database_url configured and DATABASE_URL unset")?;

    PostgresStore::new(&database_url)
        .await
        .map_err(|e| anyhow::anyhow!("connecting to Postgres: {}", e))
}

async fn handle_replay(args: ReplayArgs, settings: &Settings) -> anyhow::Result<()> {
    if args.rebalance && args.events.is_none() && args.as_of.is_some() {
        anyhow::bail!("--rebalance against Postgres covers the whole ledger; drop --as-of");
    }
    let as_of = args.as_of.unwrap_or_else(Utc::now);

    let (events, store): (Vec<LedgerEvent>, Option<PostgresStore>) = match &args.events {
        Some(path) => (read_json(path)?, None),
        None => {
            let store = connect_to_postgres(settings).await?;
            let events = store
                .load_ledger_events(Some(as_of))
                .await
                .map_err(|e| anyhow::anyhow!("loading ledger events: {}", e))?;
            (events, Some(store))
        }
    };

    let marks: HashMap<String, Decimal> = match &args.marks {
        Some(path) => read_json(path)?,
        None => HashMap::new(),
    };

    tracing::info!("Replaying {} ledger events as of {}", events.len(), as_of);

    let state = recompute(
        &events,
        as_of,
        &marks,
        settings.capital.initial_trading_capital_try,
        settings.capital.initial_treasury_try,
    )?;

    if !args.rebalance {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    let policy = CapitalPolicy::new(settings.capital.treasury_share)?;
    let plan = match &store {
        Some(store) => store
            .apply_rebalance(&policy, &state, as_of)
            .await
            .map_err(|e| anyhow::anyhow!("persisting rebalance: {}", e))?,
        None => {
            let previous: Option<CapitalCheckpoint> = match &args.checkpoint {
                Some(path) => Some(read_json(path)?),
                None => None,
            };
            policy.rebalance_since(&state, previous.as_ref(), state.events_applied as u64, as_of)?
        }
    };

    if plan.is_none() {
        tracing::info!("No ledger events since the last capital checkpoint; nothing to sweep");
    }
    let output = serde_json::json!({
        "state": state,
        "rebalance_event": plan.as_ref().and_then(|p| p.event.as_ref()),
        "checkpoint": plan.as_ref().map(|p| &p.checkpoint),
        "persisted": store.is_some() && plan.is_some(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

async fn handle_import(args: ImportArgs, settings: &Settings) -> anyhow::Result<()> {
    let events: Vec<LedgerEvent> = read_json(&args.events)?;
    let store = connect_to_postgres(settings).await?;

    let mut inserted = 0;
    for event in &events {
        if store
            .append_ledger_event(event)
            .await
            .map_err(|e| anyhow::anyhow!("appending {}: {}", event.event_id, e))?
        {
            inserted += 1;
        }
    }

    tracing::info!(
        "Imported {} of {} ledger events ({} already recorded)",
        inserted,
        events.len(),
        events.len() - inserted
    );
    Ok(())
}

async fn handle_cycle(args: CycleArgs, settings: &Settings) -> anyhow::Result<()> {
    let input: CycleInput = read_json(&args.input)?;

    let paper = Arc::new(PaperExchange::new().with_fee_bps(settings.risk.fee_bps));
    for order in &input.open_orders {
        paper.seed_order(order.clone());
    }
    let adapter: Arc<dyn ExchangeAdapter> = match settings.rate_limit {
        Some(budget) => Arc::new(RateLimitedAdapter::new(paper.clone(), budget)),
        None => paper.clone(),
    };

    let idempotency: Arc<dyn IdempotencyStore> = match &settings.storage.redis_url {
        Some(url) => match RedisIdempotencyStore::new(url).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!(
                    "Failed to connect to Redis ({}), using in-memory idempotency keys",
                    e
                );
                Arc::new(InMemoryIdempotencyStore::new())
            }
        },
        None => Arc::new(InMemoryIdempotencyStore::new()),
    };

    let metrics = Arc::new(PrometheusSink::new());
    let cycle = TradingCycle::from_settings(settings, adapter, idempotency, metrics.clone());
    let report = cycle.run(&input).await?;
    tracing::debug!("Cycle metrics:\n{}", metrics.render());

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
