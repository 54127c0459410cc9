use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};

use polysync_rs::catalog::{CatalogSyncer, SyncOutcome};
use polysync_rs::config::Settings;
use polysync_rs::market_data::cache::OrderBookCache;
use polysync_rs::market_data::polymarket::PolymarketSource;
use polysync_rs::market_data::{MarketDataSource, OrderBookSnapshot};
use polysync_rs::persist::memory::MemoryStore;
use polysync_rs::persist::postgres::PostgresCatalogStore;
use polysync_rs::persist::CatalogStore;
use polysync_rs::retry::RetryingClient;
use polysync_rs::tasks::{self, TaskEvent, TaskOutcome};
use polysync_rs::telemetry;

#[derive(Debug, Parser)]
#[command(name = "polysync", version, about = "Polymarket catalog syncer and order-book cache")]
struct Cli {
    /// Settings file (defaults to ./polysync.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `database_url` from settings and DATABASE_URL
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Periodic catalog sync plus order-book cache maintenance until ctrl-c
    Run,
    /// One full catalog pass, then exit
    SyncOnce {
        /// Write into an in-memory store instead of Postgres
        #[arg(long)]
        dry_run: bool,
    },
    /// Fetch one order book and print its top of book
    Book { token_id: String },
}

// Helper function to print a book summary
fn print_book_summary(book: &OrderBookSnapshot) {
    println!("\n=== Order Book: {} ===", book.token_id);
    if let Some(market) = &book.market {
        println!("Market: {}", market);
    }
    println!("Bid levels: {}, Ask levels: {}", book.bids.len(), book.asks.len());

    match book.best_bid() {
        Some(level) => println!("Best bid: {} @ {}", level.size, level.price),
        None => println!("Best bid: None"),
    }
    match book.best_ask() {
        Some(level) => println!("Best ask: {} @ {}", level.size, level.price),
        None => println!("Best ask: None"),
    }
    match (book.mid(), book.spread()) {
        (Some(mid), Some(spread)) => println!("Mid: {:.4}, Spread: {:.4}", mid, spread),
        _ => println!("Mid: N/A, Spread: N/A"),
    }
    println!("========================\n");
}

// Periodic tasks already log their own failures; this only counts runs.
fn count_task_runs(mut events: broadcast::Receiver<TaskEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let outcome = match event.outcome {
                        TaskOutcome::Completed => "completed",
                        TaskOutcome::Skipped => "skipped",
                        TaskOutcome::Failed(_) => "failed",
                    };
                    metrics::counter!("polysync_task_runs_total", "task" => event.task, "outcome" => outcome)
                        .increment(1);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => warn!(missed, "task event listener lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn postgres_store(settings: &Settings) -> anyhow::Result<Arc<PostgresCatalogStore>> {
    let Some(url) = settings.database_url.as_deref() else {
        bail!("no database url: set database_url, POLYSYNC__DATABASE_URL, DATABASE_URL or --database-url");
    };
    let store = PostgresCatalogStore::connect(url, settings.database_max_connections)
        .await
        .context("connecting to catalog database")?;
    store.ensure_schema().await.context("creating catalog schema")?;
    Ok(Arc::new(store))
}

fn market_source(settings: &Settings) -> anyhow::Result<Arc<dyn MarketDataSource>> {
    let upstream = &settings.upstream;
    let source = PolymarketSource::with_endpoints(&upstream.gamma_url, &upstream.clob_url, upstream.timeout())
        .context("building http client")?;
    Ok(Arc::new(source))
}

fn order_book_cache(settings: &Settings, source: Arc<dyn MarketDataSource>, retry: RetryingClient) -> Arc<OrderBookCache> {
    Arc::new(
        OrderBookCache::with_ttls(source, retry, settings.cache.ttls())
            .with_refresh_concurrency(settings.cache.refresh_concurrency),
    )
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let store = postgres_store(&settings).await?;
    let source = market_source(&settings)?;
    let retry = RetryingClient::new(settings.retry.clone());

    let syncer = Arc::new(CatalogSyncer::new(
        Arc::clone(&source),
        store,
        retry.clone(),
        settings.sync.syncer_config(),
    ));
    let sync_listener = count_task_runs(syncer.subscribe());
    syncer.start();

    let cache = order_book_cache(&settings, source, retry);
    for token_id in &settings.cache.hot_tokens {
        cache.mark_hot(token_id);
    }
    let warmed = cache.prefetch(&settings.cache.hot_tokens).await;
    info!(hot = cache.hot_len(), warmed, "order book cache ready");

    let cache_events = tasks::event_channel();
    let cache_listener = count_task_runs(cache_events.subscribe());
    let (refresh, cleanup) = cache.start_maintenance(
        settings.cache.refresh_interval(),
        settings.cache.cleanup_interval(),
        cache_events,
    );

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down");

    syncer.stop();
    refresh.shutdown().await;
    cleanup.shutdown().await;
    cache_listener.await.ok();
    // the stopped sync timer may still hold a sender while its last pass winds down
    sync_listener.abort();
    Ok(())
}

async fn sync_once(settings: Settings, dry_run: bool) -> anyhow::Result<()> {
    let source = market_source(&settings)?;
    let memory = Arc::new(MemoryStore::new());
    let store: Arc<dyn CatalogStore> = if dry_run {
        memory.clone()
    } else {
        postgres_store(&settings).await?
    };

    let syncer = CatalogSyncer::new(
        source,
        store,
        RetryingClient::new(settings.retry.clone()),
        settings.sync.syncer_config(),
    );
    match syncer.sync_all().await? {
        SyncOutcome::Completed(report) => {
            println!(
                "Synced {} events and {} markets over {} pages in {:.1}s ({} items skipped)",
                report.events,
                report.markets,
                report.pages,
                report.duration.as_secs_f64(),
                report.skipped_items
            );
            if dry_run {
                println!("Dry run: {} events, {} markets held in memory", memory.event_count(), memory.market_count());
            }
        }
        SyncOutcome::Skipped => println!("Sync already in progress"),
    }
    Ok(())
}

async fn show_book(settings: Settings, token_id: String) -> anyhow::Result<()> {
    let source = market_source(&settings)?;
    let cache = order_book_cache(&settings, source, RetryingClient::new(settings.retry.clone()));
    let book = cache
        .get_order_book(&token_id)
        .await
        .with_context(|| format!("fetching order book for {token_id}"))?;
    print_book_summary(&book);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok(); // load .env

    let cli = Cli::parse();
    let mut settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    if cli.database_url.is_some() {
        settings.database_url = cli.database_url;
    }

    telemetry::init_tracing(&settings.log_filter);
    telemetry::init_metrics(settings.metrics_port)?;

    match cli.command {
        Command::Run => run(settings).await,
        Command::SyncOnce { dry_run } => sync_once(settings, dry_run).await,
        Command::Book { token_id } => show_book(settings, token_id).await,
    }
}
