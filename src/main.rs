use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use stock_pipeline::cli::{Cli, Commands};
use stock_pipeline::config::StoreConfig;
use stock_pipeline::dashboard::{self, DashboardFilters, Metric};
use stock_pipeline::fetch::QuoteFetcher;
use stock_pipeline::ingest::{BatchIngestor, IngestJob};
use stock_pipeline::queries::QueryCatalog;
use stock_pipeline::scheduler::CycleScheduler;
use stock_pipeline::store::EsStore;
use stock_pipeline::symbols;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest { ref symbols_file } => run_ingest(symbols_file).await,
        Commands::Dashboard {
            ref symbols,
            hours,
            ref metric,
            watch,
        } => run_dashboard(symbols, hours, metric, watch).await,
        Commands::FetchSymbols { ref output } => run_fetch_symbols(output).await,
    }
}

/// Resolve the store configuration and verify connectivity. Any failure
/// here is startup-fatal; there is no retry.
async fn connect_store() -> Result<EsStore> {
    let config = StoreConfig::from_env().context("Store configuration is incomplete")?;
    let store = EsStore::new(config)?;

    if !store.ping().await {
        anyhow::bail!("Failed to connect to the store. Check ES_URL and credentials.");
    }
    info!("Connected to store, index {}", store.index());

    Ok(store)
}

async fn run_ingest(symbols_file: &str) -> Result<()> {
    let store = connect_store().await?;

    let symbols = symbols::load_symbols(symbols_file)
        .with_context(|| format!("Failed to load symbol file {}", symbols_file))?;
    info!("Loaded {} symbols", symbols.len());

    let fetcher = QuoteFetcher::new()?;
    let ingestor = BatchIngestor::new(Arc::new(fetcher), Arc::new(store));
    let job = IngestJob { ingestor, symbols };

    // Runs until the process is terminated.
    CycleScheduler::new().run(&job, None).await;
    Ok(())
}

async fn run_dashboard(symbols: &[String], hours: i64, metric: &str, watch: bool) -> Result<()> {
    let metric = Metric::parse(metric)?;
    let store = connect_store().await?;

    let catalog = QueryCatalog::new(store);
    let filters = DashboardFilters {
        symbols: symbols.to_vec(),
        hours,
        metric,
    };

    dashboard::run(&catalog, &filters, watch).await;
    Ok(())
}

async fn run_fetch_symbols(output: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to construct listing HTTP client")?;

    let universe = symbols::fetch_symbol_universe(&client)
        .await
        .context("Failed to download symbol listings")?;
    symbols::save_symbols(output, &universe)
        .with_context(|| format!("Failed to write symbol file {}", output))?;

    println!("Total unique symbols: {}", universe.len());
    println!("First 10 symbols:");
    for symbol in universe.iter().take(10) {
        println!("  {}", symbol);
    }
    println!("Saved to {}", output);

    Ok(())
}
