use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use proxy_sync::{
    proxy::{FeedClient, ProxyChecker, ProxyFeed, ValidationPool},
    store::{ChunkedStore, SqliteBackend},
    Config, ProxySyncService,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Harvests public proxy listings and persists what changed
#[derive(Parser)]
#[command(name = "proxy-sync")]
#[command(about = "Harvests public proxy listings and persists what changed")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reconciliation loop until SIGINT/SIGTERM
    Run,
    /// Run a single reconciliation cycle and print its result
    Once,
    /// Fetch the proxy list without touching the store
    Fetch {
        /// Number of proxies to request (defaults to PROXY_LIMIT)
        #[arg(short, long)]
        limit: Option<usize>,
        /// Write the fetched records as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fetch the proxy list and validate it without touching the store
    Check {
        /// Number of proxies to request (defaults to PROXY_LIMIT)
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env()?;
    init_tracing(&config.log_level)?;

    match cli.command {
        Some(Commands::Run) | None => run(config).await?,
        Some(Commands::Once) => {
            let service = build_service(&config).await?;
            let result = service.run_cycle().await?;
            println!("{}", result);
            println!(
                "Had effect: {}",
                if result.had_effect { "yes" } else { "no" }
            );
        }
        Some(Commands::Fetch { limit, output }) => {
            let feed = FeedClient::with_config(config.feed_config())?;
            let records = feed.fetch(limit.unwrap_or(config.proxy_limit)).await?;

            println!("Fetched {} proxies", records.len());

            if let Some(output_path) = output {
                let writer = BufWriter::new(File::create(&output_path)?);
                serde_json::to_writer_pretty(writer, &records)?;
                println!("Saved proxies to {:?}", output_path);
            } else {
                for record in &records {
                    println!("{}", record);
                }
            }
        }
        Some(Commands::Check { limit }) => {
            let feed = FeedClient::with_config(config.feed_config())?;
            let records = feed.fetch(limit.unwrap_or(config.proxy_limit)).await?;

            println!("Loaded {} proxies", records.len());
            println!(
                "Checking with {} concurrent validations, timeout: {:?}",
                config.validation_concurrency, config.validation_timeout
            );

            let checker = ProxyChecker::with_config(config.checker_config());
            let pool = ValidationPool::for_checker(checker);
            let (good, bad): (Vec<_>, Vec<_>) = pool
                .validate_all(records)
                .await
                .into_iter()
                .partition(|o| o.is_valid());

            println!("Results: {} valid, {} invalid", good.len(), bad.len());
            for outcome in &good {
                if outcome.record.requires_check() {
                    println!("  {}", outcome.record);
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow!("Failed to set tracing subscriber: {}", e))
}

async fn build_service(config: &Config) -> Result<ProxySyncService> {
    let (database_url, table_name) = config.store_location()?;
    let backend = SqliteBackend::connect(database_url, table_name).await?;
    let store = ChunkedStore::new(backend);
    store.bootstrap().await?;

    let feed = FeedClient::with_config(config.feed_config())?;
    let checker = ProxyChecker::with_config(config.checker_config());
    let validation = ValidationPool::for_checker(checker);

    Ok(ProxySyncService::new(
        Arc::new(feed),
        Arc::new(store),
        validation,
        config.scheduler_config(),
    ))
}

async fn run(config: Config) -> Result<()> {
    info!("Starting proxy sync");
    let mut service = build_service(&config).await?;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let handle = tokio::spawn(async move { service.run(token).await });

    let signal = shutdown_signal().await;
    info!(signal, "Shutting down proxy sync");
    cancel.cancel();

    match tokio::time::timeout(config.shutdown_grace, handle).await {
        Ok(Ok(Err(e))) if e.is_cancelled() => info!("Proxy sync stopped"),
        Ok(Ok(Err(e))) => return Err(e.into()),
        Ok(Ok(Ok(()))) => info!("Proxy sync stopped"),
        Ok(Err(e)) => return Err(anyhow!("Proxy sync task failed: {}", e)),
        Err(_) => warn!(
            grace = ?config.shutdown_grace,
            "Cycle still running after grace period, exiting anyway"
        ),
    }

    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
