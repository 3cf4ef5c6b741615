//! shellcache - offline app-shell cache
//!
//! Host adapter: parses the command line, builds an asset cache manager over
//! the on-disk store and the real network, and dispatches one lifecycle event.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use shellcache::cli::{Cli, CliError, Command, FetchArgs};
use shellcache::{
    AssetCacheManager, CacheEvent, DiskStorage, FetchOutcome, HttpNetwork,
    LifecycleHandler, Network,
};

/// How long `fetch` waits for the background cache write before exiting
const STORE_WAIT: Duration = Duration::from_secs(10);

type BoxError = Box<dyn std::error::Error>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let config = cli.load_config()?;

    let storage = match &cli.cache_dir {
        Some(dir) => DiskStorage::with_dir(dir.clone()),
        None => DiskStorage::new().ok_or(CliError::NoCacheDir)?,
    };
    debug!(root = %storage.root().display(), "using cache directory");

    let network = Arc::new(HttpNetwork::new(&config.scope));
    let manager = AssetCacheManager::new(config, Arc::new(storage), network.clone());

    match cli.command {
        Command::Install => {
            let report = manager.on_install().await?;
            println!("Cached {} assets into {}", report.cached, report.cache_name);
        }
        Command::Activate => {
            let report = manager.on_activate().await?;
            for name in &report.deleted {
                println!("Deleted old cache {}", name);
            }
            println!("Active cache: {}", manager.cache_name());
        }
        Command::Fetch(args) => fetch(&manager, network.as_ref(), &args).await?,
        Command::List => list(&manager).await?,
    }

    Ok(())
}

async fn fetch(
    manager: &AssetCacheManager,
    network: &dyn Network,
    args: &FetchArgs,
) -> Result<(), BoxError> {
    let request = args.to_request(&manager.config().scope)?;
    let mut events = manager.subscribe();

    let (mut response, source) = match manager.on_fetch(request).await? {
        FetchOutcome::Passthrough(request) => {
            (network.fetch(&request).await?, "network (not intercepted)")
        }
        FetchOutcome::Cached(response) => (response, "cache"),
        FetchOutcome::Network { response, caching } => {
            if caching {
                wait_for_store(&mut events).await;
                (response, "network, now cached")
            } else {
                (response, "network")
            }
        }
    };

    println!(
        "{} {} [{}] from {}",
        response.status, response.status_text, response.kind, source
    );

    let body = response.bytes()?;
    match &args.output {
        Some(path) => {
            tokio::fs::write(path, &body).await?;
            println!("Wrote {} bytes to {}", body.len(), path.display());
        }
        None => println!("{} bytes", body.len()),
    }
    Ok(())
}

/// Keeps the process alive until the background write reports back
async fn wait_for_store(events: &mut broadcast::Receiver<CacheEvent>) {
    match tokio::time::timeout(STORE_WAIT, events.recv()).await {
        Ok(Ok(CacheEvent::Stored { key, .. })) => debug!(key = %key, "cache write finished"),
        Ok(Ok(CacheEvent::StoreFailed { key, error, .. })) => {
            warn!(key = %key, %error, "response was not cached")
        }
        Ok(Err(e)) => warn!(error = %e, "lost cache write notification"),
        Err(_) => warn!("timed out waiting for cache write"),
    }
}

async fn list(manager: &AssetCacheManager) -> Result<(), BoxError> {
    let storage = manager.storage();
    let names = storage.keys().await?;
    if names.is_empty() {
        println!("No caches");
        return Ok(());
    }

    for name in names {
        let count = storage.entries(&name).await?.len();
        let marker = if name == manager.cache_name() { "*" } else { " " };
        println!("{} {} ({} entries)", marker, name, count);
    }
    Ok(())
}
