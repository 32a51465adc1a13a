//! citycast - cached city weather service
//!
//! Loads the weather snapshot, catches up on stale data and keeps the cache
//! fresh in the background until interrupted.

use std::error::Error;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use citycast::cli::{Cli, StartupConfig};
use citycast::data::{all_seed_cities, HttpUpstream};
use citycast::{RefreshHandle, Scheduler, SnapshotStore};

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("citycast=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn wait_for_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let config = StartupConfig::from_cli(cli)?;

    init_tracing();

    let store = SnapshotStore::new(&config.snapshot_path);
    let cache = if config.bootstrap {
        store.load_or_bootstrap(all_seed_cities())?
    } else {
        store.load()?
    };
    let cache = Arc::new(cache);

    let upstream = Arc::new(HttpUpstream::new(&config.upstream)?);
    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&cache),
        upstream,
        store,
        config.refresh.clone(),
    ));

    // Stale data is still worth serving; the scheduler retries on its next tick
    if let Err(e) = scheduler.catch_up(Utc::now()).await {
        warn!(error = %e, "startup refresh failed, serving cached data");
    }

    if config.once {
        for line in cache.get_cities() {
            println!("{line}");
        }
        return Ok(());
    }

    let handle = RefreshHandle::spawn(Arc::clone(&scheduler));
    info!("weather service started");

    wait_for_signal().await?;
    info!("shutting down weather service");

    if let Err(e) = handle.shutdown().await {
        error!(error = %e, "weather service stopped with an error");
    }
    scheduler.save();

    info!("weather service gracefully stopped");
    Ok(())
}
