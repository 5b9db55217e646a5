mod aggregate;
mod classifier;
mod config;
mod cron;
mod daily;
mod dwell;
mod error;
mod fingerprint;
mod grouper;
mod license;
mod model;
mod persistence;
mod pool;
mod register;
mod scheduler;
mod sensor;
mod store;

#[cfg(test)]
mod testutil;

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{crate_description, crate_name, crate_version, Parser};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use persistence::PgStore;
use pool::ConnectionPool;
use scheduler::Scheduler;

#[derive(Parser, Debug)]
#[command(name = crate_name!(), version = crate_version!(), about = crate_description!())]
struct Cli {
    /// Path to the fleet configuration file describing gateways, sensors,
    /// and parameter maps.
    #[arg(short, long, default_value = "worker.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let license_key_raw = env::var("LICENSE_SECRET_KEY").context("LICENSE_SECRET_KEY must be set")?;
    let license_iv_raw = env::var("LICENSE_IV").context("LICENSE_IV must be set")?;

    let license_key = license::pad_key_material(&license_key_raw);
    let license_iv = license::pad_key_material(&license_iv_raw);

    // Fail fast: an unparsable fleet file is a deploy-time mistake, not a
    // transient condition the cycle loop should retry through.
    config::FleetConfig::load(&cli.config)
        .with_context(|| format!("loading fleet configuration from {}", cli.config.display()))?;

    let store = PgStore::connect(&database_url).await.context("connecting to database")?;
    let persistence: Arc<dyn persistence::PersistencePort> = Arc::new(store);
    let pool = Arc::new(ConnectionPool::new());
    let shutdown = CancellationToken::new();

    let scheduler = Arc::new(Scheduler::new(
        cli.config,
        Arc::clone(&persistence),
        Arc::clone(&pool),
        license_key,
        license_iv,
        shutdown.clone(),
    ));

    let run_handle = tokio::spawn(Arc::clone(&scheduler).run());

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, stopping scheduler");
    shutdown.cancel();

    let _ = run_handle.await;
    info!("worker exited cleanly");
    Ok(())
}

/// Waits for `SIGINT` or `SIGTERM` for graceful process shutdown.
/// Unix-only signal handling matches the expected deployment target;
/// `ctrl_c` alone covers interactive runs everywhere else.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
