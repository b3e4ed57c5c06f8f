mod app;
mod config;
mod db;
mod error;
mod lock;
mod pull;
mod retention;
mod rollup;
mod routes;
mod state;
mod store;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use crate::config::AggregatorConfig;
use crate::db::Store;
use crate::lock::InstanceLock;
use crate::pull::PullScheduler;
use crate::retention::RetentionCleaner;
use crate::rollup::RollupEngine;
use crate::state::AppState;
use crate::store::StateStore;

#[derive(Parser, Debug)]
#[command(name = "fleet-aggregator")]
struct Cli {
    /// Path to a YAML config file. Falls back to FLEETWATCH_CONFIG, then ./aggregator.yaml.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AggregatorConfig::load(cli.config)?;

    let _guard = init_logging(&config);

    let _lock = InstanceLock::acquire(&config.database_path)?;

    let store = Arc::new(Store::connect(&config.database_path).await?);
    let state_store = StateStore::new();

    let pull_scheduler = Arc::new(PullScheduler::new(
        store.clone(),
        state_store.clone(),
        Duration::from_secs(config.collector_timeout_secs),
    ));
    pull_scheduler.prime_prev_state().await?;

    let rollup_engine = Arc::new(RollupEngine::new(store.clone(), state_store.clone()));
    let retention_cleaner = Arc::new(RetentionCleaner::new(
        store.clone(),
        config.retention_days,
        config.retention_cleanup_hour,
    ));

    tokio::spawn(pull_scheduler.run(Duration::from_secs(config.collector_interval_secs)));
    tokio::spawn(rollup_engine.run());
    tokio::spawn(retention_cleaner.run());

    let listen_addr = config.listen_addr();
    let app_state = AppState::new(Arc::new(config), store, state_store);
    let app = app::build_app(app_state);

    tracing::info!(listen = %listen_addr, "fleet-aggregator starting");

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("fleet-aggregator shut down gracefully");
    Ok(())
}

fn init_logging(config: &AggregatorConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.logging_level.clone()));

    match &config.logging_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "fleet-aggregator.log".to_string());
            let file_appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}
