mod collectors;
mod config;
mod error;
mod http;
mod tunnel;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use crate::collectors::CpuCollector;
use crate::config::AgentConfig;
use crate::http::AgentState;
use crate::tunnel::TunnelSupervisor;

#[derive(Parser, Debug)]
#[command(name = "fleet-agent")]
struct Cli {
    /// Path to a YAML config file. Falls back to FLEETWATCH_CONFIG, then ./agent.yaml.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AgentConfig::load(cli.config)?;

    let _guard = init_logging(&config);

    let state = AgentState {
        config: Arc::new(config.clone()),
        cpu: Arc::new(CpuCollector::new()),
        tunnel: TunnelSupervisor::new(),
    };

    state.tunnel.configure(config.proxy.clone()).await;
    if let Some(proxy) = &config.proxy {
        if proxy.enabled && proxy.auto_start {
            if let Err(e) = state.tunnel.start(None).await {
                tracing::warn!(error = %e, "failed to auto-start proxy tunnel");
            }
        }
    }

    let app = http::build_app(state);

    tracing::info!(listen = %config.listen, node_id = %config.node_id, "fleet-agent starting");

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("fleet-agent shut down gracefully");
    Ok(())
}

fn init_logging(config: &AgentConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.logging_level.clone()));

    match &config.logging_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "fleet-agent.log".to_string());
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
