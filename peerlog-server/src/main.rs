//! peerlog: receives mesh-network webhook events, enriches them with user and
//! peer identities, and forwards them to a log collector.
//!
//! Startup sequence:
//! 1. Logging (JSON, `RUST_LOG`, non-blocking stdout)
//! 2. Configuration: locate, substitute, parse, validate
//! 3. Prime both identity caches (fatal on failure)
//! 4. Start the sink worker, admin listener and webhook listener
//! 5. On SIGINT/SIGTERM: stop accepting, drain, flush the sink, exit

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use peerlog_core::config::{PeerlogDefaults, find_config_file, load_and_validate};
use peerlog_server::admin;
use peerlog_server::app::{self, StartupError};
use peerlog_server::lifecycle::{DrainResult, LifecycleManager};
use peerlog_server::webhook;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file.
    /// If not specified, searches: PEERLOG_CONFIG env, /etc/peerlog/config.yaml, ./config.yaml
    #[arg(short, long, env = "PEERLOG_CONFIG")]
    config: Option<PathBuf>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // The guard must live for the whole program so buffered logs are flushed.
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!(error = %e, "peerlog failed to start");
        return Err(e.into());
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<(), StartupError> {
    let defaults = PeerlogDefaults::from_env();

    let path = find_config_file(cli.config.as_deref())?;
    let (config, validation) = load_and_validate(&path)?;
    for warning in &validation.warnings {
        warn!(warning = %warning, "Configuration warning");
    }
    info!(path = %path.display(), "Configuration loaded");

    if cli.check {
        info!("Configuration is valid");
        return Ok(());
    }

    let app = app::build(&config, &defaults).await?;
    let lifecycle = app.lifecycle.clone();
    let shutdown = lifecycle.shutdown_token();
    setup_signal_handlers(lifecycle.clone());

    let admin_addr = app.addrs.admin;
    let admin_state = app.admin.clone();
    let admin_shutdown = shutdown.clone();
    let admin_task = tokio::spawn(async move {
        if let Err(e) = admin::serve(admin_addr, admin_state, admin_shutdown).await {
            error!(error = %e, "Admin server error");
        }
    });

    let webhook_addr = app.addrs.webhook;
    let webhook_task = tokio::spawn(webhook::serve(webhook_addr, app.webhook, shutdown.clone()));

    lifecycle.mark_ready();

    let served = webhook_task.await;
    // A bind failure ends the listener before any signal; stop everything else.
    if !shutdown.is_cancelled() {
        lifecycle.begin_shutdown();
    }

    graceful_shutdown(&lifecycle, &defaults, app.sink_shutdown, app.sink_worker).await;
    let _ = admin_task.await;
    lifecycle.mark_stopped();
    info!("peerlog stopped");

    match served {
        Ok(result) => result.map_err(StartupError::from),
        Err(e) => {
            error!(error = %e, "Webhook listener task failed");
            Ok(())
        }
    }
}

/// Drain in-flight requests, then flush the sink queue within the remaining
/// shutdown budget.
async fn graceful_shutdown(
    lifecycle: &LifecycleManager,
    defaults: &PeerlogDefaults,
    sink_shutdown: CancellationToken,
    sink_worker: Option<tokio::task::JoinHandle<()>>,
) {
    let started = std::time::Instant::now();

    if let DrainResult::Timeout { remaining } = lifecycle.drain_requests().await {
        warn!(remaining, "Shutting down with requests still in flight");
    }

    sink_shutdown.cancel();
    if let Some(worker) = sink_worker {
        let budget = defaults
            .shutdown_timeout
            .saturating_sub(started.elapsed())
            .max(Duration::from_secs(1));
        if tokio::time::timeout(budget, worker).await.is_err() {
            warn!("Sink did not flush before the shutdown deadline");
        }
    }
}

/// SIGINT and SIGTERM begin graceful shutdown.
fn setup_signal_handlers(lifecycle: Arc<LifecycleManager>) {
    let lifecycle_sigint = lifecycle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                lifecycle_sigint.begin_shutdown();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGINT");
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
                lifecycle.begin_shutdown();
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
            }
        }
    });

    #[cfg(not(unix))]
    let _ = lifecycle;
}
