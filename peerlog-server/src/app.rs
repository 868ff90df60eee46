//! Startup wiring: config → directory client → caches → sink → pipeline →
//! routers.
//!
//! Both identity caches are primed before the webhook is exposed; a failed
//! prime aborts startup.

use axum::Router;
use peerlog_core::config::{Config, ConfigError, PeerlogDefaults};
use peerlog_core::enrich::Enricher;
use peerlog_core::error::{DirectoryError, SinkError};
use peerlog_core::identity::{DirectoryClient, IdentityCache, Peer, User};
use peerlog_core::pipeline::Pipeline;
use peerlog_core::policy::PolicyFilter;
use peerlog_core::sink::{EventSink, HecSink, TracingSink};
use peerlog_core::telemetry::PeerlogMetrics;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::admin::AdminState;
use crate::auth::WebhookAuth;
use crate::lifecycle::LifecycleManager;
use crate::ports::ListenAddrs;
use crate::webhook::{self, WebhookState};

/// Failures that abort startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid defaults: {0}")]
    Defaults(String),

    #[error("identity directory unavailable: {0}")]
    Directory(#[from] DirectoryError),

    #[error("log sink unavailable: {0}")]
    Sink(#[from] SinkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A fully wired service, ready to serve.
pub struct App {
    pub webhook: Router,
    pub admin: AdminState,
    pub addrs: ListenAddrs,
    pub lifecycle: Arc<LifecycleManager>,
    /// Collector worker, present when a sink is configured.
    pub sink_worker: Option<JoinHandle<()>>,
    /// Stops the collector worker. Cancelled after the webhook listener has
    /// drained so late records still reach the queue.
    pub sink_shutdown: CancellationToken,
}

/// Build the service from a validated configuration.
///
/// # Errors
///
/// Fails if a secret cannot be resolved, the directory cannot be reached to
/// prime either cache, or the sink cannot be started.
pub async fn build(config: &Config, defaults: &PeerlogDefaults) -> Result<App, StartupError> {
    defaults.validate().map_err(StartupError::Defaults)?;

    let mut registry = Registry::default();
    let metrics = Arc::new(PeerlogMetrics::new(&mut registry));
    let lifecycle = Arc::new(LifecycleManager::new(defaults.drain_timeout));

    let directory = DirectoryClient::new(config.directory.client_config(defaults)?)?
        .with_metrics(metrics.clone());
    let directory = Arc::new(directory);

    let users = IdentityCache::<User>::with_metrics(directory.clone(), metrics.clone());
    let peers = IdentityCache::<Peer>::with_metrics(directory, metrics.clone());

    let (user_count, peer_count) = tokio::try_join!(users.prime(), peers.prime())?;
    info!(users = user_count, peers = peer_count, "Identity caches primed");

    let sink_shutdown = CancellationToken::new();
    let (sink, sink_worker): (Arc<dyn EventSink>, _) = match &config.sink {
        Some(section) => {
            let (sink, handle) = HecSink::spawn(
                section.hec_config(defaults)?,
                Some(metrics.clone()),
                sink_shutdown.clone(),
            )?;
            (Arc::new(sink), Some(handle))
        }
        None => {
            warn!("No sink configured, enriched records go to the local log only");
            (Arc::new(TracingSink), None)
        }
    };

    let enricher = Enricher::new(users.clone(), peers.clone())
        .with_translations(config.translations.clone())
        .with_protocol_overrides(&config.protocols);
    let pipeline = Pipeline::new(
        config.policy.discriminator.clone(),
        PolicyFilter::from_config(&config.policy),
        enricher,
        sink,
    )
    .with_metrics(metrics);

    let auth = WebhookAuth::new(config.server.auth_token()?);
    let max_body_bytes = config
        .server
        .max_body_bytes
        .unwrap_or(defaults.max_body_bytes);
    let webhook = webhook::router(
        WebhookState {
            pipeline: Arc::new(pipeline),
            lifecycle: lifecycle.clone(),
        },
        auth,
        max_body_bytes,
    );

    Ok(App {
        webhook,
        admin: AdminState {
            lifecycle: lifecycle.clone(),
            users,
            peers,
            registry: Arc::new(registry),
        },
        addrs: ListenAddrs::resolve(&config.server),
        lifecycle,
        sink_worker,
        sink_shutdown,
    })
}
