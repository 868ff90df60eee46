//! Admin listener: liveness, readiness and Prometheus metrics.
//!
//! Runs on its own port so probes and scrapes never share a listener with
//! the event producer:
//!
//! | Endpoint | Condition | Status |
//! |----------|-----------|--------|
//! | /health  | Process alive | 200 |
//! | /health  | Process stopped | 503 |
//! | /ready   | Both caches primed, not draining | 200 |
//! | /ready   | Otherwise | 503 |
//! | /metrics | Always | 200 (OpenMetrics text) |

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use peerlog_core::identity::{IdentityCache, Peer, User};
use prometheus_client::registry::Registry;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::lifecycle::{LifecycleManager, LifecycleState};

/// Shared state for the admin server.
#[derive(Clone)]
pub struct AdminState {
    pub lifecycle: Arc<LifecycleManager>,
    pub users: IdentityCache<User>,
    pub peers: IdentityCache<Peer>,
    pub registry: Arc<Registry>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

/// Individual readiness checks.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessChecks {
    pub users_primed: bool,
    pub peers_primed: bool,
    pub accepting_events: bool,
}

impl ReadinessChecks {
    #[must_use]
    pub fn all_pass(&self) -> bool {
        self.users_primed && self.peers_primed && self.accepting_events
    }

    #[must_use]
    pub fn first_failure(&self) -> Option<&'static str> {
        if !self.users_primed {
            Some("users_primed")
        } else if !self.peers_primed {
            Some("peers_primed")
        } else if !self.accepting_events {
            Some("accepting_events")
        } else {
            None
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AdminState {
    fn readiness_checks(&self) -> ReadinessChecks {
        ReadinessChecks {
            users_primed: self.users.is_primed(),
            peers_primed: self.peers.is_primed(),
            accepting_events: self.lifecycle.is_ready(),
        }
    }
}

/// Build the admin router.
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve the admin router until `shutdown` is cancelled.
pub async fn serve(
    addr: SocketAddr,
    state: AdminState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Admin server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Admin server shutting down");
        })
        .await
}

async fn health_handler(State(state): State<AdminState>) -> Response {
    let lifecycle = &state.lifecycle;
    if matches!(lifecycle.state(), LifecycleState::Stopped) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unhealthy",
                "reason": "service_stopped",
            })),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            version: lifecycle.version(),
            uptime_seconds: lifecycle.uptime_seconds(),
        }),
    )
        .into_response()
}

async fn readiness_handler(State(state): State<AdminState>) -> Response {
    let checks = state.readiness_checks();

    if checks.all_pass() {
        return (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                checks,
                reason: None,
            }),
        )
            .into_response();
    }

    let reason = if state.lifecycle.is_shutting_down() {
        Some("shutting_down".to_string())
    } else {
        checks.first_failure().map(str::to_string)
    };
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ReadinessResponse {
            status: "not_ready",
            checks,
            reason,
        }),
    )
        .into_response()
}

async fn metrics_handler(State(state): State<AdminState>) -> Response {
    let mut buffer = String::new();

    if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &state.registry) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buffer,
    )
        .into_response()
}
