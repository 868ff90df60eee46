//! Webhook listener: `POST /webhook`.
//!
//! | Outcome | Status | Body |
//! |---------|--------|------|
//! | traffic/audit handled | 202 | `{"status":"ok","handled_as":…,"forwarded":…}` |
//! | unknown shape | 200 | `{"message":"Event processed successfully"}` |
//! | not decodable | 400 | `{"message":…,"error":…}` |
//! | bad token | 401 | `{"error":"unauthorized"}` |
//! | body too large | 413 | |

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::post,
};
use peerlog_core::pipeline::{Outcome, Pipeline};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;

use crate::auth::{WebhookAuth, require_token};
use crate::error::WebhookError;
use crate::lifecycle::LifecycleManager;
use crate::logging_layer::logging_layer;

pub const WEBHOOK_PATH: &str = "/webhook";

#[derive(Clone)]
pub struct WebhookState {
    pub pipeline: Arc<Pipeline>,
    pub lifecycle: Arc<LifecycleManager>,
}

/// Build the webhook router with auth, body limit and request logging.
pub fn router(state: WebhookState, auth: WebhookAuth, max_body_bytes: usize) -> Router {
    Router::new()
        .route(WEBHOOK_PATH, post(webhook_handler))
        .route_layer(middleware::from_fn_with_state(auth, require_token))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(logging_layer())
        .with_state(state)
}

/// Serve the webhook router until `shutdown` is cancelled.
pub async fn serve(addr: SocketAddr, app: Router, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, path = WEBHOOK_PATH, "Webhook listener ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Webhook listener shutting down");
        })
        .await
}

async fn webhook_handler(
    State(state): State<WebhookState>,
    body: Bytes,
) -> Result<Response, WebhookError> {
    let Some(_guard) = state.lifecycle.track_request() else {
        return Err(WebhookError::ShuttingDown);
    };

    let outcome = state.pipeline.process(body).await?;
    Ok(outcome_response(&outcome))
}

fn outcome_response(outcome: &Outcome) -> Response {
    match outcome {
        Outcome::Unrecognized => (
            StatusCode::OK,
            Json(json!({ "message": "Event processed successfully" })),
        )
            .into_response(),
        Outcome::Forwarded { kind } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "ok",
                "handled_as": kind.as_str(),
                "forwarded": true,
            })),
        )
            .into_response(),
        Outcome::Filtered { reason } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "ok",
                "handled_as": outcome.kind().as_str(),
                "forwarded": false,
                "reason": reason.as_str(),
            })),
        )
            .into_response(),
        Outcome::Skipped { kind, reason } => (
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "ok",
                "handled_as": kind.as_str(),
                "forwarded": false,
                "reason": reason.reason(),
            })),
        )
            .into_response(),
    }
}
