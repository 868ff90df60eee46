//! Shared-token authentication for the webhook.
//!
//! Accepts `Authorization: Bearer <token>` or `Authorization: Token <token>`.
//! The scheme is matched case-insensitively; the token is compared in
//! constant time.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::error::WebhookError;

const ACCEPTED_SCHEMES: &[&str] = &["Bearer", "Token"];

/// Expected webhook token.
#[derive(Clone)]
pub struct WebhookAuth {
    token: Arc<str>,
}

impl std::fmt::Debug for WebhookAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookAuth")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl WebhookAuth {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Check an `Authorization` header value.
    pub fn verify(&self, header_value: &str) -> bool {
        let Some((scheme, presented)) = header_value.trim().split_once(' ') else {
            return false;
        };
        if !ACCEPTED_SCHEMES
            .iter()
            .any(|s| s.eq_ignore_ascii_case(scheme))
        {
            return false;
        }
        let presented = presented.trim();
        !presented.is_empty() && bool::from(presented.as_bytes().ct_eq(self.token.as_bytes()))
    }
}

/// Middleware rejecting requests without a valid token.
pub async fn require_token(
    State(auth): State<WebhookAuth>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| auth.verify(v));

    if !authorized {
        warn!(path = %request.uri().path(), "Rejected unauthenticated webhook request");
        return WebhookError::Unauthorized.into_response();
    }
    next.run(request).await
}
