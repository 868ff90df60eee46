//! Request logging for the webhook listener.
//!
//! Built on `tower_http::trace::TraceLayer` with custom callbacks: every
//! request span carries a `request_id`, and credential-bearing headers are
//! redacted before they reach the log.

use http::{HeaderMap, Request, Response};
use std::fmt;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnEos, TraceLayer};
use tracing::{info, warn};

/// Headers that are redacted from logs.
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "x-api-key", "x-netbird-token"];

/// Header carrying a caller-supplied request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub type LoggingLayer = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    RequestIdMakeSpan,
    OnRequestLogger,
    OnResponseLogger,
    DefaultOnBodyChunk,
    DefaultOnEos,
    OnFailureLogger,
>;

/// Create the logging/tracing layer.
pub fn logging_layer() -> LoggingLayer {
    TraceLayer::new_for_http()
        .make_span_with(RequestIdMakeSpan)
        .on_request(OnRequestLogger)
        .on_response(OnResponseLogger)
        .on_failure(OnFailureLogger)
}

static BOOT_MILLIS: LazyLock<u64> = LazyLock::new(|| {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
});
static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// Process-unique request ID: boot time and a sequence number, both hex.
pub fn next_request_id() -> String {
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:06x}", *BOOT_MILLIS, seq)
}

/// Attaches a `request_id` to every request span.
///
/// Uses `x-request-id` from the caller when present.
#[derive(Clone, Debug)]
pub struct RequestIdMakeSpan;

impl<B> tower_http::trace::MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> tracing::Span {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(next_request_id);

        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri().path(),
            request_id = %request_id,
        )
    }
}

#[derive(Clone, Debug)]
pub struct OnRequestLogger;

impl<B> tower_http::trace::OnRequest<B> for OnRequestLogger {
    fn on_request(&mut self, request: &Request<B>, _span: &tracing::Span) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!(
                version = ?request.version(),
                headers = ?sanitize_headers(request.headers()),
                "Request received"
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct OnResponseLogger;

impl<B> tower_http::trace::OnResponse<B> for OnResponseLogger {
    fn on_response(self, response: &Response<B>, latency: Duration, _span: &tracing::Span) {
        info!(
            status = response.status().as_u16(),
            latency_ms = latency.as_millis() as u64,
            "Response sent"
        );
    }
}

#[derive(Clone, Debug)]
pub struct OnFailureLogger;

impl tower_http::trace::OnFailure<ServerErrorsFailureClass> for OnFailureLogger {
    fn on_failure(
        &mut self,
        failure: ServerErrorsFailureClass,
        latency: Duration,
        _span: &tracing::Span,
    ) {
        warn!(
            classification = %failure,
            latency_ms = latency.as_millis() as u64,
            "Request failed"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Header redaction
// ─────────────────────────────────────────────────────────────────────────

/// Longest header value logged before truncation.
const MAX_LOGGED_VALUE: usize = 256;

fn is_sensitive(name: &str) -> bool {
    SENSITIVE_HEADERS.iter().any(|s| name.eq_ignore_ascii_case(s))
}

/// Debug view of a header map with credentials masked and long values cut.
pub struct SanitizedHeaders<'a>(&'a HeaderMap);

impl fmt::Debug for SanitizedHeaders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, value) in self.0 {
            let name = name.as_str();
            if is_sensitive(name) {
                map.entry(&name, &"[REDACTED]");
                continue;
            }
            match value.to_str() {
                Ok(text) if text.len() > MAX_LOGGED_VALUE => {
                    // Visible ASCII only, so any byte index is a char boundary.
                    map.entry(&name, &format!("{}…", &text[..MAX_LOGGED_VALUE]));
                }
                Ok(text) => {
                    map.entry(&name, &text);
                }
                Err(_) => {
                    map.entry(&name, &"<non-ascii>");
                }
            }
        }
        map.finish()
    }
}

pub fn sanitize_headers(headers: &HeaderMap) -> SanitizedHeaders<'_> {
    SanitizedHeaders(headers)
}
