//! Process lifecycle: state machine, in-flight request tracking, draining.
//!
//! ```text
//! Starting ──► Ready ──► ShuttingDown ──► Stopped
//! ```
//!
//! The shutdown token is shared by the webhook listener, the admin listener
//! and the sink worker.

use arc_swap::ArcSwap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Loading config and priming caches
    Starting,
    /// Accepting events
    Ready,
    /// Draining, rejecting new events
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Ready => write!(f, "ready"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Coordinates startup, readiness and graceful shutdown.
pub struct LifecycleManager {
    state: ArcSwap<LifecycleState>,
    started_at: Instant,
    shutdown_token: CancellationToken,
    active_requests: AtomicUsize,
    drain_timeout: Duration,
    version: &'static str,
}

impl LifecycleManager {
    /// Starts in [`LifecycleState::Starting`].
    #[must_use]
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            state: ArcSwap::new(Arc::new(LifecycleState::Starting)),
            started_at: Instant::now(),
            shutdown_token: CancellationToken::new(),
            active_requests: AtomicUsize::new(0),
            drain_timeout,
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self.state(), LifecycleState::Ready)
    }

    /// True once shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        matches!(
            self.state(),
            LifecycleState::ShuttingDown | LifecycleState::Stopped
        )
    }

    pub fn mark_ready(&self) {
        self.state.store(Arc::new(LifecycleState::Ready));
        info!(
            version = %self.version,
            startup_duration_ms = self.started_at.elapsed().as_millis() as u64,
            "peerlog ready"
        );
    }

    pub fn mark_stopped(&self) {
        self.state.store(Arc::new(LifecycleState::Stopped));
    }

    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Move to `ShuttingDown` and cancel the shared token.
    pub fn begin_shutdown(&self) {
        self.state.store(Arc::new(LifecycleState::ShuttingDown));
        self.shutdown_token.cancel();
        info!(
            active_requests = self.active_requests.load(Ordering::SeqCst),
            "Shutdown initiated"
        );
    }

    /// Track an in-flight request. `None` once shutdown has begun.
    #[must_use]
    pub fn track_request(self: &Arc<Self>) -> Option<RequestGuard> {
        if self.is_shutting_down() {
            return None;
        }
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        Some(RequestGuard {
            manager: Arc::clone(self),
        })
    }

    #[must_use]
    pub fn active_request_count(&self) -> usize {
        self.active_requests.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    #[must_use]
    pub fn version(&self) -> &'static str {
        self.version
    }

    /// Wait for in-flight requests to finish, polling every 100ms.
    pub async fn drain_requests(&self) -> DrainResult {
        let deadline = Instant::now() + self.drain_timeout;
        let mut last_log = Instant::now();

        loop {
            let active = self.active_requests.load(Ordering::SeqCst);
            if active == 0 {
                return DrainResult::Complete;
            }

            if Instant::now() > deadline {
                warn!(
                    active_requests = active,
                    "Drain timeout exceeded, forcing shutdown"
                );
                return DrainResult::Timeout { remaining: active };
            }

            if last_log.elapsed() >= Duration::from_secs(5) {
                info!(active_requests = active, "Draining requests...");
                last_log = Instant::now();
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Decrements the in-flight counter on drop.
pub struct RequestGuard {
    manager: Arc<LifecycleManager>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.manager.active_requests.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainResult {
    Complete,
    Timeout { remaining: usize },
}
