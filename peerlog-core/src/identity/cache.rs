//! Read-through identity cache with single-flight refresh.
//!
//! Each [`IdentityCache`] holds a complete snapshot (ID → record) of one
//! identity type. Lookups read the current snapshot lock-free through
//! [`ArcSwap`]; a refresh builds a new map off to the side and swaps it in
//! with a single pointer store, so readers never see a half-built map.
//!
//! # Refresh coordination
//!
//! A miss joins the refresh already in flight for this cache, or starts one
//! if there is none. At most one directory fetch per cache runs at a time and
//! every waiter observes the same result:
//!
//! ```text
//!  get("a") miss ──┐
//!  get("b") miss ──┼──► one fetch ──► swap snapshot ──► all waiters re-check
//!  get("c") miss ──┘
//! ```
//!
//! The fetch runs on its own task. Dropping a waiting caller does not cancel
//! it; it runs to completion (or to the directory client's timeout) for the
//! remaining waiters.
//!
//! Snapshots never expire. Only misses drive freshness.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tracing::{debug, info, warn};

use super::Identity;
use super::directory::IdentitySource;
use crate::error::{DirectoryError, LookupError};
use crate::telemetry::PeerlogMetrics;

type RefreshFuture = Shared<BoxFuture<'static, Result<usize, DirectoryError>>>;

/// Snapshot map for one identity type.
pub type Snapshot<T> = HashMap<String, T>;

/// The refresh currently in flight, if any.
struct InFlight {
    id: u64,
    future: RefreshFuture,
}

#[derive(Default)]
struct FlightSlot {
    current: Option<InFlight>,
    next_id: u64,
}

struct CacheInner<T: Identity> {
    snapshot: ArcSwap<Snapshot<T>>,
    source: Arc<dyn IdentitySource<T>>,
    flight: Mutex<FlightSlot>,
    /// Number of successful refreshes. Zero until the cache is primed.
    generation: AtomicU64,
    metrics: Option<Arc<PeerlogMetrics>>,
}

enum Probe<T> {
    Hit(T),
    Wait(RefreshFuture),
}

/// Concurrency-safe read-through cache for one identity type.
///
/// Cloning is cheap and clones share the same snapshot and refresh slot.
pub struct IdentityCache<T: Identity> {
    inner: Arc<CacheInner<T>>,
}

impl<T: Identity> Clone for IdentityCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Identity> IdentityCache<T> {
    /// Create an empty cache backed by `source`.
    ///
    /// The cache starts cold; call [`prime`](Self::prime) at startup to load
    /// the initial snapshot.
    pub fn new(source: Arc<dyn IdentitySource<T>>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                snapshot: ArcSwap::from_pointee(HashMap::new()),
                source,
                flight: Mutex::new(FlightSlot::default()),
                generation: AtomicU64::new(0),
                metrics: None,
            }),
        }
    }

    /// Create an empty cache that records lookup and refresh metrics.
    pub fn with_metrics(source: Arc<dyn IdentitySource<T>>, metrics: Arc<PeerlogMetrics>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                snapshot: ArcSwap::from_pointee(HashMap::new()),
                source,
                flight: Mutex::new(FlightSlot::default()),
                generation: AtomicU64::new(0),
                metrics: Some(metrics),
            }),
        }
    }

    /// Load the initial snapshot.
    ///
    /// # Errors
    ///
    /// Returns the directory error if the fetch fails. Startup treats this as
    /// fatal; at runtime the same failure only degrades enrichment.
    pub async fn prime(&self) -> Result<usize, DirectoryError> {
        self.refresh().await
    }

    /// Force a refresh, joining one that is already in flight.
    ///
    /// Returns the number of records in the new snapshot.
    pub async fn refresh(&self) -> Result<usize, DirectoryError> {
        let future = {
            let mut slot = self.lock_slot();
            match &slot.current {
                Some(flight) => flight.future.clone(),
                None => self.start_flight(&mut slot),
            }
        };
        future.await
    }

    /// Look up an identity, refreshing the snapshot on a miss.
    ///
    /// # Errors
    ///
    /// - [`LookupError::NotFound`] if the ID is absent after a successful
    ///   refresh. Callers should degrade, not retry.
    /// - [`LookupError::UpstreamUnavailable`] if the refresh failed. The stale
    ///   snapshot stays in place for later lookups.
    pub async fn get(&self, id: &str) -> Result<T, LookupError> {
        let observed = self.inner.generation.load(Ordering::Acquire);
        if let Some(record) = self.lookup(id) {
            self.record_lookup("hit");
            return Ok(record);
        }
        self.record_lookup("miss");
        debug!(kind = %T::KIND, id = %id, "Identity cache miss, refreshing snapshot");

        let future = match self.probe(id, observed) {
            Probe::Hit(record) => return Ok(record),
            Probe::Wait(future) => future,
        };

        match future.await {
            Ok(_) => self.lookup(id).ok_or_else(|| LookupError::NotFound {
                kind: T::KIND,
                id: id.to_string(),
            }),
            Err(source) => Err(LookupError::UpstreamUnavailable {
                kind: T::KIND,
                source,
            }),
        }
    }

    /// Look up an identity in the current snapshot without refreshing.
    pub fn lookup(&self, id: &str) -> Option<T> {
        self.inner.snapshot.load().get(id).cloned()
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot<T>> {
        self.inner.snapshot.load_full()
    }

    pub fn len(&self) -> usize {
        self.inner.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether at least one refresh has succeeded.
    pub fn is_primed(&self) -> bool {
        self.inner.generation.load(Ordering::Acquire) > 0
    }

    /// Decide, under the slot lock, whether to join, start, or skip a refresh.
    ///
    /// If no refresh is in flight but one completed after `observed`, the new
    /// snapshot is checked first so a miss against an outdated view does not
    /// start a redundant fetch.
    fn probe(&self, id: &str, observed: u64) -> Probe<T> {
        let mut slot = self.lock_slot();
        if let Some(flight) = &slot.current {
            return Probe::Wait(flight.future.clone());
        }
        if self.inner.generation.load(Ordering::Acquire) != observed {
            if let Some(record) = self.lookup(id) {
                return Probe::Hit(record);
            }
        }
        Probe::Wait(self.start_flight(&mut slot))
    }

    fn start_flight(&self, slot: &mut FlightSlot) -> RefreshFuture {
        let flight_id = slot.next_id;
        slot.next_id = slot.next_id.wrapping_add(1);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { inner.run_refresh(flight_id).await });

        let inner = Arc::clone(&self.inner);
        let future = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    inner.clear_flight(flight_id);
                    Err(DirectoryError::Transport {
                        url: String::new(),
                        reason: format!("{} refresh task failed: {e}", T::KIND),
                    })
                }
            }
        }
        .boxed()
        .shared();

        slot.current = Some(InFlight {
            id: flight_id,
            future: future.clone(),
        });
        future
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, FlightSlot> {
        // The slot only holds an Option and a counter; a poisoned lock still
        // holds a consistent value.
        self.inner
            .flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_lookup(&self, outcome: &str) {
        if let Some(ref metrics) = self.inner.metrics {
            metrics.record_cache_lookup(T::KIND.as_str(), outcome);
        }
    }
}

impl<T: Identity> CacheInner<T> {
    async fn run_refresh(&self, flight_id: u64) -> Result<usize, DirectoryError> {
        let result = self.source.fetch_all().await;

        let outcome = match result {
            Ok(records) => {
                let total = records.len();
                let snapshot: Snapshot<T> = records
                    .into_iter()
                    .filter(|r| !r.id().is_empty())
                    .map(|r| (r.id().to_string(), r))
                    .collect();
                let count = snapshot.len();
                if count < total {
                    debug!(kind = %T::KIND, skipped = total - count, "Dropped records without ID or with duplicate ID");
                }

                self.snapshot.store(Arc::new(snapshot));
                self.generation.fetch_add(1, Ordering::AcqRel);

                info!(kind = %T::KIND, records = count, "Identity cache refreshed");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_cache_refresh(T::KIND.as_str(), "success", count);
                }
                Ok(count)
            }
            Err(e) => {
                warn!(kind = %T::KIND, error = %e, "Identity cache refresh failed, keeping stale snapshot");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_cache_refresh(
                        T::KIND.as_str(),
                        "failure",
                        self.snapshot.load().len(),
                    );
                }
                Err(e)
            }
        };

        self.clear_flight(flight_id);
        outcome
    }

    fn clear_flight(&self, flight_id: u64) {
        let mut slot = self
            .flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.current.as_ref().is_some_and(|f| f.id == flight_id) {
            slot.current = None;
        }
    }
}
