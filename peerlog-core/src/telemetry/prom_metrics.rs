//! Prometheus metrics for the event path, directory and sink.
//!
//! This module provides the `PeerlogMetrics` struct which registers and manages
//! all Prometheus metrics for peerlog. Metrics are exported via the `/metrics`
//! endpoint on the admin port using OpenMetrics text format.
//!
//! Every label value comes from a closed set (identity kind, event kind, sink
//! stream, outcome names), so no cardinality limiting is applied.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

// ─────────────────────────────────────────────────────────────────────────────
// Label Sets (prometheus-client requires #[derive(EncodeLabelSet)])
// ─────────────────────────────────────────────────────────────────────────────

/// Labels for inbound event counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EventLabels {
    /// Classified kind: "traffic", "audit", "unknown" or "invalid"
    pub kind: String,
}

/// Labels for pipeline outcome counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    /// Classified kind
    pub kind: String,
    /// "forwarded", "filtered", "skipped", "unrecognized" or "rejected"
    pub outcome: String,
    /// Drop reason, "none" when forwarded
    pub reason: String,
}

/// Labels keyed by identity kind and outcome.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct IdentityOutcomeLabels {
    /// "user" or "peer"
    pub kind: String,
    /// Outcome, e.g. "success"/"failure" or "hit"/"miss"
    pub outcome: String,
}

/// Labels keyed by identity kind only.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct IdentityLabels {
    pub kind: String,
}

/// Labels for sink delivery counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SinkLabels {
    /// "traffic" or "audit"
    pub stream: String,
    /// "success", "status", "transport" or "dropped"
    pub outcome: String,
}

/// Labels for sink delivery duration histograms.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StreamLabels {
    pub stream: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Histogram Bucket Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Directory fetch duration buckets in milliseconds.
const DIRECTORY_BUCKETS: &[f64] = &[
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

/// Event processing duration buckets in milliseconds.
const PROCESSING_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 50.0, 100.0, 500.0, 1000.0];

/// Sink delivery duration buckets in milliseconds.
const SINK_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0];

// ─────────────────────────────────────────────────────────────────────────────
// PeerlogMetrics
// ─────────────────────────────────────────────────────────────────────────────

/// Prometheus metrics for peerlog.
///
/// All metric names use the "peerlog_" prefix.
pub struct PeerlogMetrics {
    // ─────────────────────────────────────────────────────────────────────────
    // Counters
    // ─────────────────────────────────────────────────────────────────────────
    /// Inbound events by classified kind.
    pub events_received_total: Family<EventLabels, Counter>,

    /// Pipeline outcomes by kind, outcome and reason.
    pub events_processed_total: Family<OutcomeLabels, Counter>,

    /// Directory fetches by identity kind and outcome (success or error type).
    pub directory_requests_total: Family<IdentityOutcomeLabels, Counter>,

    /// Identity cache lookups by kind and hit/miss.
    pub cache_lookups_total: Family<IdentityOutcomeLabels, Counter>,

    /// Identity cache refreshes by kind and outcome.
    pub cache_refreshes_total: Family<IdentityOutcomeLabels, Counter>,

    /// Sink deliveries by stream and outcome.
    pub sink_deliveries_total: Family<SinkLabels, Counter>,

    // ─────────────────────────────────────────────────────────────────────────
    // Histograms
    // ─────────────────────────────────────────────────────────────────────────
    /// Directory fetch latency in milliseconds.
    pub directory_duration_ms: Family<IdentityLabels, Histogram>,

    /// End-to-end pipeline latency per event in milliseconds.
    pub event_processing_duration_ms: Family<EventLabels, Histogram>,

    /// Sink delivery latency in milliseconds.
    pub sink_delivery_duration_ms: Family<StreamLabels, Histogram>,

    // ─────────────────────────────────────────────────────────────────────────
    // Gauges
    // ─────────────────────────────────────────────────────────────────────────
    /// Records in the current identity snapshot.
    pub cache_entries: Family<IdentityLabels, Gauge>,
}

impl PeerlogMetrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        // ─────────────────────────────────────────────────────────────────────
        // Counters
        // ─────────────────────────────────────────────────────────────────────

        let events_received_total = Family::<EventLabels, Counter>::default();
        registry.register(
            "peerlog_events_received_total",
            "Inbound webhook events by classified kind",
            events_received_total.clone(),
        );

        let events_processed_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "peerlog_events_processed_total",
            "Pipeline outcomes by kind, outcome and reason",
            events_processed_total.clone(),
        );

        let directory_requests_total = Family::<IdentityOutcomeLabels, Counter>::default();
        registry.register(
            "peerlog_directory_requests_total",
            "Identity directory fetches by kind and outcome",
            directory_requests_total.clone(),
        );

        let cache_lookups_total = Family::<IdentityOutcomeLabels, Counter>::default();
        registry.register(
            "peerlog_cache_lookups_total",
            "Identity cache lookups by kind and hit/miss",
            cache_lookups_total.clone(),
        );

        let cache_refreshes_total = Family::<IdentityOutcomeLabels, Counter>::default();
        registry.register(
            "peerlog_cache_refreshes_total",
            "Identity cache snapshot refreshes by kind and outcome",
            cache_refreshes_total.clone(),
        );

        let sink_deliveries_total = Family::<SinkLabels, Counter>::default();
        registry.register(
            "peerlog_sink_deliveries_total",
            "Log sink deliveries by stream and outcome",
            sink_deliveries_total.clone(),
        );

        // ─────────────────────────────────────────────────────────────────────
        // Histograms
        // ─────────────────────────────────────────────────────────────────────

        let directory_duration_ms = Family::<IdentityLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(DIRECTORY_BUCKETS.iter().copied())
        });
        registry.register(
            "peerlog_directory_duration_ms",
            "Identity directory fetch latency in milliseconds",
            directory_duration_ms.clone(),
        );

        let event_processing_duration_ms =
            Family::<EventLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(PROCESSING_BUCKETS.iter().copied())
            });
        registry.register(
            "peerlog_event_processing_duration_ms",
            "Per-event pipeline latency in milliseconds",
            event_processing_duration_ms.clone(),
        );

        let sink_delivery_duration_ms =
            Family::<StreamLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(SINK_BUCKETS.iter().copied())
            });
        registry.register(
            "peerlog_sink_delivery_duration_ms",
            "Log sink delivery latency in milliseconds",
            sink_delivery_duration_ms.clone(),
        );

        // ─────────────────────────────────────────────────────────────────────
        // Gauges
        // ─────────────────────────────────────────────────────────────────────

        let cache_entries = Family::<IdentityLabels, Gauge>::default();
        registry.register(
            "peerlog_cache_entries",
            "Records in the current identity snapshot",
            cache_entries.clone(),
        );

        Self {
            events_received_total,
            events_processed_total,
            directory_requests_total,
            cache_lookups_total,
            cache_refreshes_total,
            sink_deliveries_total,
            directory_duration_ms,
            event_processing_duration_ms,
            sink_delivery_duration_ms,
            cache_entries,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Convenience Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Record an inbound event after classification.
    pub fn record_event_received(&self, kind: &str) {
        self.events_received_total
            .get_or_create(&EventLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    /// Record what the pipeline did with an event and how long it took.
    ///
    /// # Arguments
    ///
    /// * `kind` - Classified kind
    /// * `outcome` - "forwarded", "filtered", "skipped", "unrecognized" or "rejected"
    /// * `reason` - Drop reason, "none" when not applicable
    /// * `duration_ms` - Processing time in milliseconds
    pub fn record_event_outcome(&self, kind: &str, outcome: &str, reason: &str, duration_ms: f64) {
        self.events_processed_total
            .get_or_create(&OutcomeLabels {
                kind: kind.to_string(),
                outcome: outcome.to_string(),
                reason: reason.to_string(),
            })
            .inc();

        self.event_processing_duration_ms
            .get_or_create(&EventLabels {
                kind: kind.to_string(),
            })
            .observe(duration_ms);
    }

    /// Record a directory fetch.
    ///
    /// # Arguments
    ///
    /// * `kind` - Identity kind ("user" or "peer")
    /// * `outcome` - "success" or a `DirectoryError::error_type()` value
    /// * `duration_ms` - Request duration in milliseconds
    pub fn record_directory_request(&self, kind: &str, outcome: &str, duration_ms: f64) {
        self.directory_requests_total
            .get_or_create(&IdentityOutcomeLabels {
                kind: kind.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();

        self.directory_duration_ms
            .get_or_create(&IdentityLabels {
                kind: kind.to_string(),
            })
            .observe(duration_ms);
    }

    /// Record an identity cache lookup ("hit" or "miss").
    pub fn record_cache_lookup(&self, kind: &str, outcome: &str) {
        self.cache_lookups_total
            .get_or_create(&IdentityOutcomeLabels {
                kind: kind.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Record a cache refresh and the size of the snapshot now in place.
    pub fn record_cache_refresh(&self, kind: &str, outcome: &str, entries: usize) {
        self.cache_refreshes_total
            .get_or_create(&IdentityOutcomeLabels {
                kind: kind.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();

        self.cache_entries
            .get_or_create(&IdentityLabels {
                kind: kind.to_string(),
            })
            .set(i64::try_from(entries).unwrap_or(i64::MAX));
    }

    /// Record a sink delivery attempt.
    pub fn record_sink_delivery(&self, stream: &str, outcome: &str, duration_ms: f64) {
        self.sink_deliveries_total
            .get_or_create(&SinkLabels {
                stream: stream.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();

        self.sink_delivery_duration_ms
            .get_or_create(&StreamLabels {
                stream: stream.to_string(),
            })
            .observe(duration_ms);
    }

    /// Record a record dropped before delivery because the queue was full.
    pub fn record_sink_dropped(&self, stream: &str) {
        self.sink_deliveries_total
            .get_or_create(&SinkLabels {
                stream: stream.to_string(),
                outcome: "dropped".to_string(),
            })
            .inc();
    }
}
