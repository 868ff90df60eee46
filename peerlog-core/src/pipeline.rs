//! Per-event processing: classify, decode, filter, enrich, emit.
//!
//! ```text
//! raw ──► classify/decode ──► Traffic ──► policy ──► enrich ──► sink
//!                        ├──► Audit ───────────────► enrich ──► sink
//!                        └──► Unknown ──► logged
//! ```
//!
//! Only payloads that cannot be classified or decoded come back as errors.
//! Every other path ends in an [`Outcome`], and every outcome is counted.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::enrich::Enricher;
use crate::error::{DecodeError, SkipSignal};
use crate::event::{DiscriminatorMatch, EventKind, InboundEvent};
use crate::policy::{DropReason, PolicyFilter, Verdict};
use crate::sink::{EventSink, SinkRecord};
use crate::telemetry::PeerlogMetrics;

/// What happened to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Enriched and handed to the sink.
    Forwarded { kind: EventKind },
    /// Traffic event rejected by the forwarding policy.
    Filtered { reason: DropReason },
    /// Enrichment refused the event.
    Skipped { kind: EventKind, reason: SkipSignal },
    /// No known shape; logged only.
    Unrecognized,
}

impl Outcome {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Forwarded { kind } | Self::Skipped { kind, .. } => *kind,
            Self::Filtered { .. } => EventKind::Traffic,
            Self::Unrecognized => EventKind::Unknown,
        }
    }

    pub fn is_forwarded(&self) -> bool {
        matches!(self, Self::Forwarded { .. })
    }

    fn labels(&self) -> (&'static str, &'static str) {
        match self {
            Self::Forwarded { .. } => ("forwarded", "none"),
            Self::Filtered { reason } => ("filtered", reason.as_str()),
            Self::Skipped { reason, .. } => ("skipped", reason.reason()),
            Self::Unrecognized => ("unrecognized", "none"),
        }
    }
}

/// The payload could not be turned into an event.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl PipelineError {
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Decode(e) => e.error_type(),
        }
    }
}

/// Wires the event-path components together.
#[derive(Clone)]
pub struct Pipeline {
    matcher: DiscriminatorMatch,
    policy: PolicyFilter,
    enricher: Enricher,
    sink: Arc<dyn EventSink>,
    metrics: Option<Arc<PeerlogMetrics>>,
}

impl Pipeline {
    pub fn new(
        matcher: DiscriminatorMatch,
        policy: PolicyFilter,
        enricher: Enricher,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            matcher,
            policy,
            enricher,
            sink,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<PeerlogMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Process one inbound payload.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Decode`] if the payload is not a JSON object
    /// or does not fit the shape it was classified as.
    pub async fn process(&self, raw: impl Into<Bytes>) -> Result<Outcome, PipelineError> {
        let started = Instant::now();

        let event = match InboundEvent::decode(raw, &self.matcher) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Rejecting undecodable event");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_event_received("invalid");
                    metrics.record_event_outcome(
                        "invalid",
                        "rejected",
                        e.error_type(),
                        elapsed_ms(started),
                    );
                }
                return Err(e.into());
            }
        };

        let kind = event.kind();
        if let Some(ref metrics) = self.metrics {
            metrics.record_event_received(kind.as_str());
        }

        let outcome = self.route(event).await;

        if let Some(ref metrics) = self.metrics {
            let (label, reason) = outcome.labels();
            metrics.record_event_outcome(kind.as_str(), label, reason, elapsed_ms(started));
        }
        Ok(outcome)
    }

    async fn route(&self, event: InboundEvent) -> Outcome {
        let kind = event.kind();
        match &event {
            InboundEvent::Unknown(value) => {
                let pretty = serde_json::to_string_pretty(value).unwrap_or_default();
                info!(payload = %pretty, "Unknown event type");
                return Outcome::Unrecognized;
            }
            InboundEvent::Traffic(traffic) => {
                if let Verdict::Drop(reason) = self.policy.evaluate(traffic) {
                    debug!(
                        event_id = %traffic.id,
                        reason = reason.as_str(),
                        "Traffic event not forward-worthy"
                    );
                    return Outcome::Filtered { reason };
                }
            }
            InboundEvent::Audit(audit) => {
                debug!(event_id = %audit.id, message = %audit.message, "Processing audit event");
            }
        }

        match self.enricher.enrich(&event).await {
            Ok(record) => {
                self.sink.emit(SinkRecord::from_canonical(&record));
                Outcome::Forwarded { kind }
            }
            Err(reason) => {
                warn!(kind = %kind, reason = %reason, "Skipping event");
                Outcome::Skipped { kind, reason }
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DirectoryError;
    use crate::identity::{Identity, IdentityCache, IdentitySource, Peer, User};
    use async_trait::async_trait;
    use prometheus_client::registry::Registry;
    use std::sync::Mutex;

    struct StaticSource<T>(Vec<T>);

    #[async_trait]
    impl<T: Identity> IdentitySource<T> for StaticSource<T> {
        async fn fetch_all(&self) -> Result<Vec<T>, DirectoryError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct CollectingSink(Mutex<Vec<SinkRecord>>);

    impl EventSink for CollectingSink {
        fn emit(&self, record: SinkRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    fn pipeline(sink: Arc<CollectingSink>) -> Pipeline {
        let users = IdentityCache::new(Arc::new(StaticSource(vec![User {
            id: "u1".to_string(),
            email: "a@x.com".to_string(),
            ..Default::default()
        }])));
        let peers = IdentityCache::new(Arc::new(StaticSource(vec![Peer {
            id: "p1".to_string(),
            hostname: "laptop".to_string(),
            owner_user_id: "u1".to_string(),
            ..Default::default()
        }])));
        Pipeline::new(
            DiscriminatorMatch::default(),
            PolicyFilter::new(vec!["100.64.0.0/10".parse().unwrap()]),
            Enricher::new(users, peers),
            sink,
        )
    }

    fn traffic(dst: &str) -> Vec<u8> {
        format!(
            r#"{{"ID":"e1","Message":"TYPE_START","Timestamp":"2024-01-01T00:00:00Z","Meta":{{
                "direction":"INGRESS","destination_type":"PEER","destination_name":"srv",
                "destination_addr":"{dst}","source_addr":"100.64.0.7:5000","source_id":"p1","protocol":6}}}}"#
        )
        .into_bytes()
    }

    #[tokio::test]
    async fn test_traffic_forwarded_with_email() {
        let sink = Arc::new(CollectingSink::default());
        let outcome = pipeline(sink.clone()).process(traffic("192.168.1.5:443")).await.unwrap();

        assert_eq!(outcome, Outcome::Forwarded { kind: EventKind::Traffic });
        let records = sink.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields["email"], "a@x.com");
        assert_eq!(records[0].fields["protocol"], "TCP");
    }

    #[tokio::test]
    async fn test_traffic_filtered_is_not_emitted() {
        let sink = Arc::new(CollectingSink::default());
        let outcome = pipeline(sink.clone()).process(traffic("100.64.3.3:443")).await.unwrap();

        assert_eq!(outcome, Outcome::Filtered { reason: DropReason::ExcludedNetwork });
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_source_is_skipped() {
        let sink = Arc::new(CollectingSink::default());
        let raw = String::from_utf8(traffic("192.168.1.5:443"))
            .unwrap()
            .replace("100.64.0.7:5000", "100.64.0.7");
        let outcome = pipeline(sink.clone()).process(raw.into_bytes()).await.unwrap();

        assert!(matches!(outcome, Outcome::Skipped { kind: EventKind::Traffic, .. }));
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_audit_forwarded_with_raw_payload() {
        let sink = Arc::new(CollectingSink::default());
        let raw = br#"{"ID":3,"InitiatorID":"u1","Message":"user blocked","Timestamp":"2024-01-01T00:00:00Z","Meta":{"reason":"policy"}}"#;
        let outcome = pipeline(sink.clone()).process(raw.to_vec()).await.unwrap();

        assert_eq!(outcome, Outcome::Forwarded { kind: EventKind::Audit });
        let records = sink.0.lock().unwrap();
        assert_eq!(records[0].fields["initiator"], "a@x.com");
        let expected: serde_json::Value = serde_json::from_slice(raw).unwrap();
        assert_eq!(records[0].fields["raw"], expected);
    }

    #[tokio::test]
    async fn test_portless_destination_is_filtered() {
        let sink = Arc::new(CollectingSink::default());
        let outcome = pipeline(sink.clone()).process(traffic("192.168.1.5")).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Filtered { reason: DropReason::MalformedDestination }
        );
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_and_invalid() {
        let sink = Arc::new(CollectingSink::default());
        let mut registry = Registry::default();
        let metrics = Arc::new(PeerlogMetrics::new(&mut registry));
        let pipeline = pipeline(sink.clone()).with_metrics(metrics);

        assert_eq!(
            pipeline.process(br#"{"hello":"world"}"#.to_vec()).await.unwrap(),
            Outcome::Unrecognized
        );
        let err = pipeline.process(b"[1,2,3]".to_vec()).await.unwrap_err();
        assert_eq!(err.error_type(), "invalid_json");
        assert!(sink.0.lock().unwrap().is_empty());

        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &registry).unwrap();
        assert!(buffer.contains("outcome=\"unrecognized\""));
        assert!(buffer.contains("outcome=\"rejected\""));
    }

    #[tokio::test]
    async fn test_same_payload_same_record() {
        let sink = Arc::new(CollectingSink::default());
        let pipeline = pipeline(sink.clone());
        pipeline.process(traffic("192.168.1.5:443")).await.unwrap();
        pipeline.process(traffic("192.168.1.5:443")).await.unwrap();

        let records = sink.0.lock().unwrap();
        assert_eq!(records[0], records[1]);
    }
}
