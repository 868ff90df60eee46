//! HTTP Event Collector sink.
//!
//! Records are queued on a bounded channel and posted one at a time by a
//! background worker to `<url>/services/collector/event`:
//!
//! ```text
//! emit() ──try_send──► [ bounded queue ] ──► worker ──POST──► collector
//!    │                                          │
//!    └─ queue full: drop + warn + count         └─ non-2xx / error: warn + count
//! ```
//!
//! There is no retry and no persistence. On shutdown the worker drains what
//! is already queued, then exits.
//!
//! # Security
//!
//! The token is only ever sent in the `Authorization` header and is redacted
//! from `Debug` output.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EventSink, SinkRecord, Stream};
use crate::error::SinkError;
use crate::telemetry::PeerlogMetrics;

/// Collector path appended to the configured base URL.
pub const HEC_EVENT_PATH: &str = "/services/collector/event";

/// Index and sourcetype for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTarget {
    /// Empty means the collector's default index.
    #[serde(default)]
    pub index: String,
    pub sourcetype: String,
}

impl StreamTarget {
    fn named(name: &str) -> Self {
        Self {
            index: name.to_string(),
            sourcetype: name.to_string(),
        }
    }
}

/// Configuration for [`HecSink`].
#[derive(Clone)]
pub struct HecConfig {
    /// Collector base URL (e.g., "https://splunk.example:8088")
    pub url: String,
    pub token: String,
    /// `host` field on every event
    pub host: String,
    /// `source` field on every event
    pub source: String,
    pub traffic: StreamTarget,
    pub audit: StreamTarget,
    /// Per-request timeout
    pub timeout: Duration,
    /// Records held before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for HecConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            host: "peerlog".to_string(),
            source: "peerlog".to_string(),
            traffic: StreamTarget::named("netbird:traffic"),
            audit: StreamTarget::named("netbird:audit"),
            timeout: Duration::from_secs(5),
            queue_capacity: 1024,
        }
    }
}

impl std::fmt::Debug for HecConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HecConfig")
            .field("url", &self.url)
            .field("token", &"[REDACTED]")
            .field("host", &self.host)
            .field("source", &self.source)
            .field("traffic", &self.traffic)
            .field("audit", &self.audit)
            .field("timeout", &self.timeout)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl HecConfig {
    fn target(&self, stream: Stream) -> &StreamTarget {
        match stream {
            Stream::Traffic => &self.traffic,
            Stream::Audit => &self.audit,
        }
    }
}

/// Wire format of one collector event.
#[derive(Debug, Serialize)]
struct HecEvent<'a> {
    event: Value,
    time: f64,
    host: &'a str,
    source: &'a str,
    sourcetype: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    index: &'a str,
}

fn is_blank(s: &&str) -> bool {
    s.is_empty()
}

/// Non-blocking handle to the collector worker.
#[derive(Clone)]
pub struct HecSink {
    tx: mpsc::Sender<SinkRecord>,
    metrics: Option<Arc<PeerlogMetrics>>,
}

impl HecSink {
    /// Start the delivery worker.
    ///
    /// The worker runs until `shutdown` is cancelled, then drains the queue
    /// and exits; await the returned handle to wait for that.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::SinkUnavailable` if the URL is invalid or the HTTP
    /// client cannot be built.
    pub fn spawn(
        config: HecConfig,
        metrics: Option<Arc<PeerlogMetrics>>,
        shutdown: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), SinkError> {
        let endpoint = format!("{}{}", config.url.trim_end_matches('/'), HEC_EVENT_PATH);
        reqwest::Url::parse(&endpoint).map_err(|e| SinkError::SinkUnavailable {
            reason: format!("invalid collector url '{}': {e}", config.url),
        })?;

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SinkError::SinkUnavailable {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let worker = HecWorker {
            client,
            authorization: format!("Splunk {}", config.token),
            endpoint,
            config,
            metrics: metrics.clone(),
        };

        info!(endpoint = %worker.endpoint, "Starting log collector sink");
        let handle = tokio::spawn(worker.run(rx, shutdown));

        Ok((Self { tx, metrics }, handle))
    }
}

impl EventSink for HecSink {
    fn emit(&self, record: SinkRecord) {
        let stream = record.stream;
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(stream = %stream, error = %SinkError::QueueFull, "Dropping record");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_sink_dropped(stream.as_str());
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(stream = %stream, "Log collector sink is shut down, dropping record");
                if let Some(ref metrics) = self.metrics {
                    metrics.record_sink_dropped(stream.as_str());
                }
            }
        }
    }
}

struct HecWorker {
    client: Client,
    config: HecConfig,
    endpoint: String,
    authorization: String,
    metrics: Option<Arc<PeerlogMetrics>>,
}

impl HecWorker {
    async fn run(self, mut rx: mpsc::Receiver<SinkRecord>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = rx.recv() => match next {
                    Some(record) => self.deliver_and_record(record).await,
                    None => return,
                },
            }
        }

        rx.close();
        let mut drained = 0usize;
        while let Some(record) = rx.recv().await {
            self.deliver_and_record(record).await;
            drained += 1;
        }
        info!(drained, "Log collector sink stopped");
    }

    async fn deliver_and_record(&self, record: SinkRecord) {
        let stream = record.stream;
        let started = Instant::now();
        let outcome = match self.deliver(&record).await {
            Ok(()) => "success",
            Err((kind, e)) => {
                warn!(stream = %stream, error = %e, "Log collector delivery failed");
                kind
            }
        };
        if let Some(ref metrics) = self.metrics {
            metrics.record_sink_delivery(
                stream.as_str(),
                outcome,
                started.elapsed().as_secs_f64() * 1000.0,
            );
        }
    }

    async fn deliver(&self, record: &SinkRecord) -> Result<(), (&'static str, SinkError)> {
        let payload = self.payload(record);

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                let kind = if e.is_timeout() { "timeout" } else { "transport" };
                (
                    kind,
                    SinkError::SinkUnavailable {
                        reason: e.to_string(),
                    },
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err((
                "status",
                SinkError::SinkUnavailable {
                    reason: format!("collector returned HTTP {status}"),
                },
            ));
        }

        debug!(stream = %record.stream, "Delivered record to log collector");
        Ok(())
    }

    fn payload<'a>(&'a self, record: &SinkRecord) -> HecEvent<'a> {
        let target = self.config.target(record.stream);
        let mut event = record.fields.clone();
        event
            .entry("msg")
            .or_insert_with(|| Value::from(record.message.clone()));

        HecEvent {
            event: Value::Object(event),
            time: record.time,
            host: &self.config.host,
            source: &self.config.source,
            sourcetype: &target.sourcetype,
            index: &target.index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::registry::Registry;
    use serde_json::{Map, json};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(stream: Stream) -> SinkRecord {
        let mut fields = Map::new();
        fields.insert("email".to_string(), json!("a@x.com"));
        SinkRecord {
            stream,
            message: "netbird traffic event".to_string(),
            fields,
            time: 1_704_067_200.5,
        }
    }

    fn config(url: &str) -> HecConfig {
        HecConfig {
            url: url.to_string(),
            token: "hec-token".to_string(),
            host: "fw-01".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_posts_event_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/services/collector/event"))
            .and(header("authorization", "Splunk hec-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text":"Success","code":0})))
            .expect(2)
            .mount(&server)
            .await;

        let shutdown = CancellationToken::new();
        let (sink, handle) = HecSink::spawn(config(&server.uri()), None, shutdown.clone()).unwrap();
        sink.emit(record(Stream::Traffic));
        sink.emit(record(Stream::Audit));

        shutdown.cancel();
        handle.await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);

        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["event"]["email"], "a@x.com");
        assert_eq!(body["event"]["msg"], "netbird traffic event");
        assert_eq!(body["time"], 1_704_067_200.5);
        assert_eq!(body["host"], "fw-01");
        assert_eq!(body["source"], "peerlog");

        let streams: Vec<(String, String)> = requests
            .iter()
            .map(|r| {
                let b: Value = serde_json::from_slice(&r.body).unwrap();
                (
                    b["index"].as_str().unwrap().to_string(),
                    b["sourcetype"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        assert!(streams.contains(&("netbird:traffic".to_string(), "netbird:traffic".to_string())));
        assert!(streams.contains(&("netbird:audit".to_string(), "netbird:audit".to_string())));
    }

    #[tokio::test]
    async fn test_empty_index_is_omitted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut cfg = config(&server.uri());
        cfg.audit.index.clear();
        let shutdown = CancellationToken::new();
        let (sink, handle) = HecSink::spawn(cfg, None, shutdown.clone()).unwrap();
        sink.emit(record(Stream::Audit));
        shutdown.cancel();
        handle.await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body.get("index").is_none());
        assert_eq!(body["sourcetype"], "netbird:audit");
    }

    #[tokio::test]
    async fn test_collector_error_is_counted_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut registry = Registry::default();
        let metrics = Arc::new(PeerlogMetrics::new(&mut registry));
        let shutdown = CancellationToken::new();
        let (sink, handle) =
            HecSink::spawn(config(&server.uri()), Some(metrics), shutdown.clone()).unwrap();
        sink.emit(record(Stream::Traffic));
        shutdown.cancel();
        handle.await.unwrap();

        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &registry).unwrap();
        assert!(buffer.contains("outcome=\"status\""), "got: {buffer}");
    }

    #[tokio::test]
    async fn test_full_queue_drops_and_counts() {
        let mut registry = Registry::default();
        let metrics = Arc::new(PeerlogMetrics::new(&mut registry));
        let (tx, _rx) = mpsc::channel(1);
        let sink = HecSink {
            tx,
            metrics: Some(metrics),
        };

        sink.emit(record(Stream::Traffic));
        sink.emit(record(Stream::Traffic));

        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &registry).unwrap();
        let dropped = buffer
            .lines()
            .find(|l| l.starts_with("peerlog_sink_deliveries_total") && l.contains("dropped"))
            .expect("dropped series present");
        assert!(dropped.ends_with(" 1"), "got: {dropped}");
    }

    #[test]
    fn test_invalid_url_is_rejected() {
        let err = HecSink::spawn(config("not a url"), None, CancellationToken::new());
        assert!(matches!(err, Err(SinkError::SinkUnavailable { .. })));
    }

    #[test]
    fn test_debug_redacts_token() {
        let debug = format!("{:?}", config("http://c"));
        assert!(!debug.contains("hec-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}
