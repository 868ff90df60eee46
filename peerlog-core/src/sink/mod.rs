//! Downstream log sinks.
//!
//! Delivery is fire-and-forget: [`EventSink::emit`] never blocks the caller
//! and never reports failure back to it. Sinks log and count their own
//! failures.
//!
//! - [`hec::HecSink`] posts records to an HTTP Event Collector.
//! - [`TracingSink`] logs records locally when no collector is configured.

pub mod hec;

pub use hec::{HecConfig, HecSink, StreamTarget};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::info;

use crate::enrich::CanonicalRecord;

/// Which logical log stream a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Traffic,
    Audit,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Traffic => "traffic",
            Self::Audit => "audit",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record ready for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRecord {
    pub stream: Stream,
    /// Short human-readable summary, e.g. "netbird traffic event".
    pub message: String,
    /// Structured fields; always a JSON object.
    pub fields: Map<String, Value>,
    /// Event time as fractional unix seconds.
    pub time: f64,
}

impl SinkRecord {
    /// Build a sink record from an enriched record.
    pub fn from_canonical(record: &CanonicalRecord) -> Self {
        let (stream, message, value) = match record {
            CanonicalRecord::Traffic(r) => (
                Stream::Traffic,
                "netbird traffic event",
                serde_json::to_value(r),
            ),
            CanonicalRecord::Audit(r) => {
                (Stream::Audit, "netbird audit event", serde_json::to_value(r))
            }
        };

        // Both record types serialize to objects; anything else would be a
        // bug in their Serialize impls, so fall back to an empty field set.
        let fields = match value {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };

        Self {
            stream,
            message: message.to_string(),
            fields,
            time: record.time(),
        }
    }
}

/// Destination for enriched records.
pub trait EventSink: Send + Sync {
    /// Hand a record to the sink. Must not block.
    fn emit(&self, record: SinkRecord);
}

/// Sink that writes records to the local log at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, record: SinkRecord) {
        let fields = Value::Object(record.fields);
        info!(
            stream = %record.stream,
            time = record.time,
            fields = %fields,
            "{}",
            record.message
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::{AuditRecord, TrafficRecord};

    #[test]
    fn test_traffic_record_fields() {
        let record = CanonicalRecord::Traffic(TrafficRecord {
            time: 1_704_067_200.5,
            protocol: "TCP".to_string(),
            src_ip: "100.64.0.7".to_string(),
            src_port: 51820,
            source_name: "laptop".to_string(),
            email: "a@x.com".to_string(),
            dst_ip: "10.1.0.5".to_string(),
            dst_port: 443,
            exit_node_hostname: "exit-1".to_string(),
            message: "TYPE_START".to_string(),
        });

        let sink = SinkRecord::from_canonical(&record);
        assert_eq!(sink.stream, Stream::Traffic);
        assert_eq!(sink.time, 1_704_067_200.5);
        assert_eq!(sink.fields.get("email"), Some(&Value::from("a@x.com")));
        assert_eq!(sink.fields.get("dstport"), Some(&Value::from(443)));
    }

    #[test]
    fn test_audit_record_carries_raw_payload() {
        let record = CanonicalRecord::Audit(AuditRecord {
            time: 0.0,
            id: "1".to_string(),
            message: "user blocked".to_string(),
            initiator: "Ada".to_string(),
            initiator_id: "u1".to_string(),
            target: "u2".to_string(),
            target_id: "u2".to_string(),
            extra: Map::new(),
            raw: bytes::Bytes::from_static(br#"{"ID":1,"x":"marker","Meta":{"ip":"1.2.3.4"}}"#),
        });

        let sink = SinkRecord::from_canonical(&record);
        assert_eq!(sink.stream, Stream::Audit);
        assert_eq!(sink.fields.get("initiator"), Some(&Value::from("Ada")));
        assert_eq!(
            sink.fields.get("raw"),
            Some(&serde_json::json!({"ID": 1, "x": "marker", "Meta": {"ip": "1.2.3.4"}}))
        );
    }

    #[test]
    fn test_non_json_raw_payload_is_kept_as_text() {
        let record = CanonicalRecord::Audit(AuditRecord {
            time: 0.0,
            id: String::new(),
            message: String::new(),
            initiator: String::new(),
            initiator_id: String::new(),
            target: String::new(),
            target_id: String::new(),
            extra: Map::new(),
            raw: bytes::Bytes::from_static(b"not json"),
        });

        let sink = SinkRecord::from_canonical(&record);
        assert_eq!(sink.fields.get("raw"), Some(&Value::from("not json")));
    }

    #[test]
    fn test_tracing_sink_accepts_records() {
        TracingSink.emit(SinkRecord {
            stream: Stream::Audit,
            message: "m".to_string(),
            fields: Map::new(),
            time: 0.0,
        });
    }
}
