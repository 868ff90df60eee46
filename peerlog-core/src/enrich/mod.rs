//! Identity enrichment.
//!
//! Turns decoded events into canonical records by joining them with the
//! identity caches and the static translation tables. Identity misses never
//! fail an event: the affected field is left empty (traffic) or keeps the raw
//! ID (audit). Only input that cannot be repaired, such as an address without
//! a port, yields a [`SkipSignal`].

pub mod protocol;

pub use protocol::ProtocolTable;

use std::collections::{BTreeMap, HashMap};

use bytes::Bytes;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{LookupError, SkipSignal};
use crate::event::{AuditEnvelope, InboundEvent, TrafficEvent};
use crate::identity::{IdentityCache, Peer, User};
use crate::policy::split_host_port;

/// Static lookup tables applied during enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Translations {
    /// Exit-node hostname → source IP to report instead of the observed one.
    pub source_ip_overrides: HashMap<String, String>,
}

/// Enriched traffic record, in sink field naming.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficRecord {
    /// Unix seconds, fractional.
    pub time: f64,
    pub protocol: String,
    #[serde(rename = "srcip")]
    pub src_ip: String,
    #[serde(rename = "srcport")]
    pub src_port: u16,
    #[serde(rename = "sourcename")]
    pub source_name: String,
    pub email: String,
    #[serde(rename = "dstip")]
    pub dst_ip: String,
    #[serde(rename = "dstport")]
    pub dst_port: u16,
    #[serde(rename = "exitnode")]
    pub exit_node_hostname: String,
    pub message: String,
}

/// Enriched audit record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditRecord {
    pub time: f64,
    pub id: String,
    pub message: String,
    /// Initiator display name, or the raw ID if unresolved.
    pub initiator: String,
    pub initiator_id: String,
    /// Target display name, or the raw ID if unresolved.
    pub target: String,
    pub target_id: String,
    pub extra: Map<String, Value>,
    /// The payload as received, re-emitted as JSON.
    #[serde(serialize_with = "raw_payload")]
    pub raw: Bytes,
}

/// Serialize retained payload bytes as embedded JSON, or as text if they are
/// not valid JSON.
fn raw_payload<S: Serializer>(raw: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
    match serde_json::from_slice::<&RawValue>(raw) {
        Ok(value) => value.serialize(serializer),
        Err(_) => serializer.serialize_str(&String::from_utf8_lossy(raw)),
    }
}

/// Output of the enricher.
#[derive(Debug, Clone, PartialEq)]
pub enum CanonicalRecord {
    Traffic(TrafficRecord),
    Audit(AuditRecord),
}

impl CanonicalRecord {
    pub fn time(&self) -> f64 {
        match self {
            Self::Traffic(r) => r.time,
            Self::Audit(r) => r.time,
        }
    }
}

/// Joins events with cached identities.
#[derive(Clone)]
pub struct Enricher {
    users: IdentityCache<User>,
    peers: IdentityCache<Peer>,
    translations: Translations,
    protocols: ProtocolTable,
}

impl Enricher {
    pub fn new(users: IdentityCache<User>, peers: IdentityCache<Peer>) -> Self {
        Self {
            users,
            peers,
            translations: Translations::default(),
            protocols: ProtocolTable::default(),
        }
    }

    pub fn with_translations(mut self, translations: Translations) -> Self {
        self.translations = translations;
        self
    }

    pub fn with_protocol_overrides(mut self, overrides: &BTreeMap<u32, String>) -> Self {
        self.protocols = ProtocolTable::with_overrides(overrides);
        self
    }

    /// Enrich a decoded event.
    ///
    /// # Errors
    ///
    /// Returns a [`SkipSignal`] for input that cannot be turned into a record.
    /// Identity misses are never errors.
    pub async fn enrich(&self, event: &InboundEvent) -> Result<CanonicalRecord, SkipSignal> {
        match event {
            InboundEvent::Traffic(traffic) => {
                self.enrich_traffic(traffic).await.map(CanonicalRecord::Traffic)
            }
            InboundEvent::Audit(audit) => Ok(CanonicalRecord::Audit(self.enrich_audit(audit).await)),
            InboundEvent::Unknown(_) => Err(SkipSignal::UnrecognizedEvent),
        }
    }

    pub async fn enrich_traffic(&self, event: &TrafficEvent) -> Result<TrafficRecord, SkipSignal> {
        let meta = &event.meta;

        let (mut src_ip, src_port) = split_address("source", &meta.source_addr)?;
        let (dst_ip, dst_port) = split_address("destination", &meta.destination_addr)?;

        let (email, exit_node_hostname) = tokio::join!(
            self.owner_email(&meta.source_id),
            self.peer_hostname(&meta.reporter_id)
        );

        if let Some(override_ip) = self
            .translations
            .source_ip_overrides
            .get(&exit_node_hostname)
            .filter(|ip| !ip.trim().is_empty())
        {
            debug!(
                exit_node = %exit_node_hostname,
                observed = %src_ip,
                replacement = %override_ip,
                "Overriding source IP for exit node"
            );
            src_ip = override_ip.trim().to_string();
        }

        Ok(TrafficRecord {
            time: event.unix_time(),
            protocol: self.protocols.name(meta.protocol),
            src_ip,
            src_port,
            source_name: meta.source_name.clone(),
            email,
            dst_ip,
            dst_port,
            exit_node_hostname,
            message: event.message.clone(),
        })
    }

    pub async fn enrich_audit(&self, event: &AuditEnvelope) -> AuditRecord {
        let (initiator, target) = tokio::join!(
            self.user_label(&event.initiator_id),
            self.user_label(&event.target_id)
        );

        AuditRecord {
            time: event.timestamp.timestamp() as f64
                + f64::from(event.timestamp.timestamp_subsec_nanos()) / 1e9,
            id: event.id.clone(),
            message: event.message.clone(),
            initiator,
            initiator_id: event.initiator_id.clone(),
            target,
            target_id: event.target_id.clone(),
            extra: event.extra.clone(),
            raw: event.raw.clone(),
        }
    }

    /// Source peer → owning user → email, or "" on any miss.
    async fn owner_email(&self, source_peer_id: &str) -> String {
        if source_peer_id.is_empty() {
            return String::new();
        }
        let Some(peer) = resolve(&self.peers, source_peer_id).await else {
            return String::new();
        };
        if peer.owner_user_id.is_empty() {
            return String::new();
        }
        resolve(&self.users, &peer.owner_user_id)
            .await
            .map(|user| user.email)
            .unwrap_or_default()
    }

    async fn peer_hostname(&self, peer_id: &str) -> String {
        if peer_id.is_empty() {
            return String::new();
        }
        resolve(&self.peers, peer_id)
            .await
            .map(|peer| peer.hostname)
            .unwrap_or_default()
    }

    /// User display name for `user_id`, or the ID itself.
    async fn user_label(&self, user_id: &str) -> String {
        if user_id.is_empty() {
            return String::new();
        }
        resolve(&self.users, user_id)
            .await
            .and_then(|user| user.display_name().map(str::to_string))
            .unwrap_or_else(|| user_id.to_string())
    }
}

/// Cache lookup that logs and swallows misses.
async fn resolve<T: crate::identity::Identity>(cache: &IdentityCache<T>, id: &str) -> Option<T> {
    match cache.get(id).await {
        Ok(record) => Some(record),
        Err(LookupError::NotFound { kind, id }) => {
            debug!(kind = %kind, id = %id, "Identity not found, enriching without it");
            None
        }
        Err(e @ LookupError::UpstreamUnavailable { .. }) => {
            warn!(error = %e, "Identity directory unavailable, enriching without it");
            None
        }
    }
}

fn split_address(field: &'static str, addr: &str) -> Result<(String, u16), SkipSignal> {
    let malformed = || SkipSignal::MalformedAddress {
        field,
        value: addr.to_string(),
    };
    let (host, port) = split_host_port(addr).ok_or_else(malformed)?;
    let port = port.parse::<u16>().map_err(|_| malformed())?;
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DirectoryError;
    use crate::event::{DiscriminatorMatch, TrafficMeta};
    use crate::identity::{Identity, IdentitySource};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    struct StaticSource<T>(Vec<T>);

    #[async_trait]
    impl<T: Identity> IdentitySource<T> for StaticSource<T> {
        async fn fetch_all(&self) -> Result<Vec<T>, DirectoryError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl<T: Identity> IdentitySource<T> for FailingSource {
        async fn fetch_all(&self) -> Result<Vec<T>, DirectoryError> {
            Err(DirectoryError::Status {
                url: "http://directory/api".to_string(),
                status: 503,
            })
        }
    }

    fn enricher(users: Vec<User>, peers: Vec<Peer>) -> Enricher {
        Enricher::new(
            IdentityCache::new(Arc::new(StaticSource(users))),
            IdentityCache::new(Arc::new(StaticSource(peers))),
        )
    }

    fn peer(id: &str, hostname: &str, owner: &str) -> Peer {
        Peer {
            id: id.to_string(),
            hostname: hostname.to_string(),
            owner_user_id: owner.to_string(),
            ..Default::default()
        }
    }

    fn user(id: &str, email: &str, name: &str) -> User {
        User {
            id: id.to_string(),
            email: email.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn traffic(source_id: &str, protocol: u32) -> TrafficEvent {
        TrafficEvent {
            message: "TYPE_START".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            meta: TrafficMeta {
                source_id: source_id.to_string(),
                source_addr: "100.64.0.7:51820".to_string(),
                source_name: "laptop".to_string(),
                destination_addr: "10.1.0.5:443".to_string(),
                reporter_id: "p-exit".to_string(),
                protocol,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_traffic_enrichment() {
        let enricher = enricher(
            vec![user("u1", "a@x.com", "Ada")],
            vec![peer("p1", "laptop", "u1"), peer("p-exit", "exit-1", "")],
        );

        let record = enricher.enrich_traffic(&traffic("p1", 6)).await.unwrap();
        assert_eq!(record.email, "a@x.com");
        assert_eq!(record.exit_node_hostname, "exit-1");
        assert_eq!(record.protocol, "TCP");
        assert_eq!(record.src_ip, "100.64.0.7");
        assert_eq!(record.src_port, 51820);
        assert_eq!(record.dst_ip, "10.1.0.5");
        assert_eq!(record.dst_port, 443);
        assert_eq!(record.source_name, "laptop");
        assert_eq!(record.message, "TYPE_START");
        assert_eq!(record.time, 1_704_067_200.0);
    }

    #[tokio::test]
    async fn test_missing_source_peer_yields_empty_email() {
        let enricher = enricher(vec![user("u1", "a@x.com", "")], vec![]);
        let record = enricher.enrich_traffic(&traffic("ghost", 17)).await.unwrap();
        assert_eq!(record.email, "");
        assert_eq!(record.exit_node_hostname, "");
        assert_eq!(record.protocol, "UDP");
    }

    #[tokio::test]
    async fn test_unmapped_protocol_is_decimal() {
        let enricher = enricher(vec![], vec![]);
        let record = enricher.enrich_traffic(&traffic("", 253)).await.unwrap();
        assert_eq!(record.protocol, "253");
    }

    #[tokio::test]
    async fn test_source_ip_override_by_exit_node() {
        let translations = Translations {
            source_ip_overrides: HashMap::from([
                ("exit-1".to_string(), "192.0.2.10".to_string()),
                ("exit-2".to_string(), "  ".to_string()),
            ]),
        };
        let enricher = enricher(vec![], vec![peer("p-exit", "exit-1", "")])
            .with_translations(translations.clone());
        let record = enricher.enrich_traffic(&traffic("", 6)).await.unwrap();
        assert_eq!(record.src_ip, "192.0.2.10");

        let enricher = enricher_with_exit("exit-2").with_translations(translations);
        let record = enricher.enrich_traffic(&traffic("", 6)).await.unwrap();
        assert_eq!(record.src_ip, "100.64.0.7");
    }

    fn enricher_with_exit(hostname: &str) -> Enricher {
        enricher(vec![], vec![peer("p-exit", hostname, "")])
    }

    #[tokio::test]
    async fn test_malformed_addresses_skip() {
        let enricher = enricher(vec![], vec![]);

        let mut event = traffic("", 6);
        event.meta.source_addr = "100.64.0.7".to_string();
        let skip = enricher.enrich_traffic(&event).await.unwrap_err();
        assert_eq!(
            skip,
            SkipSignal::MalformedAddress {
                field: "source",
                value: "100.64.0.7".to_string()
            }
        );

        let mut event = traffic("", 6);
        event.meta.destination_addr = "10.1.0.5:https".to_string();
        let skip = enricher.enrich_traffic(&event).await.unwrap_err();
        assert_eq!(skip.reason(), "malformed_address");
    }

    #[tokio::test]
    async fn test_ipv6_addresses() {
        let enricher = enricher(vec![], vec![]);
        let mut event = traffic("", 58);
        event.meta.source_addr = "[fd7a::1]:0".to_string();
        let record = enricher.enrich_traffic(&event).await.unwrap();
        assert_eq!(record.src_ip, "fd7a::1");
        assert_eq!(record.protocol, "IPv6-ICMP");
    }

    #[tokio::test]
    async fn test_audit_resolves_display_names() {
        let enricher = enricher(
            vec![user("u1", "a@x.com", "Ada"), user("u2", "b@x.com", "")],
            vec![],
        );
        let raw = br#"{"ID":1,"InitiatorID":"u1","target_id":"u2","Message":"user blocked","Timestamp":"2024-01-01T00:00:00Z","meta":{"ip":"1.2.3.4"}}"#;
        let event = match InboundEvent::decode(raw.to_vec(), &DiscriminatorMatch::default()).unwrap() {
            InboundEvent::Audit(a) => a,
            other => panic!("expected audit, got {other:?}"),
        };

        let record = enricher.enrich_audit(&event).await;
        assert_eq!(record.initiator, "Ada");
        assert_eq!(record.target, "b@x.com");
        assert_eq!(record.initiator_id, "u1");
        assert_eq!(record.extra.get("ip"), Some(&Value::from("1.2.3.4")));
        assert_eq!(record.raw.as_ref(), raw.as_slice());
    }

    #[tokio::test]
    async fn test_audit_unresolved_ids_are_kept() {
        let enricher = enricher(vec![], vec![]);
        let event = AuditEnvelope::decode(
            br#"{"InitiatorID":"u9","Timestamp":"2024-01-01T00:00:00Z"}"#.to_vec(),
        )
        .unwrap();
        let record = enricher.enrich_audit(&event).await;
        assert_eq!(record.initiator, "u9");
        assert_eq!(record.target, "");
    }

    #[tokio::test]
    async fn test_directory_outage_still_produces_records() {
        let enricher = Enricher::new(
            IdentityCache::new(Arc::new(FailingSource)),
            IdentityCache::new(Arc::new(FailingSource)),
        );

        let record = enricher.enrich_traffic(&traffic("p1", 6)).await.unwrap();
        assert_eq!(record.email, "");
        assert_eq!(record.exit_node_hostname, "");
        assert_eq!(record.src_ip, "100.64.0.7");
        assert_eq!(record.protocol, "TCP");

        let audit = AuditEnvelope::decode(
            br#"{"InitiatorID":"u1","TargetID":"u2","Timestamp":"2024-01-01T00:00:00Z"}"#.to_vec(),
        )
        .unwrap();
        let record = match enricher.enrich(&InboundEvent::Audit(audit)).await.unwrap() {
            CanonicalRecord::Audit(record) => record,
            other => panic!("expected audit record, got {other:?}"),
        };
        assert_eq!(record.initiator, "u1");
        assert_eq!(record.target, "u2");
    }

    #[tokio::test]
    async fn test_unknown_event_is_skipped() {
        let enricher = enricher(vec![], vec![]);
        let skip = enricher
            .enrich(&InboundEvent::Unknown(serde_json::json!({"x": 1})))
            .await
            .unwrap_err();
        assert_eq!(skip, SkipSignal::UnrecognizedEvent);
    }

    #[test]
    fn test_traffic_record_field_names() {
        let record = TrafficRecord {
            time: 1.5,
            protocol: "TCP".to_string(),
            src_ip: "1.1.1.1".to_string(),
            src_port: 1,
            source_name: "s".to_string(),
            email: "e".to_string(),
            dst_ip: "2.2.2.2".to_string(),
            dst_port: 2,
            exit_node_hostname: "x".to_string(),
            message: "m".to_string(),
        };
        let value = serde_json::to_value(&record).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "dstip", "dstport", "email", "exitnode", "message", "protocol", "sourcename",
                "srcip", "srcport", "time"
            ]
        );
    }
}
