//! Traffic (flow) events.
//!
//! The platform emits one of these per flow start, end or drop. Keys at the
//! top level are PascalCase, keys inside `Meta` are snake_case. Unknown keys
//! at either level are ignored so new platform fields do not break decoding.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Flow direction as reported by the peer that observed it.
pub const DIRECTION_INGRESS: &str = "INGRESS";
pub const DIRECTION_EGRESS: &str = "EGRESS";

/// Destination type for flows that terminate on a network peer.
pub const DESTINATION_PEER: &str = "PEER";

/// A decoded traffic event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficEvent {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "InitiatorID")]
    pub initiator_id: String,

    /// Discriminator, e.g. `TYPE_START`.
    #[serde(rename = "Message")]
    pub message: String,

    #[serde(rename = "Meta", alias = "meta")]
    pub meta: TrafficMeta,

    #[serde(rename = "Reference")]
    pub reference: String,

    #[serde(rename = "target_id", alias = "TargetID")]
    pub target_id: String,

    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Flow attributes.
///
/// Addresses are `ip:port` strings, IPv6 as `[addr]:port`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficMeta {
    pub source_id: String,
    pub source_addr: String,
    pub source_name: String,
    pub source_type: String,
    pub source_port: String,
    pub source_dns_label: String,
    pub source_geo_city: String,
    pub source_geo_country: String,

    pub destination_id: String,
    pub destination_addr: String,
    pub destination_name: String,
    pub destination_type: String,
    pub destination_dns_label: String,
    pub destination_geo_city: String,
    pub destination_geo_country: String,

    /// `INGRESS` or `EGRESS`.
    pub direction: String,
    /// IANA protocol number.
    pub protocol: u32,
    /// Peer that observed and reported the flow (the exit node).
    pub reporter_id: String,

    pub rx_bytes: u64,
    pub rx_packets: u64,
    pub tx_bytes: u64,
    pub tx_packets: u64,

    pub flow_id: String,
    pub policy_id: String,
    pub policy_name: String,
    pub icmp_type: i32,
    pub icmp_code: i32,
    pub user_id: String,
    pub received_timestamp: String,
}

impl TrafficEvent {
    /// Decode a payload already classified as traffic.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Traffic`] if a known field has the wrong type
    /// (for example a non-numeric `protocol` or an unparseable `Timestamp`).
    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(raw).map_err(DecodeError::Traffic)
    }

    /// Event time as fractional unix seconds.
    pub fn unix_time(&self) -> f64 {
        self.timestamp.timestamp() as f64
            + f64::from(self.timestamp.timestamp_subsec_nanos()) / 1e9
    }
}
