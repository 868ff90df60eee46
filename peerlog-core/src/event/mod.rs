//! Inbound event classification and decoding.
//!
//! Webhook payloads come in two known shapes plus anything else the platform
//! may send in the future:
//!
//! | Kind | Recognized by | Decoded into |
//! |------|---------------|--------------|
//! | Traffic | `message` discriminator matches the configured strategy | [`TrafficEvent`] |
//! | Audit | has a `Timestamp`- or `InitiatorID`-shaped key | [`AuditEnvelope`] |
//! | Unknown | any other JSON object | [`serde_json::Value`] |
//!
//! Classification only looks at top-level keys; values are left as raw bytes
//! until the chosen decoder needs them. Payloads that are not JSON objects are
//! rejected with [`ClassifyError`].

pub mod audit;
pub mod fields;
pub mod traffic;

pub use audit::AuditEnvelope;
pub use fields::RawFields;
pub use traffic::{TrafficEvent, TrafficMeta};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ClassifyError, DecodeError};
use fields::raw_to_string;

/// Key carrying the traffic discriminator, matched ignoring case.
pub const DISCRIMINATOR_KEY: &str = "message";

/// How the discriminator value is matched against traffic event types.
///
/// The value is trimmed and uppercased before matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DiscriminatorMatch {
    /// Any value starting with `prefix` is traffic.
    Prefix { prefix: String },
    /// Only the listed values are traffic.
    Exact { values: Vec<String> },
}

impl Default for DiscriminatorMatch {
    fn default() -> Self {
        Self::Prefix {
            prefix: "TYPE_".to_string(),
        }
    }
}

impl DiscriminatorMatch {
    /// The fixed list the platform used before it added more flow types.
    pub fn legacy_exact() -> Self {
        Self::Exact {
            values: ["TYPE_START", "TYPE_END", "TYPE_DROP"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    pub fn matches(&self, discriminator: &str) -> bool {
        let normalized = discriminator.trim().to_ascii_uppercase();
        match self {
            Self::Prefix { prefix } => {
                !prefix.is_empty() && normalized.starts_with(&prefix.trim().to_ascii_uppercase())
            }
            Self::Exact { values } => values
                .iter()
                .any(|v| v.trim().eq_ignore_ascii_case(&normalized)),
        }
    }
}

/// Which known shape a payload has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Traffic,
    Audit,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Traffic => "traffic",
            Self::Audit => "audit",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a payload by peeking at its top-level keys.
///
/// # Errors
///
/// Returns [`ClassifyError`] if `raw` is not a JSON object.
pub fn classify(raw: &[u8], matcher: &DiscriminatorMatch) -> Result<EventKind, ClassifyError> {
    let fields = RawFields::parse(raw)?;
    Ok(classify_fields(&fields, matcher))
}

/// Classify already-parsed top-level fields.
pub fn classify_fields(fields: &RawFields, matcher: &DiscriminatorMatch) -> EventKind {
    let is_traffic = fields
        .get_ignore_case(DISCRIMINATOR_KEY)
        .is_some_and(|v| matcher.matches(&raw_to_string(v)));
    if is_traffic {
        return EventKind::Traffic;
    }

    if fields.get_loose("timestamp").is_some() || fields.get_loose("initiatorid").is_some() {
        return EventKind::Audit;
    }

    EventKind::Unknown
}

/// A payload decoded into the shape its classification called for.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Traffic(TrafficEvent),
    Audit(AuditEnvelope),
    Unknown(serde_json::Value),
}

impl InboundEvent {
    /// Classify `raw` and decode it once into the matching variant.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::Classify`] if `raw` is not a JSON object.
    /// - [`DecodeError::Traffic`] / [`DecodeError::Audit`] if the payload does
    ///   not fit the shape it was classified as.
    pub fn decode(raw: impl Into<Bytes>, matcher: &DiscriminatorMatch) -> Result<Self, DecodeError> {
        let raw = raw.into();
        let fields = RawFields::parse(&raw)?;
        match classify_fields(&fields, matcher) {
            EventKind::Traffic => TrafficEvent::decode(&raw).map(Self::Traffic),
            EventKind::Audit => AuditEnvelope::from_fields(fields, raw).map(Self::Audit),
            EventKind::Unknown => serde_json::from_slice(&raw)
                .map(Self::Unknown)
                .map_err(|e| DecodeError::Classify(ClassifyError::InvalidJson(e))),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            Self::Traffic(_) => EventKind::Traffic,
            Self::Audit(_) => EventKind::Audit,
            Self::Unknown(_) => EventKind::Unknown,
        }
    }
}
