//! Audit (activity) events and the flexible envelope decoder.
//!
//! Audit payloads vary by activity type: the platform attaches whatever
//! details it has under `meta`, and sometimes at the top level. The decoder
//! pulls out a small fixed set of fields and collects everything else into
//! [`AuditEnvelope::extra`] without losing a single input field.
//!
//! # Collision handling
//!
//! Fields land in `extra` in a fixed order: the keys of a nested `meta`
//! object first, then the remaining top-level keys. Each insertion checks the
//! reserved fixed-field names and the keys already in `extra`:
//!
//! | Source | Free key | Taken or reserved | Also taken |
//! |--------|----------|-------------------|------------|
//! | `meta` | `k` | `meta_k` | `meta_k_2`, `meta_k_3`, … |
//! | top level | `k` | `extra_k` | `extra_k_2`, `extra_k_3`, … |

use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::fields::{RawFields, loose_eq, raw_to_string};
use crate::error::DecodeError;

/// Fixed-field names, lowercase with underscores removed.
const RESERVED: &[&str] = &["id", "timestamp", "message", "initiatorid", "targetid"];

/// A decoded audit event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEnvelope {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub initiator_id: String,
    pub target_id: String,
    /// Every input field outside the fixed set.
    pub extra: Map<String, Value>,
    /// The payload exactly as received.
    #[serde(skip)]
    pub raw: Bytes,
}

impl AuditEnvelope {
    /// Decode an audit payload.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::Classify`] if `raw` is not a JSON object.
    /// - [`DecodeError::Audit`] if a nested value is not valid JSON.
    pub fn decode(raw: impl Into<Bytes>) -> Result<Self, DecodeError> {
        let raw = raw.into();
        let fields = RawFields::parse(&raw)?;
        Self::from_fields(fields, raw)
    }

    pub(crate) fn from_fields(fields: RawFields, raw: Bytes) -> Result<Self, DecodeError> {
        let mut id = None;
        let mut timestamp = None;
        let mut message = None;
        let mut initiator_id = None;
        let mut target_id = None;
        let mut meta_fields = Vec::new();
        let mut meta_seen = false;
        let mut top_fields = Vec::new();

        for (key, value) in fields.into_inner() {
            // First occurrence of a fixed field wins; later duplicates fall
            // through to `extra`.
            let slot = if loose_eq(&key, "id") {
                &mut id
            } else if loose_eq(&key, "timestamp") {
                &mut timestamp
            } else if loose_eq(&key, "message") {
                &mut message
            } else if loose_eq(&key, "initiatorid") {
                &mut initiator_id
            } else if loose_eq(&key, "targetid") {
                &mut target_id
            } else {
                if !meta_seen && key.eq_ignore_ascii_case("meta") {
                    if let Ok(Value::Object(map)) = parse_value(&key, &value) {
                        meta_seen = true;
                        meta_fields.extend(map);
                        continue;
                    }
                }
                top_fields.push((key, value));
                continue;
            };

            if slot.is_none() {
                *slot = Some(value);
            } else {
                top_fields.push((key, value));
            }
        }

        let top_values = top_fields
            .into_iter()
            .map(|(key, value)| parse_value(&key, &value).map(|v| (key, v)))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: id.as_deref().map(raw_to_string).unwrap_or_default(),
            timestamp: timestamp
                .as_deref()
                .and_then(parse_timestamp)
                .unwrap_or_else(|| {
                    debug!("Audit event has no usable timestamp, using current time");
                    Utc::now()
                }),
            message: message.as_deref().map(raw_to_string).unwrap_or_default(),
            initiator_id: initiator_id.as_deref().map(raw_to_string).unwrap_or_default(),
            target_id: target_id.as_deref().map(raw_to_string).unwrap_or_default(),
            extra: merge_extra(meta_fields, top_values),
            raw,
        })
    }
}

fn parse_value(key: &str, raw: &serde_json::value::RawValue) -> Result<Value, DecodeError> {
    serde_json::from_str(raw.get()).map_err(|e| DecodeError::Audit {
        reason: format!("field '{key}': {e}"),
    })
}

/// Merge `meta` fields, then top-level fields, into one collision-free map.
///
/// Deterministic: the same inputs always produce the same map.
pub fn merge_extra(
    meta_fields: impl IntoIterator<Item = (String, Value)>,
    top_fields: impl IntoIterator<Item = (String, Value)>,
) -> Map<String, Value> {
    let mut extra = Map::new();
    for (key, value) in meta_fields {
        insert_unique(&mut extra, "meta", key, value);
    }
    for (key, value) in top_fields {
        insert_unique(&mut extra, "extra", key, value);
    }
    extra
}

fn insert_unique(extra: &mut Map<String, Value>, prefix: &str, key: String, value: Value) {
    let is_reserved = RESERVED.iter().any(|r| loose_eq(&key, r));
    if !is_reserved && !extra.contains_key(&key) {
        extra.insert(key, value);
        return;
    }

    let base = format!("{prefix}_{key}");
    let mut candidate = base.clone();
    let mut n = 2u32;
    while extra.contains_key(&candidate) {
        candidate = format!("{base}_{n}");
        n += 1;
    }
    extra.insert(candidate, value);
}

/// Parse a timestamp value.
///
/// Accepts RFC 3339 (any sub-second precision), zone-less
/// `YYYY-MM-DDTHH:MM:SS[.f]` or `YYYY-MM-DD HH:MM:SS[.f]` taken as UTC, and
/// numeric unix seconds.
fn parse_timestamp(raw: &serde_json::value::RawValue) -> Option<DateTime<Utc>> {
    match serde_json::from_str::<Value>(raw.get()).ok()? {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        Value::Number(n) => {
            let secs = n.as_f64()?;
            let mut whole = secs.floor() as i64;
            let mut nanos = ((secs - secs.floor()) * 1e9).round() as u32;
            if nanos >= 1_000_000_000 {
                whole += 1;
                nanos = 0;
            }
            DateTime::from_timestamp(whole, nanos)
        }
        _ => None,
    }
}
