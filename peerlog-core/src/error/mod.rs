//! Error handling for peerlog.
//!
//! Every error in this module is scoped to a single event or a single
//! directory round-trip. None of them is fatal to the running process:
//!
//! | Error | Raised by | Consequence |
//! |-------|-----------|-------------|
//! | [`DirectoryError`] | directory client | cache keeps its stale snapshot |
//! | [`LookupError`] | identity cache | enrichment degrades to empty/raw fields |
//! | [`ClassifyError`] | classifier | event rejected to the producer |
//! | [`DecodeError`] | decoders | event logged and dropped |
//! | [`SkipSignal`] | enricher | event logged (warn) and dropped |
//! | [`SinkError`] | sink worker | delivery failure logged and swallowed |

use thiserror::Error;

use crate::identity::IdentityKind;

/// Failure talking to the identity directory.
///
/// Mirrors the upstream error classification used for every outbound HTTP
/// call: timeouts, connection failures and non-2xx responses are kept apart
/// so logs and metrics can tell them apart.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The request exceeded the configured timeout.
    #[error("directory request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// TCP/TLS connection could not be established.
    #[error("failed to connect to directory at {url}: {reason}")]
    Connection { url: String, reason: String },

    /// The directory answered with a non-2xx status.
    #[error("directory returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// The body could not be decoded as a JSON array of records.
    #[error("failed to decode directory response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// The body exceeded the configured size limit.
    #[error("directory response from {url} exceeds {limit} bytes")]
    BodyTooLarge { url: String, limit: usize },

    /// Any other transport failure.
    #[error("directory request to {url} failed: {reason}")]
    Transport { url: String, reason: String },

    /// The client could not be constructed from its configuration.
    #[error("invalid directory client configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl DirectoryError {
    /// Machine-readable error type name for metrics labels.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Connection { .. } => "connection",
            Self::Status { .. } => "status",
            Self::Decode { .. } => "decode",
            Self::BodyTooLarge { .. } => "body_too_large",
            Self::Transport { .. } => "transport",
            Self::InvalidConfig { .. } => "invalid_config",
        }
    }
}

/// Outcome of a cache lookup that did not produce a record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The ID is absent even from a freshly fetched snapshot.
    #[error("{kind} '{id}' not found after refresh")]
    NotFound { kind: IdentityKind, id: String },

    /// The refresh triggered by the miss failed; the stale snapshot is kept.
    #[error("{kind} directory unavailable: {source}")]
    UpstreamUnavailable {
        kind: IdentityKind,
        #[source]
        source: DirectoryError,
    },
}

impl LookupError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// The payload could not be classified at all.
#[derive(Debug, Error)]
pub enum ClassifyError {
    /// Not valid JSON.
    #[error("payload is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    /// Valid JSON, but the top level is not an object.
    #[error("payload is not a JSON object (found {found})")]
    NotAnObject { found: &'static str },
}

/// The payload was classified but could not be decoded into its shape.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    /// Traffic payload did not match the traffic event shape.
    #[error("invalid traffic payload: {0}")]
    Traffic(#[source] serde_json::Error),

    /// Audit payload did not match the audit envelope shape.
    #[error("invalid audit payload: {reason}")]
    Audit { reason: String },
}

impl DecodeError {
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Classify(_) => "invalid_json",
            Self::Traffic(_) => "invalid_traffic",
            Self::Audit { .. } => "invalid_audit",
        }
    }
}

/// An event the enricher refuses to turn into a record.
///
/// Identity misses never produce a `SkipSignal`; only input that is
/// malformed beyond repair does.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SkipSignal {
    /// An `ip:port` field is missing its port or the port is not numeric.
    #[error("malformed {field} address '{value}'")]
    MalformedAddress { field: &'static str, value: String },

    /// The event has no known shape, so there is nothing to enrich.
    #[error("unrecognized event shape")]
    UnrecognizedEvent,
}

impl SkipSignal {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedAddress { .. } => "malformed_address",
            Self::UnrecognizedEvent => "unrecognized_event",
        }
    }
}

/// Delivery to the downstream log collector failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("log sink unavailable: {reason}")]
    SinkUnavailable { reason: String },

    /// The delivery queue was full and the record was dropped.
    #[error("log sink queue full, record dropped")]
    QueueFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_error_display() {
        let err = LookupError::NotFound {
            kind: IdentityKind::Peer,
            id: "p-1".to_string(),
        };
        assert_eq!(err.to_string(), "peer 'p-1' not found after refresh");
        assert!(err.is_not_found());

        let err = LookupError::UpstreamUnavailable {
            kind: IdentityKind::User,
            source: DirectoryError::Status {
                url: "http://dir/api/users".to_string(),
                status: 503,
            },
        };
        assert!(!err.is_not_found());
        assert!(err.to_string().contains("user directory unavailable"));
    }

    #[test]
    fn test_directory_error_types_are_distinct() {
        let url = "http://dir".to_string();
        let errors = [
            DirectoryError::Timeout {
                url: url.clone(),
                timeout_secs: 10,
            },
            DirectoryError::Connection {
                url: url.clone(),
                reason: "refused".to_string(),
            },
            DirectoryError::Status {
                url: url.clone(),
                status: 500,
            },
            DirectoryError::Decode {
                url: url.clone(),
                reason: "eof".to_string(),
            },
            DirectoryError::BodyTooLarge {
                url: url.clone(),
                limit: 1,
            },
            DirectoryError::Transport {
                url,
                reason: "reset".to_string(),
            },
        ];
        let mut types: Vec<_> = errors.iter().map(DirectoryError::error_type).collect();
        types.sort_unstable();
        types.dedup();
        assert_eq!(types.len(), errors.len());
    }

    #[test]
    fn test_skip_signal_reason() {
        let skip = SkipSignal::MalformedAddress {
            field: "source",
            value: "10.0.0.1".to_string(),
        };
        assert_eq!(skip.reason(), "malformed_address");
        assert_eq!(skip.to_string(), "malformed source address '10.0.0.1'");
    }
}
