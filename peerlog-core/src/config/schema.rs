//! Configuration schema types.
//!
//! ```yaml
//! schema: 1
//! directory:
//!   base_url: https://api.netbird.io
//!   token_file: /run/secrets/netbird-token
//! policy:
//!   exclusion_networks: ["100.64.0.0/10"]
//!   discriminator: { mode: prefix, prefix: TYPE_ }
//! sink:
//!   url: https://splunk.example:8088
//!   token: ${HEC_TOKEN}
//! server:
//!   auth_token_file: /run/secrets/webhook-token
//! translations:
//!   source_ip_overrides:
//!     exit-oslo-1: 192.0.2.10
//! protocols:
//!   132: SCTP
//! ```

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use super::defaults::PeerlogDefaults;
use super::error::ConfigError;
use crate::enrich::Translations;
use crate::identity::DirectoryConfig;
use crate::policy::PolicyConfig;
use crate::sink::{HecConfig, StreamTarget};

fn default_schema() -> u32 {
    1
}

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Schema version. Only `1` is supported.
    #[serde(default = "default_schema")]
    pub schema: u32,

    /// Identity directory connection.
    pub directory: DirectorySection,

    /// Forwarding policy and event classification.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Log collector. Records are only logged locally when absent.
    #[serde(default)]
    pub sink: Option<SinkSection>,

    /// Webhook and admin listeners.
    #[serde(default)]
    pub server: ServerSection,

    /// Static lookup tables applied during enrichment.
    #[serde(default)]
    pub translations: Translations,

    /// Protocol number → name entries added to or replacing the built-in table.
    #[serde(default)]
    pub protocols: BTreeMap<u32, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn default_auth_scheme() -> String {
    "Token".to_string()
}

/// Identity directory connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectorySection {
    /// Base URL; `/api/users` and `/api/peers` are appended.
    pub base_url: String,

    /// API token, inline or via `${VAR}`.
    #[serde(default)]
    pub token: Option<String>,

    /// File containing the API token.
    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// Scheme placed before the token in `Authorization`.
    #[serde(default = "default_auth_scheme")]
    pub auth_scheme: String,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,

    #[serde(default)]
    pub max_response_bytes: Option<usize>,
}

impl DirectorySection {
    /// Resolve the API token from `token` or `token_file`.
    pub fn token(&self) -> Result<String, ConfigError> {
        resolve_secret(
            "directory.token",
            self.token.as_deref(),
            self.token_file.as_deref(),
        )
    }

    /// Build the directory client configuration.
    pub fn client_config(&self, defaults: &PeerlogDefaults) -> Result<DirectoryConfig, ConfigError> {
        Ok(DirectoryConfig {
            base_url: self.base_url.clone(),
            token: self.token()?,
            auth_scheme: self.auth_scheme.clone(),
            timeout: self
                .timeout_secs
                .map_or(defaults.directory_timeout, Duration::from_secs),
            connect_timeout: self
                .connect_timeout_secs
                .map_or(defaults.directory_connect_timeout, Duration::from_secs),
            max_response_size: self
                .max_response_bytes
                .unwrap_or(defaults.directory_max_response_bytes),
            ..DirectoryConfig::default()
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// HTTP Event Collector settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkSection {
    /// Collector base URL; `/services/collector/event` is appended.
    pub url: String,

    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub token_file: Option<PathBuf>,

    /// `host` field on every event.
    #[serde(default)]
    pub host: Option<String>,

    /// `source` field on every event.
    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub traffic: Option<StreamTarget>,

    #[serde(default)]
    pub audit: Option<StreamTarget>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

impl SinkSection {
    pub fn token(&self) -> Result<String, ConfigError> {
        resolve_secret("sink.token", self.token.as_deref(), self.token_file.as_deref())
    }

    /// Build the collector sink configuration.
    pub fn hec_config(&self, defaults: &PeerlogDefaults) -> Result<HecConfig, ConfigError> {
        let base = HecConfig::default();
        Ok(HecConfig {
            url: self.url.clone(),
            token: self.token()?,
            host: self.host.clone().unwrap_or(base.host),
            source: self.source.clone().unwrap_or(base.source),
            traffic: self.traffic.clone().unwrap_or(base.traffic),
            audit: self.audit.clone().unwrap_or(base.audit),
            timeout: self
                .timeout_secs
                .map_or(defaults.sink_timeout, Duration::from_secs),
            queue_capacity: self
                .queue_capacity
                .unwrap_or(defaults.sink_queue_capacity),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Listener settings. Ports fall back to `PEERLOG_WEBHOOK_PORT` /
/// `PEERLOG_ADMIN_PORT`, then to 8080 / 8081.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// Bind address for both listeners (default `0.0.0.0`).
    #[serde(default)]
    pub bind: Option<IpAddr>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub admin_port: Option<u16>,

    /// Token webhook callers must present.
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub auth_token_file: Option<PathBuf>,

    /// Maximum accepted webhook body.
    #[serde(default)]
    pub max_body_bytes: Option<usize>,
}

impl ServerSection {
    pub fn auth_token(&self) -> Result<String, ConfigError> {
        resolve_secret(
            "server.auth_token",
            self.auth_token.as_deref(),
            self.auth_token_file.as_deref(),
        )
    }
}

/// Resolve a secret given inline or as a file path.
///
/// File contents are trimmed. Exactly one of the two must be set and the
/// result must not be empty.
pub fn resolve_secret(
    field: &str,
    inline: Option<&str>,
    file: Option<&Path>,
) -> Result<String, ConfigError> {
    let secret = match (inline, file) {
        (Some(_), Some(_)) => {
            return Err(ConfigError::AmbiguousSecret {
                field: field.to_string(),
            });
        }
        (Some(value), None) => value.trim().to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .map_err(|source| ConfigError::SecretFileUnreadable {
                field: field.to_string(),
                path: path.to_path_buf(),
                source,
            })?
            .trim()
            .to_string(),
        (None, None) => String::new(),
    };

    if secret.is_empty() {
        return Err(ConfigError::MissingSecret {
            field: field.to_string(),
        });
    }
    Ok(secret)
}
