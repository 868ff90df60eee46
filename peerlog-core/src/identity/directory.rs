//! Identity directory client with connection pooling.
//!
//! Fetches full snapshots of a collection (`/api/users`, `/api/peers`) from
//! the upstream directory. There is no incremental fetch: every call returns
//! the complete array, so a refresh bounds staleness at the cost of scaling
//! with directory size.
//!
//! # Error Classification
//!
//! Failures are mapped to [`DirectoryError`] variants:
//! - Timeout → `Timeout`
//! - Connection refused / DNS / TLS → `Connection`
//! - Non-2xx status → `Status`
//! - Undecodable body → `Decode`
//!
//! # Security
//!
//! - TLS certificate verification is enabled (rustls)
//! - No automatic retry; the identity cache decides when to try again

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, error, warn};

use super::{Identity, IdentityKind};
use crate::error::DirectoryError;
use crate::telemetry::PeerlogMetrics;

/// Configuration for the directory client.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Base URL of the directory API (e.g., "https://api.netbird.io")
    pub base_url: String,
    /// API token sent in the `Authorization` header
    pub token: String,
    /// Authorization scheme placed before the token ("Token" or "Bearer")
    pub auth_scheme: String,
    /// Request timeout (includes connection + response)
    pub timeout: Duration,
    /// Connection timeout (TCP + TLS handshake)
    pub connect_timeout: Duration,
    /// Maximum idle connections per host
    pub pool_max_idle_per_host: usize,
    /// Maximum response body size in bytes.
    pub max_response_size: usize,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: String::new(),
            auth_scheme: "Token".to_string(),
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 4,
            max_response_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl DirectoryConfig {
    /// Create a new config with the specified base URL and token.
    ///
    /// Uses default values for all other settings.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            ..Default::default()
        }
    }
}

/// Source of full identity snapshots.
///
/// The identity cache only depends on this trait, so tests can substitute
/// in-memory fakes without an HTTP server.
#[async_trait]
pub trait IdentitySource<T: Identity>: Send + Sync {
    /// Fetch the complete collection.
    async fn fetch_all(&self) -> Result<Vec<T>, DirectoryError>;
}

/// HTTP client for the identity directory.
///
/// The client is `Clone` and can be shared by both identity caches; the
/// underlying reqwest client pools connections internally.
#[derive(Clone)]
pub struct DirectoryClient {
    client: Client,
    config: DirectoryConfig,
    /// Pre-computed `Authorization` header value.
    authorization: String,
    metrics: Option<Arc<PeerlogMetrics>>,
}

impl std::fmt::Debug for DirectoryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryClient")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .finish_non_exhaustive()
    }
}

impl DirectoryClient {
    /// Create a new directory client.
    ///
    /// # Errors
    ///
    /// Returns `DirectoryError::InvalidConfig` if:
    /// - The base_url is empty or not a valid absolute URL
    /// - The HTTP client cannot be built
    pub fn new(config: DirectoryConfig) -> Result<Self, DirectoryError> {
        if config.base_url.is_empty() {
            return Err(DirectoryError::InvalidConfig {
                reason: "base_url is empty".to_string(),
            });
        }

        if let Err(e) = reqwest::Url::parse(&config.base_url) {
            return Err(DirectoryError::InvalidConfig {
                reason: format!("invalid base_url '{}': {}", config.base_url, e),
            });
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| DirectoryError::InvalidConfig {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let authorization = format!("{} {}", config.auth_scheme, config.token);

        Ok(Self {
            client,
            config,
            authorization,
            metrics: None,
        })
    }

    /// Record directory request counts and latencies.
    pub fn with_metrics(mut self, metrics: Arc<PeerlogMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn collection_url(&self, kind: IdentityKind) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            kind.collection_path()
        )
    }

    /// Fetch one full collection from the directory.
    #[tracing::instrument(skip(self))]
    pub async fn fetch_collection<T: Identity>(&self) -> Result<Vec<T>, DirectoryError> {
        let url = self.collection_url(T::KIND);
        let started = Instant::now();

        debug!(kind = %T::KIND, url = %url, "Fetching identity snapshot");

        let result = self.fetch_collection_inner::<T>(&url).await;

        if let Some(ref metrics) = self.metrics {
            let outcome = match &result {
                Ok(_) => "success",
                Err(e) => e.error_type(),
            };
            metrics.record_directory_request(
                T::KIND.as_str(),
                outcome,
                started.elapsed().as_secs_f64() * 1000.0,
            );
        }

        result
    }

    async fn fetch_collection_inner<T: Identity>(
        &self,
        url: &str,
    ) -> Result<Vec<T>, DirectoryError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .send()
            .await
            .map_err(|e| self.classify_error(e, url))?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Directory returned error status");
            return Err(DirectoryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = self.read_body_limited(response, url).await?;
        let records: Vec<T> = serde_json::from_slice(&body).map_err(|e| {
            error!(url = %url, error = %e, body_size = body.len(), "Failed to decode directory response");
            DirectoryError::Decode {
                url: url.to_string(),
                reason: e.to_string(),
            }
        })?;

        debug!(url = %url, records = records.len(), "Received identity snapshot");
        Ok(records)
    }

    /// Read the response body with a size limit.
    ///
    /// Checks `Content-Length` first for early rejection, then streams the
    /// body chunk-by-chunk so chunked responses cannot grow without bound.
    async fn read_body_limited(
        &self,
        mut response: reqwest::Response,
        url: &str,
    ) -> Result<bytes::Bytes, DirectoryError> {
        let max_size = self.config.max_response_size;
        let too_large = || DirectoryError::BodyTooLarge {
            url: url.to_string(),
            limit: max_size,
        };

        if let Some(content_length) = response.content_length() {
            if content_length as usize > max_size {
                warn!(url = %url, content_length, max_response_size = max_size, "Directory response exceeds size limit");
                return Err(too_large());
            }
        }

        let mut buf = Vec::with_capacity(
            response
                .content_length()
                .map(|cl| cl as usize)
                .unwrap_or(8192)
                .min(max_size),
        );

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| self.classify_error(e, url))?
        {
            if buf.len() + chunk.len() > max_size {
                warn!(url = %url, accumulated = buf.len(), max_response_size = max_size, "Directory response exceeds size limit during streaming");
                return Err(too_large());
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf.into())
    }

    /// Classify a reqwest error into a [`DirectoryError`].
    fn classify_error(&self, error: reqwest::Error, url: &str) -> DirectoryError {
        if error.is_timeout() {
            warn!(url = %url, timeout_secs = self.config.timeout.as_secs(), "Directory request timed out");
            DirectoryError::Timeout {
                url: url.to_string(),
                timeout_secs: self.config.timeout.as_secs(),
            }
        } else if error.is_connect() {
            warn!(url = %url, error = %error, "Failed to connect to directory");
            DirectoryError::Connection {
                url: url.to_string(),
                reason: error.to_string(),
            }
        } else {
            error!(url = %url, error = %error, "Directory request failed");
            DirectoryError::Transport {
                url: url.to_string(),
                reason: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl<T: Identity> IdentitySource<T> for DirectoryClient {
    async fn fetch_all(&self) -> Result<Vec<T>, DirectoryError> {
        self.fetch_collection::<T>().await
    }
}
