//! Centralized default values, overridable from the environment.

use std::time::Duration;
use tracing::warn;

/// Defaults used when the configuration file leaves a value unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerlogDefaults {
    /// Directory request timeout.
    pub directory_timeout: Duration,

    /// Directory TCP + TLS connect timeout. Must not exceed `directory_timeout`.
    pub directory_connect_timeout: Duration,

    pub directory_max_response_bytes: usize,

    /// Per-request timeout for the collector.
    pub sink_timeout: Duration,

    /// Records buffered for the collector before new ones are dropped.
    pub sink_queue_capacity: usize,

    /// Maximum webhook body size.
    pub max_body_bytes: usize,

    /// Maximum time for graceful shutdown.
    pub shutdown_timeout: Duration,

    /// Time allowed for in-flight requests and the sink queue to drain.
    /// Must be less than `shutdown_timeout`.
    pub drain_timeout: Duration,
}

impl Default for PeerlogDefaults {
    fn default() -> Self {
        Self {
            directory_timeout: Duration::from_secs(10),
            directory_connect_timeout: Duration::from_secs(5),
            directory_max_response_bytes: 16 * 1024 * 1024, // 16 MB
            sink_timeout: Duration::from_secs(5),
            sink_queue_capacity: 1024,
            max_body_bytes: 1024 * 1024, // 1 MiB
            shutdown_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(25),
        }
    }
}

impl PeerlogDefaults {
    /// Create defaults from environment variables.
    ///
    /// # Environment Variables
    /// - `PEERLOG_DIRECTORY_TIMEOUT_SECS`
    /// - `PEERLOG_DIRECTORY_CONNECT_TIMEOUT_SECS`
    /// - `PEERLOG_SINK_TIMEOUT_SECS`
    /// - `PEERLOG_SINK_QUEUE_CAPACITY`
    /// - `PEERLOG_MAX_BODY_BYTES`
    /// - `PEERLOG_SHUTDOWN_TIMEOUT_SECS`
    /// - `PEERLOG_DRAIN_TIMEOUT_SECS`
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            directory_timeout: Duration::from_secs(parse_env_warn(
                "PEERLOG_DIRECTORY_TIMEOUT_SECS",
                default.directory_timeout.as_secs(),
            )),

            directory_connect_timeout: Duration::from_secs(parse_env_warn(
                "PEERLOG_DIRECTORY_CONNECT_TIMEOUT_SECS",
                default.directory_connect_timeout.as_secs(),
            )),

            // Rarely tuned; the collection size bounds it.
            directory_max_response_bytes: default.directory_max_response_bytes,

            sink_timeout: Duration::from_secs(parse_env_warn(
                "PEERLOG_SINK_TIMEOUT_SECS",
                default.sink_timeout.as_secs(),
            )),

            sink_queue_capacity: parse_env_warn(
                "PEERLOG_SINK_QUEUE_CAPACITY",
                default.sink_queue_capacity,
            ),

            max_body_bytes: parse_env_warn("PEERLOG_MAX_BODY_BYTES", default.max_body_bytes),

            shutdown_timeout: Duration::from_secs(parse_env_warn(
                "PEERLOG_SHUTDOWN_TIMEOUT_SECS",
                default.shutdown_timeout.as_secs(),
            )),

            drain_timeout: Duration::from_secs(parse_env_warn(
                "PEERLOG_DRAIN_TIMEOUT_SECS",
                default.drain_timeout.as_secs(),
            )),
        }
    }

    /// Validate the defaults satisfy invariants.
    ///
    /// # Invariants
    /// 1. `drain_timeout` < `shutdown_timeout`
    /// 2. `directory_connect_timeout` <= `directory_timeout`
    /// 3. `sink_queue_capacity` > 0 and `max_body_bytes` > 0
    pub fn validate(&self) -> Result<(), String> {
        if self.drain_timeout >= self.shutdown_timeout {
            return Err(format!(
                "drain_timeout ({:?}) must be less than shutdown_timeout ({:?})",
                self.drain_timeout, self.shutdown_timeout
            ));
        }

        if self.directory_connect_timeout > self.directory_timeout {
            return Err(format!(
                "directory_connect_timeout ({:?}) must be <= directory_timeout ({:?})",
                self.directory_connect_timeout, self.directory_timeout
            ));
        }

        if self.sink_queue_capacity == 0 {
            return Err("sink_queue_capacity must be > 0".to_string());
        }
        if self.max_body_bytes == 0 {
            return Err("max_body_bytes must be > 0".to_string());
        }

        Ok(())
    }
}

/// Parse an environment variable with a warning on invalid values.
fn parse_env_warn<T: std::str::FromStr + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(val) => match val.parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    env_var = name,
                    value = %val,
                    default = %default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Restores environment variables on drop.
    struct EnvVarGuard {
        vars: Vec<(&'static str, Option<String>)>,
    }

    impl EnvVarGuard {
        fn new(var_names: &[&'static str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (*name, std::env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            for (name, original) in &self.vars {
                // SAFETY: We're in a single-threaded test context (enforced by #[serial])
                unsafe {
                    match original {
                        Some(val) => std::env::set_var(name, val),
                        None => std::env::remove_var(name),
                    }
                }
            }
        }
    }

    #[test]
    fn test_defaults() {
        let defaults = PeerlogDefaults::default();

        assert_eq!(defaults.directory_timeout, Duration::from_secs(10));
        assert_eq!(defaults.directory_connect_timeout, Duration::from_secs(5));
        assert_eq!(defaults.sink_timeout, Duration::from_secs(5));
        assert_eq!(defaults.sink_queue_capacity, 1024);
        assert_eq!(defaults.max_body_bytes, 1024 * 1024);
        assert_eq!(defaults.drain_timeout, Duration::from_secs(25));
        assert!(defaults.validate().is_ok());
    }

    #[test]
    fn test_defaults_validate_drain_timeout() {
        let defaults = PeerlogDefaults {
            drain_timeout: Duration::from_secs(35),
            ..Default::default()
        };
        assert!(defaults.validate().is_err());
    }

    #[test]
    fn test_defaults_validate_connect_timeout() {
        let defaults = PeerlogDefaults {
            directory_connect_timeout: Duration::from_secs(60),
            ..Default::default()
        };
        assert!(defaults.validate().is_err());
    }

    #[test]
    fn test_defaults_validate_zero_queue() {
        let defaults = PeerlogDefaults {
            sink_queue_capacity: 0,
            ..Default::default()
        };
        assert!(defaults.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_from_env_overrides_and_invalid_values() {
        let _guard = EnvVarGuard::new(&["PEERLOG_SINK_QUEUE_CAPACITY", "PEERLOG_SINK_TIMEOUT_SECS"]);
        // SAFETY: We're in a single-threaded test context (enforced by #[serial])
        unsafe {
            std::env::set_var("PEERLOG_SINK_QUEUE_CAPACITY", "64");
            std::env::set_var("PEERLOG_SINK_TIMEOUT_SECS", "soon");
        }

        let defaults = PeerlogDefaults::from_env();
        assert_eq!(defaults.sink_queue_capacity, 64);
        assert_eq!(defaults.sink_timeout, Duration::from_secs(5));
    }
}
