//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    // ─────────────────────────────────────────────────────────────────────────
    // Secret resolution errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Neither an inline value nor a file was given, or the value is blank.
    #[error("missing secret '{field}': set it inline or via '{field}_file'")]
    MissingSecret { field: String },

    /// Both an inline value and a file were given.
    #[error("secret '{field}' is set both inline and via '{field}_file'")]
    AmbiguousSecret { field: String },

    /// The secret file could not be read.
    #[error("cannot read secret '{field}' from {path}: {source}")]
    SecretFileUnreadable {
        field: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // Value validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid URL format.
    #[error("invalid URL '{url}' for '{field}': {message}")]
    InvalidUrl {
        field: String,
        url: String,
        message: String,
    },

    /// A value is out of its accepted range.
    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// The discriminator matcher can never match anything.
    #[error("invalid discriminator: {reason}")]
    InvalidDiscriminator { reason: String },

    /// Required environment variable not set.
    #[error("environment variable '{var}' not set (required for field '{field}')")]
    MissingEnvVar { var: String, field: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Schema validation errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Schema version not supported.
    #[error("unsupported schema version {version}, expected 1")]
    UnsupportedSchemaVersion { version: u32 },

    // ─────────────────────────────────────────────────────────────────────────
    // I/O and parsing errors
    // ─────────────────────────────────────────────────────────────────────────
    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    ParseError(#[from] serde_saphyr::Error),

    /// I/O error reading config file.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Config file not found at any search location.
    #[error("configuration file not found (searched: {searched:?})")]
    ConfigFileNotFound { searched: Vec<PathBuf> },

    /// Empty configuration file.
    #[error("configuration file is empty")]
    EmptyConfigFile,
}

/// Validation warnings (non-fatal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationWarning {
    /// No exclusion networks: overlay-to-overlay traffic will be forwarded.
    NoExclusionNetworks,

    /// A source IP override value is not an IP address.
    InvalidOverrideIp { hostname: String, value: String },

    /// No sink section; records are only written to the local log.
    NoSinkConfigured,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoExclusionNetworks => {
                write!(f, "policy.exclusion_networks is empty; no destination is excluded")
            }
            Self::InvalidOverrideIp { hostname, value } => {
                write!(
                    f,
                    "source IP override for '{hostname}' is not an IP address: '{value}'"
                )
            }
            Self::NoSinkConfigured => {
                write!(f, "no sink configured; records are logged locally only")
            }
        }
    }
}

/// Result of configuration validation.
#[derive(Debug)]
pub struct ValidationResult {
    /// Non-fatal warnings encountered during validation.
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(warnings: Vec<ValidationWarning>) -> Self {
        Self { warnings }
    }

    /// Check if validation passed with no warnings.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingSecret {
            field: "sink.token".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "missing secret 'sink.token': set it inline or via 'sink.token_file'"
        );
    }

    #[test]
    fn test_validation_warning_display() {
        let warn = ValidationWarning::InvalidOverrideIp {
            hostname: "exit-1".to_string(),
            value: "nope".to_string(),
        };
        assert_eq!(
            warn.to_string(),
            "source IP override for 'exit-1' is not an IP address: 'nope'"
        );
    }

    #[test]
    fn test_validation_result() {
        assert!(ValidationResult::ok().is_clean());
        let result = ValidationResult::with_warnings(vec![ValidationWarning::NoSinkConfigured]);
        assert!(!result.is_clean());
    }
}
