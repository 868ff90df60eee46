//! Configuration loading and validation.

use regex::Regex;
use reqwest::Url;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use super::error::{ConfigError, ValidationResult, ValidationWarning};
use super::schema::Config;
use crate::event::DiscriminatorMatch;

/// Configuration file search paths (in priority order).
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var("PEERLOG_CONFIG") {
        paths.push(PathBuf::from(path));
    }

    // Priority 3: System default
    paths.push(PathBuf::from("/etc/peerlog/config.yaml"));

    // Priority 4: Local default
    paths.push(PathBuf::from("./config.yaml"));

    paths
}

/// Find the first existing config file from the search paths.
pub fn find_config_file(explicit_path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    // Priority 1: Explicit path (CLI flag)
    if let Some(path) = explicit_path {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(ConfigError::ConfigFileNotFound {
            searched: vec![path.to_path_buf()],
        });
    }

    let paths = default_config_paths();
    for path in &paths {
        if path.exists() {
            return Ok(path.clone());
        }
    }

    Err(ConfigError::ConfigFileNotFound { searched: paths })
}

/// Load configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse configuration text, substituting `${VAR}` references first.
pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
    if contents.trim().is_empty() {
        return Err(ConfigError::EmptyConfigFile);
    }

    let contents = substitute_env_vars(contents)?;
    let config: Config = serde_saphyr::from_str(&contents)?;
    Ok(config)
}

/// Load and validate configuration.
pub fn load_and_validate(path: &Path) -> Result<(Config, ValidationResult), ConfigError> {
    let config = load_config(path)?;
    let result = validate(&config)?;
    Ok((config, result))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment Variable Substitution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

// SAFETY: .expect() on LazyLock with a compile-time literal regex pattern.
// The pattern is known-valid and tested by test_env_var_pattern_compiles().
static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
        .expect("BUG: ENV_VAR_PATTERN regex is invalid")
});

/// Substitute environment variables in a string.
///
/// # Syntax
/// - `${VAR}` - Required, fail if not set
/// - `${VAR:-default}` - Optional with default
///
/// Substituted values are not scanned again.
pub fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
    let mut missing: Option<String> = None;

    let result = ENV_VAR_PATTERN.replace_all(content, |cap: &regex::Captures<'_>| {
        let var_name = &cap[1];
        match std::env::var(var_name) {
            Ok(value) => value,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    missing.get_or_insert_with(|| var_name.to_string());
                    String::new()
                }
            },
        }
    });

    if let Some(var) = missing {
        return Err(ConfigError::MissingEnvVar {
            var,
            field: "configuration".to_string(),
        });
    }

    Ok(result.into_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a configuration.
///
/// Secrets are resolved here as well, so a missing token file fails at
/// startup rather than on first use.
pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
    let mut warnings = Vec::new();

    if config.schema != 1 {
        return Err(ConfigError::UnsupportedSchemaVersion {
            version: config.schema,
        });
    }

    // Directory
    check_url("directory.base_url", &config.directory.base_url)?;
    config.directory.token()?;
    if config.directory.auth_scheme.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "directory.auth_scheme".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    check_nonzero("directory.timeout_secs", config.directory.timeout_secs)?;
    check_nonzero(
        "directory.connect_timeout_secs",
        config.directory.connect_timeout_secs,
    )?;
    check_nonzero(
        "directory.max_response_bytes",
        config.directory.max_response_bytes.map(|v| v as u64),
    )?;

    // Policy
    match &config.policy.discriminator {
        DiscriminatorMatch::Prefix { prefix } if prefix.trim().is_empty() => {
            return Err(ConfigError::InvalidDiscriminator {
                reason: "prefix must not be empty".to_string(),
            });
        }
        DiscriminatorMatch::Exact { values } if values.iter().all(|v| v.trim().is_empty()) => {
            return Err(ConfigError::InvalidDiscriminator {
                reason: "exact mode needs at least one value".to_string(),
            });
        }
        _ => {}
    }
    if config.policy.exclusion_networks.is_empty() {
        warnings.push(ValidationWarning::NoExclusionNetworks);
    }

    // Sink
    match &config.sink {
        Some(sink) => {
            check_url("sink.url", &sink.url)?;
            sink.token()?;
            check_nonzero("sink.timeout_secs", sink.timeout_secs)?;
            check_nonzero("sink.queue_capacity", sink.queue_capacity.map(|v| v as u64))?;
        }
        None => warnings.push(ValidationWarning::NoSinkConfigured),
    }

    // Server
    config.server.auth_token()?;
    check_nonzero(
        "server.max_body_bytes",
        config.server.max_body_bytes.map(|v| v as u64),
    )?;
    if let (Some(port), Some(admin)) = (config.server.port, config.server.admin_port) {
        if port == admin {
            return Err(ConfigError::InvalidValue {
                field: "server.admin_port".to_string(),
                message: format!("must differ from server.port ({port})"),
            });
        }
    }

    // Translations
    let mut overrides: Vec<_> = config.translations.source_ip_overrides.iter().collect();
    overrides.sort();
    for (hostname, value) in overrides {
        if value.trim().parse::<IpAddr>().is_err() {
            warnings.push(ValidationWarning::InvalidOverrideIp {
                hostname: hostname.clone(),
                value: value.clone(),
            });
        }
    }

    // Protocols
    for (number, name) in &config.protocols {
        if *number > 255 {
            return Err(ConfigError::InvalidValue {
                field: format!("protocols.{number}"),
                message: "protocol numbers are 0-255".to_string(),
            });
        }
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("protocols.{number}"),
                message: "name must not be empty".to_string(),
            });
        }
    }

    Ok(ValidationResult::with_warnings(warnings))
}

fn check_url(field: &str, url: &str) -> Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::InvalidUrl {
        field: field.to_string(),
        url: url.to_string(),
        message,
    };

    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid(format!(
            "unsupported scheme '{}', expected http or https",
            parsed.scheme()
        )));
    }
    Ok(())
}

fn check_nonzero(field: &str, value: Option<u64>) -> Result<(), ConfigError> {
    if value == Some(0) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: "must be > 0".to_string(),
        });
    }
    Ok(())
}
