//! YAML configuration: schema, loading, validation and environment defaults.
//!
//! Loading order: explicit path, then `PEERLOG_CONFIG`, then
//! `/etc/peerlog/config.yaml`, then `./config.yaml`. `${VAR}` and
//! `${VAR:-default}` references are substituted before parsing.

pub mod defaults;
pub mod error;
pub mod loader;
pub mod schema;

pub use defaults::PeerlogDefaults;
pub use error::{ConfigError, ValidationResult, ValidationWarning};
pub use loader::{find_config_file, load_and_validate, load_config, parse_config, validate};
pub use schema::{Config, DirectorySection, ServerSection, SinkSection, resolve_secret};
