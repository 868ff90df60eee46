//! Metrics for the enrichment pipeline.
//!
//! - [`prom_metrics`] - Prometheus metrics using prometheus-client crate
//!
//! Logging goes through `tracing` directly; subscriber setup lives in the
//! server binary.

pub mod prom_metrics;

pub use prom_metrics::PeerlogMetrics;
