//! peerlog core: identity cache, event classification, forwarding policy,
//! enrichment and delivery for mesh-network webhook events.
//!
//! The HTTP surface lives in `peerlog-server`; everything here is
//! transport-agnostic and driven through [`pipeline::Pipeline::process`].

pub mod config;
pub mod enrich;
pub mod error;
pub mod event;
pub mod identity;
pub mod pipeline;
pub mod policy;
pub mod sink;
pub mod telemetry;
