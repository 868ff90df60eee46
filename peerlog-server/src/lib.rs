//! peerlog HTTP surface: webhook listener, admin server and startup wiring.
//!
//! The event path itself lives in `peerlog-core`.

pub mod admin;
pub mod app;
pub mod auth;
pub mod error;
pub mod lifecycle;
pub mod logging_layer;
pub mod ports;
pub mod webhook;
