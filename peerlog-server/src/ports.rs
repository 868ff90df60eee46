//! Listener ports.
//!
//! | Port | Name | Purpose |
//! |------|------|---------|
//! | 8080 | Webhook | `POST /webhook` from the event producer |
//! | 8081 | Admin | Health checks and metrics |
//!
//! Resolution order: `server.port` / `server.admin_port` in the config file,
//! then `PEERLOG_WEBHOOK_PORT` / `PEERLOG_ADMIN_PORT`, then the defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use peerlog_core::config::ServerSection;

pub const DEFAULT_WEBHOOK_PORT: u16 = 8080;
pub const DEFAULT_ADMIN_PORT: u16 = 8081;

/// Webhook port from environment or default.
pub fn webhook_port() -> u16 {
    env_port("PEERLOG_WEBHOOK_PORT", DEFAULT_WEBHOOK_PORT)
}

/// Admin port from environment or default.
pub fn admin_port() -> u16 {
    env_port("PEERLOG_ADMIN_PORT", DEFAULT_ADMIN_PORT)
}

fn env_port(name: &str, default: u16) -> u16 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|port| *port != 0)
        .unwrap_or(default)
}

/// Socket addresses for both listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenAddrs {
    pub webhook: SocketAddr,
    pub admin: SocketAddr,
}

impl ListenAddrs {
    pub fn resolve(server: &ServerSection) -> Self {
        let bind = server.bind.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Self {
            webhook: SocketAddr::new(bind, server.port.unwrap_or_else(webhook_port)),
            admin: SocketAddr::new(bind, server.admin_port.unwrap_or_else(admin_port)),
        }
    }
}
