//! Forwarding policy for traffic events.
//!
//! Only inbound flows that land on a named peer outside the excluded
//! networks are worth forwarding. The filter is a pure function of the event
//! and its configuration: it performs no I/O and holds no state.

pub mod network;

pub use network::{ExclusionNetwork, split_host_port};

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::event::DiscriminatorMatch;
use crate::event::traffic::{DESTINATION_PEER, DIRECTION_INGRESS, TrafficEvent};

/// Policy section of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Destinations inside any of these networks are not forwarded.
    pub exclusion_networks: Vec<ExclusionNetwork>,
    /// How the `message` discriminator identifies traffic events.
    pub discriminator: DiscriminatorMatch,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            exclusion_networks: vec![ExclusionNetwork::OVERLAY],
            discriminator: DiscriminatorMatch::default(),
        }
    }
}

/// Why an event was not forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// `direction` is not `INGRESS`.
    NotIngress,
    /// `destination_type` is not `PEER`.
    NotPeerDestination,
    /// `destination_name` is empty.
    UnnamedDestination,
    /// Destination IP lies in an exclusion network.
    ExcludedNetwork,
    /// Destination address could not be parsed.
    MalformedDestination,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotIngress => "not_ingress",
            Self::NotPeerDestination => "not_peer_destination",
            Self::UnnamedDestination => "unnamed_destination",
            Self::ExcludedNetwork => "excluded_network",
            Self::MalformedDestination => "malformed_destination",
        }
    }
}

/// Result of evaluating a traffic event against the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Drop(DropReason),
}

impl Verdict {
    pub fn is_forward(&self) -> bool {
        matches!(self, Self::Forward)
    }
}

/// Decides whether a traffic event is forward-worthy.
#[derive(Debug, Clone, Default)]
pub struct PolicyFilter {
    exclusions: Vec<ExclusionNetwork>,
}

impl PolicyFilter {
    pub fn new(exclusions: Vec<ExclusionNetwork>) -> Self {
        Self { exclusions }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(config.exclusion_networks.clone())
    }

    pub fn exclusions(&self) -> &[ExclusionNetwork] {
        &self.exclusions
    }

    /// Shorthand for `evaluate(event).is_forward()`.
    pub fn is_forward_worthy(&self, event: &TrafficEvent) -> bool {
        self.evaluate(event).is_forward()
    }

    /// Evaluate every rule in order and report the first one that fails.
    pub fn evaluate(&self, event: &TrafficEvent) -> Verdict {
        let meta = &event.meta;

        if meta.direction != DIRECTION_INGRESS {
            return Verdict::Drop(DropReason::NotIngress);
        }
        if meta.destination_type != DESTINATION_PEER {
            return Verdict::Drop(DropReason::NotPeerDestination);
        }
        if meta.destination_name.is_empty() {
            return Verdict::Drop(DropReason::UnnamedDestination);
        }

        let Some(ip) = destination_ip(&meta.destination_addr) else {
            warn!(
                event_id = %event.id,
                destination_addr = %meta.destination_addr,
                "Malformed destination address, not forwarding"
            );
            return Verdict::Drop(DropReason::MalformedDestination);
        };

        if self.exclusions.iter().any(|net| net.contains(ip)) {
            return Verdict::Drop(DropReason::ExcludedNetwork);
        }

        Verdict::Forward
    }
}

/// Destination IP from `ip:port` (`[v6]:port` for IPv6). A missing port is
/// malformed.
fn destination_ip(addr: &str) -> Option<IpAddr> {
    let (host, _) = split_host_port(addr)?;
    host.trim().parse().ok()
}
