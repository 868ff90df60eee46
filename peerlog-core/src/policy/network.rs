//! CIDR networks and `host:port` address handling.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An IPv4 or IPv6 network in CIDR notation.
///
/// Host bits in the configured address are ignored, so `10.0.0.7/24` and
/// `10.0.0.0/24` describe the same network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExclusionNetwork {
    network: IpAddr,
    prefix_len: u8,
}

impl ExclusionNetwork {
    /// The overlay network's own address range.
    pub const OVERLAY: Self = Self {
        network: IpAddr::V4(Ipv4Addr::new(100, 64, 0, 0)),
        prefix_len: 10,
    };

    /// Build a network, rejecting prefix lengths longer than the address.
    pub fn new(network: IpAddr, prefix_len: u8) -> Result<Self, String> {
        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix_len > max {
            return Err(format!("prefix length {prefix_len} exceeds {max} for {network}"));
        }
        Ok(Self {
            network,
            prefix_len,
        })
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Check whether `ip` falls within this network.
    ///
    /// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) match IPv4 networks.
    pub fn contains(&self, ip: IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = mask_u32(self.prefix_len);
                (u32::from(addr) & mask) == (u32::from(net) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = mask_u128(self.prefix_len);
                (u128::from(addr) & mask) == (u128::from(net) & mask)
            }
            (IpAddr::V4(_), IpAddr::V6(addr)) => addr
                .to_ipv4_mapped()
                .is_some_and(|v4| self.contains(IpAddr::V4(v4))),
            (IpAddr::V6(_), IpAddr::V4(_)) => false,
        }
    }
}

fn mask_u32(prefix_len: u8) -> u32 {
    match prefix_len {
        0 => 0,
        n if n >= 32 => u32::MAX,
        n => u32::MAX << (32 - n),
    }
}

fn mask_u128(prefix_len: u8) -> u128 {
    match prefix_len {
        0 => 0,
        n if n >= 128 => u128::MAX,
        n => u128::MAX << (128 - n),
    }
}

impl FromStr for ExclusionNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| format!("'{s}' is not in CIDR notation (missing '/')"))?;
        let network: IpAddr = addr
            .parse()
            .map_err(|e| format!("invalid network address in '{s}': {e}"))?;
        let prefix_len: u8 = prefix
            .parse()
            .map_err(|e| format!("invalid prefix length in '{s}': {e}"))?;
        Self::new(network, prefix_len)
    }
}

impl TryFrom<String> for ExclusionNetwork {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExclusionNetwork> for String {
    fn from(value: ExclusionNetwork) -> Self {
        value.to_string()
    }
}

impl fmt::Display for ExclusionNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Split `host:port` or `[v6host]:port` into host and port.
///
/// Returns `None` if there is no port separator, or if an unbracketed host
/// itself contains a colon. The port is not validated.
pub fn split_host_port(addr: &str) -> Option<(&str, &str)> {
    if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port));
    }
    let (host, port) = addr.rsplit_once(':')?;
    if host.contains(':') {
        return None;
    }
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> ExclusionNetwork {
        s.parse().unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_v4_contains() {
        let cgnat = net("100.64.0.0/10");
        assert!(cgnat.contains(ip("100.64.0.1")));
        assert!(cgnat.contains(ip("100.127.255.255")));
        assert!(!cgnat.contains(ip("100.128.0.0")));
        assert!(!cgnat.contains(ip("8.8.8.8")));

        let lan = net("10.0.0.7/24");
        assert!(lan.contains(ip("10.0.0.5")));
        assert!(!lan.contains(ip("10.0.1.5")));

        assert!(net("0.0.0.0/0").contains(ip("1.2.3.4")));
        assert!(net("1.2.3.4/32").contains(ip("1.2.3.4")));
    }

    #[test]
    fn test_v6_contains() {
        let ula = net("fd00::/8");
        assert!(ula.contains(ip("fd7a:115c:a1e0::1")));
        assert!(!ula.contains(ip("2001:db8::1")));
        assert!(!ula.contains(ip("10.0.0.1")));
    }

    #[test]
    fn test_mapped_v4_matches_v4_network() {
        assert!(net("10.0.0.0/8").contains(ip("::ffff:10.1.2.3")));
    }

    #[test]
    fn test_parse_errors() {
        assert!("10.0.0.0".parse::<ExclusionNetwork>().is_err());
        assert!("10.0.0.0/33".parse::<ExclusionNetwork>().is_err());
        assert!("fd00::/129".parse::<ExclusionNetwork>().is_err());
        assert!("nope/8".parse::<ExclusionNetwork>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_serde() {
        let parsed: ExclusionNetwork = serde_json::from_str(r#""100.64.0.0/10""#).unwrap();
        assert_eq!(serde_json::to_string(&parsed).unwrap(), r#""100.64.0.0/10""#);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("10.0.0.5:443"), Some(("10.0.0.5", "443")));
        assert_eq!(split_host_port("[fd00::1]:53"), Some(("fd00::1", "53")));
        assert_eq!(split_host_port("10.0.0.5"), None);
        assert_eq!(split_host_port("fd00::1"), None);
        assert_eq!(split_host_port("[fd00::1]"), None);
        assert_eq!(split_host_port("host:"), Some(("host", "")));
    }
}
