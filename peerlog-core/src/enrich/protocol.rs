//! IP protocol number to name mapping.

use std::collections::{BTreeMap, HashMap};

/// IANA protocol numbers the platform reports, with their keyword names.
const IANA_PROTOCOLS: &[(u32, &str)] = &[
    (1, "ICMP"),
    (2, "IGMP"),
    (4, "IPv4"),
    (6, "TCP"),
    (17, "UDP"),
    (41, "IPv6"),
    (47, "GRE"),
    (50, "ESP"),
    (51, "AH"),
    (58, "IPv6-ICMP"),
    (89, "OSPF"),
    (132, "SCTP"),
];

/// Lookup table from protocol number to display name.
#[derive(Debug, Clone)]
pub struct ProtocolTable {
    names: HashMap<u32, String>,
}

impl Default for ProtocolTable {
    fn default() -> Self {
        Self {
            names: IANA_PROTOCOLS
                .iter()
                .map(|(n, name)| (*n, (*name).to_string()))
                .collect(),
        }
    }
}

impl ProtocolTable {
    /// Built-in table with `overrides` added or replacing entries.
    pub fn with_overrides(overrides: &BTreeMap<u32, String>) -> Self {
        let mut table = Self::default();
        for (number, name) in overrides {
            table.names.insert(*number, name.clone());
        }
        table
    }

    /// Name for `number`, or its decimal form if unmapped.
    pub fn name(&self, number: u32) -> String {
        self.names
            .get(&number)
            .cloned()
            .unwrap_or_else(|| number.to_string())
    }
}
