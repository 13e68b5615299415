use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Operational state of a host interface as reported by the link
/// monitor. `Unknown` means the interface is gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceState {
    #[default]
    Unknown,
    Down,
    Up,
}

/// Cached view of one host interface.
#[derive(Debug, Clone, Default)]
pub struct HostInterface {
    pub state: InterfaceState,
    pub addrs: Vec<Ipv4Addr>,
}

/// Parse an address string, keeping only IPv4 (v4-mapped v6 addresses
/// are folded to their 4-byte form).
pub fn parse_ipv4(addr: &str) -> Option<Ipv4Addr> {
    match addr.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => Some(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped(),
    }
}
