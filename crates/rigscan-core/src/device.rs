//! Miner endpoint types for tracking discovered devices

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, SocketAddr};

/// Default cgminer/bmminer API port
pub const DEFAULT_API_PORT: u16 = 4028;

/// A reachable miner management endpoint.
///
/// Identity is the `(host, port)` pair; the link-layer address is best-effort
/// enrichment and never takes part in equality or hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerEndpoint {
    /// IP address of the device
    pub host: IpAddr,
    /// Management API port (typically 4028)
    pub port: u16,
    /// MAC address (if known)
    pub link_address: Option<String>,
}

impl MinerEndpoint {
    /// Create an endpoint without a link-layer address
    pub fn new(host: IpAddr, port: u16) -> Self {
        Self {
            host,
            port,
            link_address: None,
        }
    }

    /// Attach a resolved link-layer address
    pub fn with_link_address(mut self, mac: Option<String>) -> Self {
        self.link_address = mac;
        self
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl PartialEq for MinerEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for MinerEndpoint {}

impl Hash for MinerEndpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl std::fmt::Display for MinerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

impl From<SocketAddr> for MinerEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}
