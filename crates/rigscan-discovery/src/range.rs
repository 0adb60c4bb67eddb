//! Scan ranges: CIDR blocks and `a.b.c.*` wildcards

use network_interface::{NetworkInterface, NetworkInterfaceConfig};
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RangeError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Invalid prefix length: {0} (must be 0-32)")]
    InvalidPrefix(String),
    #[error("Unsupported range pattern: {0}")]
    UnsupportedPattern(String),
    #[error("No IPv4 interface to derive a scan range from")]
    NoLocalInterface,
}

/// An IPv4 network to sweep. Host bits of the base address are masked off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    network: Ipv4Addr,
    prefix_len: u8,
}

fn prefix_mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        !0u32 << (32 - u32::from(prefix_len))
    }
}

impl AddressRange {
    pub fn new(base: Ipv4Addr, prefix_len: u8) -> Result<Self, RangeError> {
        if prefix_len > 32 {
            return Err(RangeError::InvalidPrefix(prefix_len.to_string()));
        }
        let network = Ipv4Addr::from(u32::from(base) & prefix_mask(prefix_len));
        Ok(Self { network, prefix_len })
    }

    /// Parse `10.0.0.0/24`, `10.0.0.*` or a bare address (a /32)
    pub fn parse(input: &str) -> Result<Self, RangeError> {
        let input = input.trim();

        if let Some(stem) = input.strip_suffix(".*") {
            let octets: Vec<&str> = stem.split('.').collect();
            if octets.len() != 3 || octets.iter().any(|o| o.is_empty() || o.contains('*')) {
                return Err(RangeError::UnsupportedPattern(input.to_string()));
            }
            let base = Ipv4Addr::from_str(&format!("{stem}.0"))
                .map_err(|_| RangeError::InvalidAddress(input.to_string()))?;
            return Self::new(base, 24);
        }
        if input.contains('*') {
            return Err(RangeError::UnsupportedPattern(input.to_string()));
        }

        let (addr, prefix) = match input.split_once('/') {
            Some((addr, prefix)) => {
                let prefix: u8 = prefix
                    .parse()
                    .map_err(|_| RangeError::InvalidPrefix(prefix.to_string()))?;
                (addr, prefix)
            }
            None => (input, 32),
        };
        let base =
            Ipv4Addr::from_str(addr).map_err(|_| RangeError::InvalidAddress(addr.to_string()))?;
        Self::new(base, prefix)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & prefix_mask(self.prefix_len) == u32::from(self.network)
    }

    /// Usable host addresses, lowest first.
    ///
    /// Network and broadcast addresses are skipped except on /31 (both
    /// addresses are hosts) and /32 (the address itself).
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let network = u32::from(self.network);
        let broadcast = network | !prefix_mask(self.prefix_len);
        let (first, last) = match self.prefix_len {
            32 | 31 => (network, broadcast),
            _ => (network + 1, broadcast - 1),
        };
        (first..=last).map(Ipv4Addr::from)
    }

    pub fn host_count(&self) -> u64 {
        match self.prefix_len {
            32 => 1,
            31 => 2,
            p => (1u64 << (32 - u32::from(p))) - 2,
        }
    }
}

impl FromStr for AddressRange {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// The /24 around the first non-loopback IPv4 interface
pub fn local_range() -> Result<AddressRange, RangeError> {
    let interfaces = NetworkInterface::show().unwrap_or_default();
    let ip = interfaces
        .iter()
        .filter(|iface| {
            !iface.name.starts_with("lo")
                && !iface.name.starts_with("docker")
                && !iface.name.starts_with("br-")
                && !iface.name.starts_with("veth")
        })
        .flat_map(|iface| iface.addr.iter())
        .find_map(|addr| match addr {
            network_interface::Addr::V4(v4) if !v4.ip.is_loopback() => Some(v4.ip),
            _ => None,
        })
        .ok_or(RangeError::NoLocalInterface)?;

    let range = AddressRange::new(ip, 24)?;
    debug!(ip = %ip, range = %range, "Derived scan range from local interface");
    Ok(range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("192.168.1.0/24", 254 ; "slash 24")]
    #[test_case("192.168.1.*", 254 ; "wildcard")]
    #[test_case("10.0.0.0/30", 2 ; "slash 30")]
    #[test_case("10.0.0.0/31", 2 ; "slash 31")]
    #[test_case("10.0.0.7/32", 1 ; "slash 32")]
    #[test_case("10.0.0.7", 1 ; "bare address")]
    fn test_host_count(input: &str, expected: usize) {
        let range = AddressRange::parse(input).unwrap();
        assert_eq!(range.hosts().count(), expected);
        assert_eq!(range.host_count(), expected as u64);
    }

    #[test]
    fn test_wildcard_expands_to_slash_24() {
        let range = AddressRange::parse("192.168.1.*").unwrap();
        assert_eq!(range, AddressRange::parse("192.168.1.0/24").unwrap());
        assert_eq!(range.to_string(), "192.168.1.0/24");

        let hosts: Vec<_> = range.hosts().collect();
        assert_eq!(hosts.first(), Some(&Ipv4Addr::new(192, 168, 1, 1)));
        assert_eq!(hosts.last(), Some(&Ipv4Addr::new(192, 168, 1, 254)));
    }

    #[test]
    fn test_host_bits_are_masked() {
        let range = AddressRange::parse("192.168.1.77/24").unwrap();
        assert_eq!(range.network(), Ipv4Addr::new(192, 168, 1, 0));
        assert!(range.contains(Ipv4Addr::new(192, 168, 1, 200)));
        assert!(!range.contains(Ipv4Addr::new(192, 168, 2, 1)));
    }

    #[test]
    fn test_slash_31_includes_both_addresses() {
        let hosts: Vec<_> = AddressRange::parse("10.0.0.4/31").unwrap().hosts().collect();
        assert_eq!(hosts, vec![Ipv4Addr::new(10, 0, 0, 4), Ipv4Addr::new(10, 0, 0, 5)]);
    }

    #[test_case("10.0.*.*" ; "two wildcards")]
    #[test_case("10.*" ; "short wildcard")]
    #[test_case("10.0.0.1*" ; "embedded star")]
    #[test_case("10.0.0.0.*" ; "four octets then wildcard")]
    fn test_rejects_unsupported_patterns(input: &str) {
        assert!(matches!(
            AddressRange::parse(input),
            Err(RangeError::UnsupportedPattern(_))
        ));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(AddressRange::parse("10.0.0.0/33"), Err(RangeError::InvalidPrefix(_))));
        assert!(matches!(AddressRange::parse("10.0.0.0/x"), Err(RangeError::InvalidPrefix(_))));
        assert!(matches!(AddressRange::parse("300.0.0.0/24"), Err(RangeError::InvalidAddress(_))));
        assert!(matches!(AddressRange::parse("10.0.300.*"), Err(RangeError::InvalidAddress(_))));
        assert!(matches!(AddressRange::parse("miners"), Err(RangeError::InvalidAddress(_))));
    }
}
