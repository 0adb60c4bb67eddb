//! Link-layer address lookup through the system neighbor table

use async_trait::async_trait;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Upper bound on each neighbor-table command
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(1);

static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((?:[0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2})").expect("MAC pattern is valid")
});

/// Best-effort IP to MAC lookup. Any failure is `None`.
#[async_trait]
pub trait MacResolver: Send + Sync {
    async fn resolve(&self, ip: IpAddr) -> Option<String>;
}

/// Neighbor table entry
#[derive(Debug, Clone)]
pub struct ArpEntry {
    pub ip: Ipv4Addr,
    pub mac: String,
    pub interface: String,
    pub state: ArpState,
}

/// Neighbor entry state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
    Incomplete,
    Permanent,
    Unknown,
}

impl ArpEntry {
    /// Entries with a hardware address that the kernel has not given up on
    fn usable(&self) -> bool {
        !self.mac.is_empty() && !matches!(self.state, ArpState::Failed | ArpState::Incomplete)
    }
}

/// Parse a line from `ip neigh show` output
fn parse_ip_neigh_line(line: &str) -> Option<ArpEntry> {
    // Format: "192.168.1.1 dev eth0 lladdr aa:bb:cc:dd:ee:ff REACHABLE"
    let parts: Vec<&str> = line.split_whitespace().collect();

    if parts.len() < 4 {
        return None;
    }

    let ip = Ipv4Addr::from_str(parts[0]).ok()?;

    let dev_idx = parts.iter().position(|&p| p == "dev")?;
    let lladdr_idx = parts.iter().position(|&p| p == "lladdr");

    if dev_idx + 1 >= parts.len() {
        return None;
    }

    let interface = parts[dev_idx + 1].to_string();

    // MAC is missing for INCOMPLETE/FAILED entries
    let mac = lladdr_idx
        .and_then(|idx| parts.get(idx + 1))
        .map(|s| s.to_lowercase())
        .unwrap_or_default();

    let state = parts.last().map(|s| parse_arp_state(s)).unwrap_or(ArpState::Unknown);

    Some(ArpEntry { ip, mac, interface, state })
}

fn parse_arp_state(s: &str) -> ArpState {
    match s.to_uppercase().as_str() {
        "REACHABLE" => ArpState::Reachable,
        "STALE" => ArpState::Stale,
        "DELAY" => ArpState::Delay,
        "PROBE" => ArpState::Probe,
        "FAILED" => ArpState::Failed,
        "INCOMPLETE" => ArpState::Incomplete,
        "PERMANENT" => ArpState::Permanent,
        _ => ArpState::Unknown,
    }
}

/// First MAC-looking token in free-form `arp` output, lowercased
fn find_mac(output: &str) -> Option<String> {
    MAC_PATTERN
        .captures(output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase().replace('-', ":"))
}

async fn run(program: &str, args: &[&str]) -> Option<String> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    match timeout(LOOKUP_TIMEOUT, command.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => {
            trace!(program, status = %output.status, "Neighbor lookup exited unsuccessfully");
            None
        }
        Ok(Err(e)) => {
            trace!(program, error = %e, "Neighbor lookup could not run");
            None
        }
        Err(_) => {
            debug!(program, "Neighbor lookup timed out");
            None
        }
    }
}

/// Reads `ip neigh show <ip>`, falling back to `arp -n <ip>`
#[derive(Debug, Clone, Default)]
pub struct ArpTableResolver;

impl ArpTableResolver {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MacResolver for ArpTableResolver {
    async fn resolve(&self, ip: IpAddr) -> Option<String> {
        let IpAddr::V4(v4) = ip else {
            return None;
        };
        let target = v4.to_string();

        if let Some(out) = run("ip", &["neigh", "show", &target]).await {
            let found = out
                .lines()
                .filter_map(parse_ip_neigh_line)
                .find(|e| e.ip == v4 && e.usable())
                .map(|e| e.mac);
            if found.is_some() {
                trace!(ip = %ip, mac = ?found, "Resolved from ip neigh");
                return found;
            }
        }

        let found = run("arp", &["-n", &target]).await.and_then(|out| find_mac(&out));
        trace!(ip = %ip, mac = ?found, "Resolved from arp");
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip_neigh_line_reachable() {
        let line = "192.168.1.100 dev eth0 lladdr AA:bb:cc:dd:ee:ff REACHABLE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(entry.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(entry.interface, "eth0");
        assert_eq!(entry.state, ArpState::Reachable);
        assert!(entry.usable());
    }

    #[test]
    fn test_parse_ip_neigh_line_stale() {
        let line = "192.168.1.100 dev eth0 lladdr aa:bb:cc:dd:ee:ff STALE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.state, ArpState::Stale);
        assert!(entry.usable());
    }

    #[test]
    fn test_parse_incomplete_line() {
        let line = "192.168.1.100 dev eth0 INCOMPLETE";
        let entry = parse_ip_neigh_line(line).unwrap();
        assert_eq!(entry.ip, Ipv4Addr::new(192, 168, 1, 100));
        assert_eq!(entry.mac, "");
        assert_eq!(entry.state, ArpState::Incomplete);
        assert!(!entry.usable());
    }

    #[test]
    fn test_parse_too_short() {
        assert!(parse_ip_neigh_line("192.168.1.100 dev").is_none());
    }

    #[test]
    fn test_find_mac_in_arp_output() {
        let linux = "Address                  HWtype  HWaddress           Flags Mask            Iface\n\
                     192.168.1.20             ether   00:1A:2b:3c:4d:5e   C                     eth0\n";
        assert_eq!(find_mac(linux).as_deref(), Some("00:1a:2b:3c:4d:5e"));

        let bsd = "? (192.168.1.20) at 00:1a:2b:3c:4d:5e on en0 ifscope [ethernet]";
        assert_eq!(find_mac(bsd).as_deref(), Some("00:1a:2b:3c:4d:5e"));

        let windows = "  192.168.1.20          00-1a-2b-3c-4d-5e     dynamic";
        assert_eq!(find_mac(windows).as_deref(), Some("00:1a:2b:3c:4d:5e"));

        assert_eq!(find_mac("192.168.1.20 (incomplete) eth0"), None);
    }
}
