//! Management-port probing for miner discovery

use rigscan_core::{MinerEndpoint, DEFAULT_API_PORT};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::arp::MacResolver;
use crate::range::AddressRange;

/// Probe connect timeout in milliseconds
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 50;

/// Maximum simultaneous probe connections
pub const DEFAULT_MAX_PROBES: usize = 256;

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub port: u16,
    pub timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_API_PORT,
            timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            max_concurrency: DEFAULT_MAX_PROBES,
        }
    }
}

/// True if `addr` accepts a TCP connection within `limit`
pub async fn is_port_open(addr: SocketAddr, limit: Duration) -> bool {
    matches!(timeout(limit, TcpStream::connect(addr)).await, Ok(Ok(_)))
}

/// Sweeps address ranges for hosts with the management port open
pub struct Prober {
    config: ProbeConfig,
    resolver: Option<Arc<dyn MacResolver>>,
}

impl Prober {
    pub fn new(config: ProbeConfig) -> Self {
        Self {
            config,
            resolver: None,
        }
    }

    /// Enrich reachable endpoints with a link-layer address
    pub fn with_resolver(mut self, resolver: Arc<dyn MacResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe every host in `range`
    pub async fn probe(&self, range: &AddressRange) -> Vec<MinerEndpoint> {
        debug!(range = %range, hosts = range.host_count(), "Probing range");
        self.probe_hosts(range.hosts()).await
    }

    /// Probe the given hosts. Completion order, not input order.
    pub async fn probe_hosts<I>(&self, hosts: I) -> Vec<MinerEndpoint>
    where
        I: IntoIterator<Item = Ipv4Addr>,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut found = Vec::new();
        let mut probed = 0usize;

        for host in hosts {
            // Waiting for a permit here keeps the number of live tasks at the cap
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let port = self.config.port;
            let limit = self.config.timeout;
            let resolver = self.resolver.clone();
            probed += 1;

            tasks.spawn(async move {
                let _permit = permit;
                let addr = SocketAddr::new(IpAddr::V4(host), port);
                if !is_port_open(addr, limit).await {
                    trace!(ip = %host, "No listener");
                    return None;
                }
                let mac = match resolver {
                    Some(resolver) => resolver.resolve(addr.ip()).await,
                    None => None,
                };
                Some(MinerEndpoint::new(addr.ip(), port).with_link_address(mac))
            });

            while let Some(result) = tasks.try_join_next() {
                collect_probe(result, &mut found);
            }
        }

        while let Some(result) = tasks.join_next().await {
            collect_probe(result, &mut found);
        }

        debug!(probed, found = found.len(), "Probe sweep finished");
        found
    }
}

fn collect_probe(
    result: Result<Option<MinerEndpoint>, tokio::task::JoinError>,
    found: &mut Vec<MinerEndpoint>,
) {
    match result {
        Ok(Some(endpoint)) => {
            info!(ip = %endpoint.host, mac = ?endpoint.link_address, "Found miner API port");
            found.push(endpoint);
        }
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Probe task failed"),
    }
}
