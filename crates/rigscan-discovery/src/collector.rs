//! Per-endpoint query stage
//!
//! Every endpoint yields exactly one record: the normalized telemetry when
//! version and stats answer, otherwise an offline record.

use rigscan_cgminer::{ClientConfig, MinerClient};
use rigscan_core::{MinerEndpoint, NormalizedRecord};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, warn};

/// Default number of miners queried at once
pub const DEFAULT_QUERY_CONCURRENCY: usize = 32;

/// Query one miner, falling back to an offline record on any failure
pub async fn collect_endpoint(endpoint: MinerEndpoint, config: ClientConfig) -> NormalizedRecord {
    let client = MinerClient::with_config(endpoint, config);
    match client.record().await {
        Ok(record) => record,
        Err(e) => {
            warn!(host = %client.endpoint(), error = %e, "Miner query failed, marking offline");
            NormalizedRecord::offline(client.endpoint())
        }
    }
}

/// Runs [`collect_endpoint`] over many endpoints with a concurrency cap
#[derive(Debug, Clone)]
pub struct Collector {
    client: ClientConfig,
    concurrency: usize,
}

impl Collector {
    pub fn new(client: ClientConfig, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    /// Records come back in completion order
    pub async fn collect(&self, endpoints: Vec<MinerEndpoint>) -> Vec<NormalizedRecord> {
        let config = self.client.clone();
        self.collect_with(endpoints, move |endpoint| collect_endpoint(endpoint, config.clone()))
            .await
    }

    /// Run `query` per endpoint. A task that panics still yields an offline
    /// record for its endpoint.
    async fn collect_with<F, Fut>(&self, endpoints: Vec<MinerEndpoint>, query: F) -> Vec<NormalizedRecord>
    where
        F: Fn(MinerEndpoint) -> Fut,
        Fut: Future<Output = NormalizedRecord> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<Id, MinerEndpoint> = HashMap::with_capacity(endpoints.len());

        for endpoint in endpoints {
            let semaphore = semaphore.clone();
            let fut = query(endpoint.clone());
            let handle = tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                fut.await
            });
            pending.insert(handle.id(), endpoint);
        }

        let mut records = Vec::with_capacity(pending.len());
        while let Some(result) = tasks.join_next_with_id().await {
            match result {
                Ok((id, record)) => {
                    pending.remove(&id);
                    records.push(record);
                }
                Err(e) => match pending.remove(&e.id()) {
                    Some(endpoint) => {
                        warn!(host = %endpoint, error = %e, "Query task failed, marking offline");
                        records.push(NormalizedRecord::offline(&endpoint));
                    }
                    None => warn!(error = %e, "Query task failed"),
                },
            }
        }

        debug!(
            records = records.len(),
            online = records.iter().filter(|r| r.online).count(),
            "Query stage finished"
        );
        records
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new(ClientConfig::default(), DEFAULT_QUERY_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn reply(command: &str) -> Value {
        let status = json!([{"STATUS": "S", "Code": 1, "Msg": "ok"}]);
        match command {
            "version" => json!({
                "STATUS": status,
                "VERSION": [{"Type": "Antminer S19", "API": "3.1", "BMMiner": "1.0.0"}]
            }),
            "stats" => json!({
                "STATUS": status,
                "STATS": [
                    {"Type": "Antminer S19"},
                    {"GHS 5s": "95000.12", "GHS av": "94870.5", "temp2_1": 78, "chain_rate1": "31600.1", "chain_acn1": 76}
                ]
            }),
            _ => json!({
                "STATUS": status,
                "POOLS": [{"URL": "stratum+tcp://pool:3333", "User": "acct.w1", "Status": "Alive", "Priority": 0}]
            }),
        }
    }

    /// A miner that answers every connection from [`reply`]
    async fn answering_miner() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 512];
                    let request = loop {
                        let n = socket.read(&mut chunk).await.unwrap_or(0);
                        if n == 0 {
                            return;
                        }
                        buf.extend_from_slice(&chunk[..n]);
                        if let Ok(value) = serde_json::from_slice::<Value>(&buf) {
                            break value;
                        }
                    };
                    let command = request["command"].as_str().unwrap_or_default().to_string();
                    let body = serde_json::to_vec(&reply(&command)).unwrap();
                    socket.write_all(&body).await.unwrap();
                });
            }
        });
        addr
    }

    /// Accepts connections and never answers
    async fn silent_miner() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        addr
    }

    fn test_config() -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(500),
            idle_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_partial_batch_isolation() {
        let good = answering_miner().await;
        let silent = silent_miner().await;

        let collector = Collector::new(test_config(), 4);
        let mut records = collector
            .collect(vec![MinerEndpoint::from(good), MinerEndpoint::from(silent)])
            .await;
        records.sort_by_key(|r| r.port != good.port());

        assert_eq!(records.len(), 2);

        let online = &records[0];
        assert!(online.online);
        assert_eq!(online.port, good.port());
        assert_eq!(online.model.as_deref(), Some("Antminer S19"));
        assert_eq!(online.hashrate_5s, Some(95000.12));
        assert_eq!(online.chains["1"].temperature, Some(78));
        assert_eq!(online.chains["1"].asic_count, Some(76));
        assert_eq!(online.pool.as_deref(), Some("stratum+tcp://pool:3333"));
        assert_eq!(online.worker_name.as_deref(), Some("acct.w1"));

        let offline = &records[1];
        assert!(!offline.online);
        assert_eq!(offline.port, silent.port());
        assert!(offline.has_no_metrics());
    }

    #[tokio::test]
    async fn test_panicked_query_yields_offline_record() {
        let healthy = MinerEndpoint::from(SocketAddr::from(([127, 0, 0, 1], 4028)));
        let broken = MinerEndpoint::from(SocketAddr::from(([127, 0, 0, 2], 4028)))
            .with_link_address(Some("aa:bb:cc:dd:ee:01".to_string()));
        let broken_host = broken.host;

        let collector = Collector::new(test_config(), 2);
        let mut records = collector
            .collect_with(vec![healthy.clone(), broken], move |endpoint| async move {
                if endpoint.host == broken_host {
                    panic!("query blew up");
                }
                let mut record = NormalizedRecord::offline(&endpoint);
                record.online = true;
                record
            })
            .await;
        records.sort_by_key(|r| r.host);

        assert_eq!(records.len(), 2);
        assert!(records[0].online);
        assert_eq!(records[0].host, healthy.host);
        assert!(!records[1].online);
        assert_eq!(records[1].host, broken_host);
        assert_eq!(records[1].mac.as_deref(), Some("aa:bb:cc:dd:ee:01"));
        assert!(records[1].has_no_metrics());
    }

    #[tokio::test]
    async fn test_refused_endpoint_is_offline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let endpoint = MinerEndpoint::from(addr)
            .with_link_address(Some("aa:bb:cc:dd:ee:ff".to_string()));
        let record = collect_endpoint(endpoint, test_config()).await;
        assert!(!record.online);
        assert_eq!(record.host, addr.ip());
        assert_eq!(record.mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert!(record.hashrate_5s.is_none());
    }
}
