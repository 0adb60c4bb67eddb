//! Record sinks: log lines and the JSON-lines row store

use anyhow::Result;
use async_trait::async_trait;
use rigscan_core::{format_hashrate, FanoutSink, NormalizedRecord, Sink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::forward::RestForwarder;
use crate::store::SqliteStore;

/// One `info` line per record
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn store(&self, record: NormalizedRecord) {
        if !record.online {
            info!(ip = %record.host, "Miner offline");
            return;
        }
        let model = record.model.as_deref();
        let hashrate = record.hashrate_avg.map(|ghs| format_hashrate(ghs, model));
        info!(
            ip = %record.host,
            model = model.unwrap_or("unknown"),
            hashrate = hashrate.as_deref().unwrap_or("-"),
            temperature = ?record.temperature,
            pool = record.pool.as_deref().unwrap_or("-"),
            "Miner online"
        );
    }
}

/// Append-only JSON-lines file, one serialized record per line
pub struct JsonlStore {
    path: PathBuf,
    // Serializes appends from concurrent callers
    write_lock: Mutex<()>,
}

impl JsonlStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, lines: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(lines.as_bytes()).await?;
        file.flush().await
    }
}

#[async_trait]
impl Sink for JsonlStore {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn store(&self, record: NormalizedRecord) {
        self.store_batch(vec![record]).await;
    }

    async fn store_batch(&self, records: Vec<NormalizedRecord>) {
        let mut lines = String::new();
        for record in &records {
            match serde_json::to_string(record) {
                Ok(line) => {
                    lines.push_str(&line);
                    lines.push('\n');
                }
                Err(e) => warn!(ip = %record.host, error = %e, "Failed to serialize record"),
            }
        }
        if lines.is_empty() {
            return;
        }
        match self.append(&lines).await {
            Ok(()) => debug!(path = %self.path.display(), count = records.len(), "Stored records"),
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to store records"),
        }
    }
}

/// Build the configured sinks
pub async fn build_sinks(config: &Config) -> Result<FanoutSink> {
    let mut sinks = FanoutSink::default();
    if config.sink.log {
        sinks.push(Arc::new(LogSink));
    }
    if let Some(path) = &config.sink.store_path {
        info!(path = %path.display(), "Storing records as JSON lines");
        sinks.push(Arc::new(JsonlStore::new(path.clone())));
    }
    if let Some(path) = &config.sink.db_path {
        sinks.push(Arc::new(SqliteStore::open(path).await?));
    }
    if let Some(forward) = &config.forward {
        let forwarder = RestForwarder::new(forward)?;
        info!(url = %forwarder.url(), batch_size = forward.batch_size, "Forwarding records");
        sinks.push(Arc::new(forwarder));
    }
    Ok(sinks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForwardConfig;
    use rigscan_core::MinerEndpoint;
    use std::net::{IpAddr, Ipv4Addr};

    fn record(last: u8, online: bool) -> NormalizedRecord {
        let endpoint = MinerEndpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), 4028);
        let mut record = NormalizedRecord::offline(&endpoint);
        record.online = online;
        if online {
            record.model = Some("Antminer S9".to_string());
            record.hashrate_avg = Some(13500.0);
        }
        record
    }

    #[tokio::test]
    async fn test_jsonl_appends_one_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("records.jsonl");
        let store = JsonlStore::new(&path);

        store.store_batch(vec![record(1, true), record(2, false)]).await;
        store.store(record(3, true)).await;

        let content = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);

        let first: NormalizedRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, {
            let mut expected = record(1, true);
            expected.collected_at = first.collected_at;
            expected
        });
        let second: NormalizedRecord = serde_json::from_str(lines[1]).unwrap();
        assert!(!second.online);
        assert_eq!(second.host, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[tokio::test]
    async fn test_jsonl_empty_batch_creates_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        JsonlStore::new(&path).store_batch(Vec::new()).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_build_sinks_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        assert_eq!(build_sinks(&config).await.unwrap().len(), 1);

        config.sink.log = false;
        assert!(build_sinks(&config).await.unwrap().is_empty());

        config.sink.store_path = Some(dir.path().join("records.jsonl"));
        config.sink.db_path = Some(dir.path().join("miners.db"));
        config.forward = Some(ForwardConfig {
            url: "http://127.0.0.1:9".to_string(),
            api_key: None,
            path: String::new(),
            timeout_secs: 1,
            batch_size: 1,
            retries: 0,
            backoff_ms: 1,
            online_only: false,
        });
        let sinks = build_sinks(&config).await.unwrap();
        assert_eq!(sinks.len(), 3);
        assert!(dir.path().join("miners.db").exists());
    }
}
