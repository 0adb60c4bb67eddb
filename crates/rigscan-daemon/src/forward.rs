//! Telemetry forwarding to a REST endpoint
//!
//! Records are flattened into the service's result format and POSTed as
//! `{"results": [...]}` in fixed-size batches. Delivery is best-effort: a
//! batch that still fails after its retries is logged and dropped.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use rigscan_core::{format_hashrate, NormalizedRecord, Sink};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ForwardConfig;

/// Gateway statuses worth retrying
const RETRY_STATUSES: &[StatusCode] = &[
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Flatten a record into the forwarded result object
pub fn format_result(record: &NormalizedRecord) -> Value {
    let model = record.model.as_deref();
    let mut result = Map::new();
    result.insert("ip".into(), json!(record.host.to_string()));
    result.insert("brand".into(), json!(model.unwrap_or("unknown")));
    result.insert("online".into(), json!(record.online));
    result.insert("worker_name".into(), json!(record.worker_name));
    result.insert("pool".into(), json!(record.pool));

    if !record.chains.is_empty() {
        let card: Map<String, Value> = record
            .chains
            .iter()
            .map(|(index, chain)| {
                let entry = json!({
                    "temp": chain.temperature,
                    "temp_in": chain.inlet,
                    "temp_out": chain.outlet,
                    "hashrate": chain.hashrate.map(|ghs| format_hashrate(ghs, model)),
                    "chain_acn": chain.asic_count,
                });
                (index.clone(), entry)
            })
            .collect();
        result.insert("card".into(), Value::Object(card));

        if record.hashrate_avg.is_some() {
            let total = record
                .chain_hashrate_total()
                .map(|ghs| format_hashrate(ghs, model));
            result.insert("hashrate".into(), json!(total));
        }
    }

    if let Some(ideal) = record.total_rate_ideal {
        result.insert("total_rate_ideal".into(), json!(format_hashrate(ideal, model)));
    }
    if let Some(count) = record.miner_count {
        result.insert("miner_count".into(), json!(count));
    }
    if let Some(frequency) = record.frequency {
        result.insert("frequency".into(), json!(frequency.to_string()));
    }
    if let Some(fan_num) = record.fan_num {
        result.insert("fan_num".into(), json!(fan_num));
    }
    if !record.fans.is_empty() {
        let fans: Map<String, Value> = record
            .fans
            .iter()
            .enumerate()
            .map(|(i, speed)| (format!("fan{}", i + 1), json!(speed)))
            .collect();
        result.insert("fans".into(), Value::Object(fans));
    }
    if !record.chain_hw.is_empty() {
        result.insert("chain_hw".into(), json!(record.chain_hw));
    }
    if !record.chain_avg_hashrate.is_empty() {
        result.insert("chain_avg_hashrate".into(), json!(record.chain_avg_hashrate));
    }
    if let Some(temp_max) = record.temp_max {
        result.insert("temp_max".into(), json!(temp_max));
    }

    Value::Object(result)
}

/// Heartbeat form: only the address and liveness
pub fn format_online(record: &NormalizedRecord) -> Value {
    json!({ "ip": record.host.to_string(), "online": record.online })
}

/// Join the base URL and an optional path with exactly one slash
fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

/// POSTs batches of formatted results
pub struct RestForwarder {
    client: reqwest::Client,
    url: String,
    batch_size: usize,
    retries: u32,
    backoff: Duration,
    online_only: bool,
}

impl RestForwarder {
    pub fn new(config: &ForwardConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &config.api_key {
            let value = HeaderValue::from_str(&format!("Basic {}", key))
                .context("api_key is not a valid header value")?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: join_url(&config.url, &config.path),
            batch_size: config.batch_size.max(1),
            retries: config.retries,
            backoff: Duration::from_millis(config.backoff_ms),
            online_only: config.online_only,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one batch, retrying gateway errors and refused connections.
    /// Returns whether the service accepted it.
    async fn post_batch(&self, results: &[Value]) -> bool {
        let body = json!({ "results": results });
        let first_ip = results
            .first()
            .and_then(|r| r.get("ip"))
            .and_then(Value::as_str)
            .unwrap_or("?");

        let mut attempt = 0u32;
        loop {
            match self.client.post(&self.url).json(&body).send().await {
                Ok(response) if response.status().is_success() => return true,
                Ok(response) => {
                    let status = response.status();
                    if !RETRY_STATUSES.contains(&status) || attempt >= self.retries {
                        warn!(url = %self.url, ip = first_ip, status = %status, "REST push failed");
                        return false;
                    }
                    debug!(url = %self.url, status = %status, attempt, "REST push will be retried");
                }
                Err(e) => {
                    if !e.is_connect() || attempt >= self.retries {
                        warn!(url = %self.url, ip = first_ip, error = %e, "REST push error");
                        return false;
                    }
                    debug!(url = %self.url, error = %e, attempt, "REST push will be retried");
                }
            }
            tokio::time::sleep(self.backoff * 2u32.saturating_pow(attempt)).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl Sink for RestForwarder {
    fn name(&self) -> &str {
        "rest"
    }

    async fn store(&self, record: NormalizedRecord) {
        self.store_batch(vec![record]).await;
    }

    async fn store_batch(&self, records: Vec<NormalizedRecord>) {
        if records.is_empty() {
            return;
        }
        let format = if self.online_only {
            format_online
        } else {
            format_result
        };
        let results: Vec<Value> = records.iter().map(format).collect();
        let total = results.len();
        let mut sent = 0usize;
        for chunk in results.chunks(self.batch_size) {
            if self.post_batch(chunk).await {
                sent += chunk.len();
            }
        }
        info!(url = %self.url, sent, total, "Forwarded records");
    }
}
