//! Configuration loading and validation

use anyhow::{Context, Result};
use rigscan_cgminer::{ClientConfig, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_IDLE_TIMEOUT_MS};
use rigscan_core::DEFAULT_API_PORT;
use rigscan_discovery::{
    local_range, AddressRange, ProbeConfig, ScannerConfig, DEFAULT_MAX_PROBES,
    DEFAULT_PROBE_TIMEOUT_MS, DEFAULT_QUERY_CONCURRENCY,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub sink: SinkConfig,
    /// Telemetry forwarding (disabled when absent)
    #[serde(default)]
    pub forward: Option<ForwardConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between the starts of consecutive scan cycles
    #[serde(default = "default_interval")]
    pub scan_interval_secs: u64,
    /// Miners queried at once
    #[serde(default = "default_query_concurrency")]
    pub query_concurrency: usize,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_interval(),
            query_concurrency: default_query_concurrency(),
        }
    }
}

fn default_interval() -> u64 {
    30
}

fn default_query_concurrency() -> usize {
    DEFAULT_QUERY_CONCURRENCY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// CIDR block or `a.b.c.*`; the local /24 when unset
    #[serde(default)]
    pub range: Option<String>,
    /// Management API port
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
    /// Simultaneous probe connections
    #[serde(default = "default_max_probes")]
    pub max_probes: usize,
    /// Look up MAC addresses in the neighbor table
    #[serde(default = "default_true")]
    pub resolve_mac: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            range: None,
            port: default_port(),
            probe_timeout_ms: default_probe_timeout(),
            max_probes: default_max_probes(),
            resolve_mac: true,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_probe_timeout() -> u64 {
    DEFAULT_PROBE_TIMEOUT_MS
}

fn default_max_probes() -> usize {
    DEFAULT_MAX_PROBES
}

fn default_true() -> bool {
    true
}

/// Protocol client timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout(),
            idle_timeout_ms: default_idle_timeout(),
        }
    }
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

fn default_idle_timeout() -> u64 {
    DEFAULT_IDLE_TIMEOUT_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Log one line per record
    #[serde(default = "default_true")]
    pub log: bool,
    /// Append records to this JSON-lines file
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Insert records into this SQLite database (`miner_stats` table)
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            log: true,
            store_path: None,
            db_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Base URL of the telemetry service
    pub url: String,
    /// Sent verbatim as `Authorization: Basic <api_key>`
    #[serde(default)]
    pub api_key: Option<String>,
    /// Path appended to `url`
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_forward_timeout")]
    pub timeout_secs: u64,
    /// Results per POST
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// First retry delay; doubles on each further retry
    #[serde(default = "default_backoff")]
    pub backoff_ms: u64,
    /// Send only `{ip, online}` per miner (heartbeat payload)
    #[serde(default)]
    pub online_only: bool,
}

fn default_forward_timeout() -> u64 {
    10
}

fn default_batch_size() -> usize {
    1
}

fn default_retries() -> u32 {
    3
}

fn default_backoff() -> u64 {
    300
}

impl Config {
    /// The configured range, or the local /24 when none is set
    pub fn scan_range(&self) -> Result<AddressRange> {
        match &self.discovery.range {
            Some(range) => AddressRange::parse(range)
                .with_context(|| format!("Invalid discovery range '{}'", range)),
            None => local_range().context("No discovery range configured"),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(self.client.connect_timeout_ms),
            idle_timeout: Duration::from_millis(self.client.idle_timeout_ms),
        }
    }

    /// Convert to ScannerConfig
    pub fn to_scanner_config(&self) -> Result<ScannerConfig> {
        Ok(ScannerConfig {
            range: self.scan_range()?,
            probe: ProbeConfig {
                port: self.discovery.port,
                timeout: Duration::from_millis(self.discovery.probe_timeout_ms),
                max_concurrency: self.discovery.max_probes,
            },
            client: self.client_config(),
            query_concurrency: self.daemon.query_concurrency,
        })
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}
