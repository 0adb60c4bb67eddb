//! Canonical telemetry record produced from miner API replies

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::device::MinerEndpoint;
use crate::fields::Block;

/// Miner software family detected from the `VERSION` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmwareVendor {
    Cgminer,
    Bmminer,
    Unknown,
}

/// Miner software running on the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareInfo {
    pub vendor: FirmwareVendor,
    pub version: Option<Version>,
}

impl Default for FirmwareInfo {
    fn default() -> Self {
        Self {
            vendor: FirmwareVendor::Unknown,
            version: None,
        }
    }
}

/// Hardware and software versions reported by the `version` command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Hardware model (e.g., "Antminer S19j Pro")
    pub model: Option<String>,
    /// API version
    pub api: Option<Version>,
    /// Miner software family and version
    pub firmware: FirmwareInfo,
}

/// Per-hashboard readings, keyed by chain index in [`NormalizedRecord::chains`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainStats {
    pub temperature: Option<i64>,
    pub inlet: Option<f64>,
    pub outlet: Option<f64>,
    /// Chain hashrate in GH/s
    pub hashrate: Option<f64>,
    pub asic_count: Option<i64>,
}

/// One configured upstream pool, with field names reconciled across firmware
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolInfo {
    pub url: Option<String>,
    pub worker_name: Option<String>,
    /// Alive/Dead/Disabled as reported
    pub status: Option<String>,
    pub priority: Option<i64>,
    pub stratum_active: Option<bool>,
    pub quota: Option<i64>,
    pub accepted: Option<i64>,
    pub rejected: Option<i64>,
    /// The untouched firmware block, for vendor-specific fields
    #[serde(default, skip_serializing_if = "Block::is_empty")]
    pub raw: Block,
}

/// Canonical telemetry record for one miner at one point in time.
///
/// Hashrates are kept in the base unit (GH/s); see [`crate::units`] for
/// display conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub collected_at: DateTime<Utc>,
    pub host: IpAddr,
    pub port: u16,
    pub mac: Option<String>,
    pub online: bool,

    pub model: Option<String>,
    pub api_version: Option<Version>,
    pub firmware: Option<FirmwareInfo>,

    pub hashrate_5s: Option<f64>,
    pub hashrate_avg: Option<f64>,
    pub total_rate_ideal: Option<f64>,
    /// Representative temperature
    pub temperature: Option<f64>,
    pub temp_max: Option<i64>,
    pub miner_count: Option<i64>,
    pub frequency: Option<i64>,

    pub fan_num: Option<i64>,
    pub fans: Vec<i64>,
    pub chains: BTreeMap<String, ChainStats>,
    pub chain_hw: Vec<i64>,
    pub chain_avg_hashrate: Vec<String>,

    pub pool: Option<String>,
    pub worker_name: Option<String>,
    pub pools: Vec<PoolInfo>,
}

impl NormalizedRecord {
    /// A record with the endpoint populated and every metric absent
    pub fn offline(endpoint: &MinerEndpoint) -> Self {
        Self {
            collected_at: Utc::now(),
            host: endpoint.host,
            port: endpoint.port,
            mac: endpoint.link_address.clone(),
            online: false,
            model: None,
            api_version: None,
            firmware: None,
            hashrate_5s: None,
            hashrate_avg: None,
            total_rate_ideal: None,
            temperature: None,
            temp_max: None,
            miner_count: None,
            frequency: None,
            fan_num: None,
            fans: Vec::new(),
            chains: BTreeMap::new(),
            chain_hw: Vec::new(),
            chain_avg_hashrate: Vec::new(),
            pool: None,
            worker_name: None,
            pools: Vec::new(),
        }
    }

    /// True when no metric was captured
    pub fn has_no_metrics(&self) -> bool {
        self.model.is_none()
            && self.api_version.is_none()
            && self.firmware.is_none()
            && self.hashrate_5s.is_none()
            && self.hashrate_avg.is_none()
            && self.total_rate_ideal.is_none()
            && self.temperature.is_none()
            && self.temp_max.is_none()
            && self.miner_count.is_none()
            && self.frequency.is_none()
            && self.fan_num.is_none()
            && self.fans.is_empty()
            && self.chains.is_empty()
            && self.chain_hw.is_empty()
            && self.chain_avg_hashrate.is_empty()
            && self.pool.is_none()
            && self.worker_name.is_none()
            && self.pools.is_empty()
    }

    /// Sum of per-chain hashrates in GH/s, if any chain reported one
    pub fn chain_hashrate_total(&self) -> Option<f64> {
        let rates: Vec<f64> = self.chains.values().filter_map(|c| c.hashrate).collect();
        (!rates.is_empty()).then(|| rates.iter().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_offline_record() {
        let endpoint = MinerEndpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)), 4028)
            .with_link_address(Some("aa:bb:cc:dd:ee:ff".to_string()));
        let record = NormalizedRecord::offline(&endpoint);
        assert!(!record.online);
        assert_eq!(record.host, endpoint.host);
        assert_eq!(record.mac.as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert!(record.has_no_metrics());
    }

    #[test]
    fn test_chain_hashrate_total() {
        let endpoint = MinerEndpoint::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4028);
        let mut record = NormalizedRecord::offline(&endpoint);
        assert_eq!(record.chain_hashrate_total(), None);

        record.chains.insert(
            "1".to_string(),
            ChainStats { hashrate: Some(100.0), ..Default::default() },
        );
        record.chains.insert(
            "2".to_string(),
            ChainStats { hashrate: Some(50.5), ..Default::default() },
        );
        record.chains.insert("3".to_string(), ChainStats::default());
        assert_eq!(record.chain_hashrate_total(), Some(150.5));
    }

    #[test]
    fn test_chain_serializes_nulls() {
        let chain = ChainStats {
            temperature: Some(78),
            hashrate: Some(5463.34),
            asic_count: Some(63),
            ..Default::default()
        };
        let json = serde_json::to_value(&chain).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "temperature": 78,
                "inlet": null,
                "outlet": null,
                "hashrate": 5463.34,
                "asic_count": 63
            })
        );
    }
}
