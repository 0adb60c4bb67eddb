//! Response normalization: firmware replies in, canonical records out
//!
//! Everything here is a pure function. Field names differ between cgminer and
//! bmminer builds (and between firmware revisions of the same build), so each
//! logical value is looked up through an ordered alias list and every
//! coercion is allowed to fail quietly.

use chrono::Utc;
use semver::Version;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::trace;

use crate::device::MinerEndpoint;
use crate::fields::{
    first_f64, first_i64, first_present, first_text, result_array, to_bool, to_display, to_f64,
    to_i64, to_text, Block,
};
use crate::record::{
    ChainStats, FirmwareInfo, FirmwareVendor, NormalizedRecord, PoolInfo, VersionInfo,
};
use crate::response::RawResponse;

const HASHRATE_5S_KEYS: &[&str] = &["GHS 5s", "GHS_5s", "rate_5s"];
const HASHRATE_AVG_KEYS: &[&str] = &["GHS av", "GHS_av", "rate_30m", "rate_avg"];
const TEMPERATURE_KEYS: &[&str] = &["temp_max", "temp2", "temp"];

const POOL_URL_KEYS: &[&str] = &["URL", "Stratum URL", "Stratum", "StratumURL"];
const POOL_USER_KEYS: &[&str] = &["User", "Worker", "UserName", "Username"];
const POOL_STATUS_KEYS: &[&str] = &["Status", "Stratum Status", "StratumActive"];
const POOL_PRIORITY_KEYS: &[&str] = &["Priority", "PRIORITY"];
const POOL_ACTIVE_KEYS: &[&str] = &["Stratum Active", "StratumActive"];

/// `VERSION` keys naming the miner software, checked in this order
const VENDOR_KEYS: &[(&str, FirmwareVendor)] = &[
    ("CGMiner", FirmwareVendor::Cgminer),
    ("BMMiner", FirmwareVendor::Bmminer),
];

/// Upper bound on per-chain index scans
const MAX_CHAIN_INDEX: u32 = 127;

/// Families of index-suffixed stats fields (`temp2_1`, `chain_rate3`, `fan2`, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum IndexedField {
    ChainTemp,
    ChainInlet,
    ChainOutlet,
    ChainRate,
    ChainAsics,
    ChainHw,
    ChainAvgRate,
    ChainAvgRateUpper,
    Fan,
}

const INDEXED_PREFIXES: &[(&str, IndexedField)] = &[
    ("temp2_", IndexedField::ChainTemp),
    ("temp_in_chip_", IndexedField::ChainInlet),
    ("temp_out_chip_", IndexedField::ChainOutlet),
    ("chain_rate", IndexedField::ChainRate),
    ("chain_acn", IndexedField::ChainAsics),
    ("chain_hw", IndexedField::ChainHw),
    ("chain_avg_hashrate", IndexedField::ChainAvgRate),
    ("CHAIN AVG HASHRATE", IndexedField::ChainAvgRateUpper),
    ("fan", IndexedField::Fan),
];

/// Split a key into its field family and numeric index.
///
/// The remainder after the prefix must be all digits, so look-alike keys such
/// as `chain_rateideal1` or `fan_num` are not mistaken for indexed fields.
/// Zero-padded indices (`fan01`) are not indexed fields either; they would
/// otherwise collide with the unpadded key.
fn classify(key: &str) -> Option<(IndexedField, u32)> {
    INDEXED_PREFIXES.iter().find_map(|(prefix, field)| {
        let rest = key.strip_prefix(prefix)?;
        if rest.is_empty() || !rest.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if rest.len() > 1 && rest.starts_with('0') {
            return None;
        }
        rest.parse().ok().map(|index| (*field, index))
    })
}

/// Stats block fields grouped by family and index in one pass over the keys
struct IndexedFields<'a> {
    by_field: BTreeMap<IndexedField, BTreeMap<u32, &'a Value>>,
}

impl<'a> IndexedFields<'a> {
    fn scan(block: &'a Block) -> Self {
        let mut by_field: BTreeMap<IndexedField, BTreeMap<u32, &'a Value>> = BTreeMap::new();
        for (key, value) in block {
            if let Some((field, index)) = classify(key) {
                by_field.entry(field).or_default().insert(index, value);
            }
        }
        Self { by_field }
    }

    fn get(&self, field: IndexedField, index: u32) -> Option<&'a Value> {
        self.by_field.get(&field)?.get(&index).copied()
    }

    fn iter(&self, field: IndexedField) -> impl Iterator<Item = (u32, &'a Value)> + '_ {
        self.by_field
            .get(&field)
            .into_iter()
            .flat_map(|m| m.iter().map(|(i, v)| (*i, *v)))
    }

    /// Walk indices from 1 upward.
    ///
    /// A missing index 1 is skipped; any later gap ends the scan.
    fn contiguous<T>(&self, lookup: impl Fn(u32) -> Option<&'a Value>, coerce: impl Fn(&Value) -> Option<T>) -> Vec<T> {
        let mut out = Vec::new();
        for index in 1..=MAX_CHAIN_INDEX {
            match lookup(index) {
                Some(value) => {
                    if let Some(v) = coerce(value) {
                        out.push(v);
                    }
                }
                None if index > 1 => break,
                None => continue,
            }
        }
        out
    }
}

/// Parse a firmware version string of varying length into major.minor.patch.
///
/// Two parts get a `.0` patch, longer strings are cut to three parts and a
/// single part becomes `N.0.0`. Each part contributes its leading digits.
pub fn parse_version_number(raw: &str) -> Option<Version> {
    let parts: Vec<&str> = raw.trim().split('.').collect();
    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(parts.iter().take(3)) {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        *slot = digits.parse().ok()?;
    }
    Some(Version::new(numbers[0], numbers[1], numbers[2]))
}

fn first_block<'a>(response: &'a Value, name: &str) -> Option<&'a Block> {
    result_array(response, name).first().and_then(Value::as_object)
}

/// Extract model, API version and miner software from a `version` reply
pub fn extract_version(response: &Value) -> VersionInfo {
    let Some(block) = first_block(response, "VERSION") else {
        return VersionInfo::default();
    };

    let model = block.get("Type").and_then(to_text);
    let api = block
        .get("API")
        .and_then(to_display)
        .and_then(|v| parse_version_number(&v));

    let firmware = VENDOR_KEYS
        .iter()
        .find_map(|(key, vendor)| {
            block.get(*key).map(|v| FirmwareInfo {
                vendor: *vendor,
                version: to_display(v).and_then(|s| parse_version_number(&s)),
            })
        })
        .unwrap_or_default();

    VersionInfo { model, api, firmware }
}

/// Pick the metrics block out of a `stats` reply.
///
/// Index 0 usually describes the device and index 1 carries the metrics; a
/// single-block reply is used as-is and anything unusable yields an empty block.
pub fn select_stats_block(stats: &RawResponse) -> Block {
    let Some(response) = stats.as_structured() else {
        trace!("stats reply is not structured, no usable fields");
        return Block::new();
    };
    let blocks = result_array(response, "STATS");
    blocks
        .get(1)
        .or_else(|| blocks.first())
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Metrics read from the stats block
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsReading {
    pub hashrate_5s: Option<f64>,
    pub hashrate_avg: Option<f64>,
    pub total_rate_ideal: Option<f64>,
    pub temperature: Option<f64>,
    pub temp_max: Option<i64>,
    pub miner_count: Option<i64>,
    pub frequency: Option<i64>,
    pub fan_num: Option<i64>,
    pub fans: Vec<i64>,
    pub chains: BTreeMap<String, ChainStats>,
    pub chain_hw: Vec<i64>,
    pub chain_avg_hashrate: Vec<String>,
}

/// Read every stats metric from one block
pub fn extract_stats_block(block: &Block) -> StatsReading {
    let indexed = IndexedFields::scan(block);

    let fan_num = first_i64(block, &["fan_num"]);
    let fans = match fan_num {
        Some(count) if count > 0 => indexed
            .iter(IndexedField::Fan)
            .filter(|(i, _)| (1..=count).contains(&i64::from(*i)))
            .filter_map(|(_, v)| to_i64(v))
            .collect(),
        _ => Vec::new(),
    };

    let chain_hw = indexed.contiguous(|i| indexed.get(IndexedField::ChainHw, i), to_i64);
    let chain_avg_hashrate = indexed.contiguous(
        |i| {
            indexed
                .get(IndexedField::ChainAvgRate, i)
                .or_else(|| indexed.get(IndexedField::ChainAvgRateUpper, i))
        },
        to_display,
    );

    StatsReading {
        hashrate_5s: first_f64(block, HASHRATE_5S_KEYS),
        hashrate_avg: first_f64(block, HASHRATE_AVG_KEYS),
        total_rate_ideal: first_f64(block, &["total_rateideal"]),
        temperature: first_f64(block, TEMPERATURE_KEYS),
        temp_max: first_i64(block, &["temp_max"]),
        miner_count: first_i64(block, &["miner_count"]),
        frequency: first_i64(block, &["frequency"]),
        fan_num,
        fans,
        chains: group_chains(&indexed),
        chain_hw,
        chain_avg_hashrate,
    }
}

/// Read every stats metric from a `stats` reply of either shape
pub fn extract_stats(stats: &RawResponse) -> StatsReading {
    extract_stats_block(&select_stats_block(stats))
}

fn group_chains(indexed: &IndexedFields<'_>) -> BTreeMap<String, ChainStats> {
    let mut chains: BTreeMap<u32, ChainStats> = BTreeMap::new();
    for field in [
        IndexedField::ChainTemp,
        IndexedField::ChainInlet,
        IndexedField::ChainOutlet,
        IndexedField::ChainRate,
        IndexedField::ChainAsics,
    ] {
        for (index, value) in indexed.iter(field) {
            let chain = chains.entry(index).or_default();
            match field {
                IndexedField::ChainTemp => chain.temperature = to_i64(value),
                IndexedField::ChainInlet => chain.inlet = to_f64(value),
                IndexedField::ChainOutlet => chain.outlet = to_f64(value),
                IndexedField::ChainRate => chain.hashrate = to_f64(value),
                IndexedField::ChainAsics => chain.asic_count = to_i64(value),
                _ => {}
            }
        }
    }
    chains
        .into_iter()
        .map(|(index, chain)| (index.to_string(), chain))
        .collect()
}

/// Normalize one `POOLS` entry
pub fn extract_pool(block: &Block) -> PoolInfo {
    PoolInfo {
        url: first_text(block, POOL_URL_KEYS),
        worker_name: first_text(block, POOL_USER_KEYS),
        status: first_text(block, POOL_STATUS_KEYS),
        priority: first_i64(block, POOL_PRIORITY_KEYS),
        stratum_active: first_present(block, POOL_ACTIVE_KEYS, to_bool),
        quota: first_i64(block, &["Quota"]),
        accepted: first_i64(block, &["Accepted"]),
        rejected: first_i64(block, &["Rejected"]),
        raw: block.clone(),
    }
}

/// Normalize every entry of a `pools` reply; non-object entries are skipped
pub fn extract_pools(response: &Value) -> Vec<PoolInfo> {
    result_array(response, "POOLS")
        .iter()
        .filter_map(Value::as_object)
        .map(extract_pool)
        .collect()
}

/// Assemble the canonical record for an endpoint that answered
pub fn build_record(
    endpoint: &MinerEndpoint,
    version: VersionInfo,
    stats: &RawResponse,
    pools: Vec<PoolInfo>,
) -> NormalizedRecord {
    let reading = extract_stats(stats);
    let first_pool = pools.first();

    NormalizedRecord {
        collected_at: Utc::now(),
        host: endpoint.host,
        port: endpoint.port,
        mac: endpoint.link_address.clone(),
        online: true,
        model: version.model,
        api_version: version.api,
        firmware: Some(version.firmware),
        hashrate_5s: reading.hashrate_5s,
        hashrate_avg: reading.hashrate_avg,
        total_rate_ideal: reading.total_rate_ideal,
        temperature: reading.temperature,
        temp_max: reading.temp_max,
        miner_count: reading.miner_count,
        frequency: reading.frequency,
        fan_num: reading.fan_num,
        fans: reading.fans,
        chains: reading.chains,
        chain_hw: reading.chain_hw,
        chain_avg_hashrate: reading.chain_avg_hashrate,
        pool: first_pool.and_then(|p| p.url.clone()),
        worker_name: first_pool.and_then(|p| p.worker_name.clone()),
        pools,
    }
}
