//! rigscan Core - Core types and telemetry normalization
//!
//! This crate provides the foundational types for the rigscan system:
//! - Miner endpoints discovered on the local network
//! - The canonical telemetry record and its sub-records
//! - Alias-tolerant normalization of cgminer/bmminer replies
//! - Hashrate display units per model family
//! - The sink interface records are delivered to

pub mod device;
pub mod fields;
pub mod normalize;
pub mod record;
pub mod response;
pub mod sink;
pub mod units;

pub use device::{MinerEndpoint, DEFAULT_API_PORT};
pub use normalize::{build_record, extract_pools, extract_stats, extract_version};
pub use record::{
    ChainStats, FirmwareInfo, FirmwareVendor, NormalizedRecord, PoolInfo, VersionInfo,
};
pub use response::RawResponse;
pub use sink::{FanoutSink, Sink};
pub use units::{convert_hashrate, format_hashrate, HashrateUnit};
