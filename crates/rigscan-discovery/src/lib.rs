//! rigscan Discovery - Finding miners on the local network
//!
//! A scan cycle sweeps an address range for hosts with the management port
//! open, optionally looks up each host's MAC address, then queries every
//! miner found and normalizes its replies into one record per endpoint.

pub mod arp;
pub mod collector;
pub mod probe;
pub mod range;
pub mod scanner;

pub use arp::{ArpTableResolver, MacResolver};
pub use collector::{collect_endpoint, Collector, DEFAULT_QUERY_CONCURRENCY};
pub use probe::{is_port_open, ProbeConfig, Prober, DEFAULT_MAX_PROBES, DEFAULT_PROBE_TIMEOUT_MS};
pub use range::{local_range, AddressRange, RangeError};
pub use scanner::{ScanReport, Scanner, ScannerConfig};
