//! Scan cycle: probe a range, then query every miner found

use chrono::{DateTime, Utc};
use rigscan_cgminer::ClientConfig;
use rigscan_core::NormalizedRecord;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::arp::MacResolver;
use crate::collector::{Collector, DEFAULT_QUERY_CONCURRENCY};
use crate::probe::{ProbeConfig, Prober};
use crate::range::AddressRange;

/// Scanner configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub range: AddressRange,
    pub probe: ProbeConfig,
    pub client: ClientConfig,
    /// Miners queried at once
    pub query_concurrency: usize,
}

impl ScannerConfig {
    pub fn new(range: AddressRange) -> Self {
        Self {
            range,
            probe: ProbeConfig::default(),
            client: ClientConfig::default(),
            query_concurrency: DEFAULT_QUERY_CONCURRENCY,
        }
    }
}

/// Outcome of one scan cycle
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub range: AddressRange,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// Sorted by host, then port
    pub records: Vec<NormalizedRecord>,
}

impl ScanReport {
    pub fn online_count(&self) -> usize {
        self.records.iter().filter(|r| r.online).count()
    }

    pub fn offline_count(&self) -> usize {
        self.records.len() - self.online_count()
    }
}

pub struct Scanner {
    range: AddressRange,
    prober: Prober,
    collector: Collector,
}

impl Scanner {
    pub fn new(config: ScannerConfig, resolver: Option<Arc<dyn MacResolver>>) -> Self {
        let mut prober = Prober::new(config.probe);
        if let Some(resolver) = resolver {
            prober = prober.with_resolver(resolver);
        }
        Self {
            range: config.range,
            prober,
            collector: Collector::new(config.client, config.query_concurrency),
        }
    }

    pub fn range(&self) -> &AddressRange {
        &self.range
    }

    /// Run one full cycle
    pub async fn scan(&self) -> ScanReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        info!(range = %self.range, "Scan started");

        let endpoints = self.prober.probe(&self.range).await;
        let mut records = self.collector.collect(endpoints).await;
        records.sort_by(|a, b| a.host.cmp(&b.host).then(a.port.cmp(&b.port)));

        let report = ScanReport {
            range: self.range,
            started_at,
            elapsed: clock.elapsed(),
            records,
        };
        info!(
            range = %self.range,
            found = report.records.len(),
            online = report.online_count(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Scan completed"
        );
        report
    }
}
