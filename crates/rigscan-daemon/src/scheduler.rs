//! Periodic scan loop

use anyhow::Result;
use rigscan_core::{FanoutSink, Sink};
use rigscan_discovery::{ScanReport, Scanner};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Scan once and hand the records to the sinks
pub async fn run_cycle(scanner: &Scanner, sinks: &FanoutSink) -> ScanReport {
    let report = scanner.scan().await;
    if !report.records.is_empty() {
        sinks.store_batch(report.records.clone()).await;
    }
    debug!(
        records = report.records.len(),
        offline = report.offline_count(),
        sinks = sinks.len(),
        "Cycle delivered"
    );
    report
}

/// Run scan cycles until Ctrl-C.
///
/// The first cycle starts immediately. A cycle that overruns the interval
/// delays the next one rather than triggering a burst of catch-up scans.
pub async fn run(scanner: Scanner, sinks: FanoutSink, period: Duration) -> Result<()> {
    let mut ticker = interval(period.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        range = %scanner.range(),
        interval_secs = period.as_secs(),
        "Scheduler started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_cycle(&scanner, &sinks).await;
            }
            result = &mut shutdown => {
                result?;
                info!("Shutdown requested, stopping scheduler");
                return Ok(());
            }
        }
    }
}
