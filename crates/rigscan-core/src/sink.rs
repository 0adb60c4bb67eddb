//! Destination interface for normalized records

use async_trait::async_trait;
use std::sync::Arc;

use crate::record::NormalizedRecord;

/// Receives finished records.
///
/// Implementations own their failures: persistence or transport errors are
/// logged and swallowed inside the sink, never returned to the scanner.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn store(&self, record: NormalizedRecord);

    /// Store one scan cycle's records. Sinks that batch override this.
    async fn store_batch(&self, records: Vec<NormalizedRecord>) {
        for record in records {
            self.store(record).await;
        }
    }
}

/// Sends every record to each configured sink in turn
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn Sink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn Sink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }
}

#[async_trait]
impl Sink for FanoutSink {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn store(&self, record: NormalizedRecord) {
        for sink in &self.sinks {
            sink.store(record.clone()).await;
        }
    }

    async fn store_batch(&self, records: Vec<NormalizedRecord>) {
        for sink in &self.sinks {
            sink.store_batch(records.clone()).await;
        }
    }
}
