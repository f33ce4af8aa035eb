//! Usage accounting.
//!
//! After a successful dispatch the gateway emits one [`UsageRecord`]
//! through a [`UsageSink`]. Emission is fire-and-forget from the request's
//! point of view: a slow or failing sink must never delay or fail a
//! response, so the channel sink sheds records when its buffer is full
//! rather than applying backpressure.

use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::types::UsageRecord;

/// Receives usage records after settlement. Implementations must be cheap
/// to call; anything slow belongs behind a buffer.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Accept one record. Must not block the caller for long.
    async fn record(&self, record: UsageRecord);
}

/// Emits each record as a structured info log line.
pub struct TracingUsageSink;

#[async_trait]
impl UsageSink for TracingUsageSink {
    async fn record(&self, record: UsageRecord) {
        info!(
            subscription = %record.subscription_id,
            model = %record.model_id,
            tokens_in = record.tokens_in,
            tokens_out = record.tokens_out,
            cost_micro = record.cost_micro,
            "usage recorded"
        );
    }
}

/// Buffers records in memory. For tests and single-node introspection.
#[derive(Default)]
pub struct MemoryUsageSink {
    records: Mutex<Vec<UsageRecord>>,
}

impl MemoryUsageSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UsageSink for MemoryUsageSink {
    async fn record(&self, record: UsageRecord) {
        if let Ok(mut guard) = self.records.lock() {
            guard.push(record);
        }
    }
}

/// Forwards records into a bounded channel consumed by a background
/// writer. `try_send` so a stalled consumer sheds records instead of
/// stalling requests; sheds are counted in the log.
pub struct ChannelUsageSink {
    tx: mpsc::Sender<UsageRecord>,
}

impl ChannelUsageSink {
    /// Build a sink and the receiving end for the background consumer.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<UsageRecord>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl UsageSink for ChannelUsageSink {
    async fn record(&self, record: UsageRecord) {
        if let Err(e) = self.tx.try_send(record) {
            warn!(error = %e, "usage record shed: channel full or closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModelId, SubscriptionId};
    use chrono::Utc;

    fn record(model: &str) -> UsageRecord {
        UsageRecord {
            subscription_id: SubscriptionId::new("sub-1"),
            model_id: ModelId::new(model),
            tokens_in: 100,
            tokens_out: 50,
            cost_micro: 300,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_accumulates_records() {
        let sink = MemoryUsageSink::new();
        sink.record(record("a")).await;
        sink.record(record("b")).await;

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].model_id, ModelId::new("b"));
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_to_consumer() {
        let (sink, mut rx) = ChannelUsageSink::new(8);
        sink.record(record("a")).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received.model_id, ModelId::new("a"));
    }

    #[tokio::test]
    async fn test_channel_sink_sheds_when_full() {
        let (sink, mut rx) = ChannelUsageSink::new(1);
        sink.record(record("kept")).await;
        sink.record(record("shed")).await; // buffer full, dropped

        assert_eq!(rx.recv().await.unwrap().model_id, ModelId::new("kept"));
        assert!(rx.try_recv().is_err());
    }
}
