//! Durable trade/alert log contract (SPEC_FULL.md §4.7, §6).
//!
//! The concrete transport (a managed, partitioned, at-least-once log) is an external
//! collaborator and out of scope for this crate; what's in scope is the *contract* the rest of
//! the pipeline is built against, so the ingestor and analyzer can be wired and driven without a
//! live cluster. `InMemoryLog` is a bounded, per-topic, per-partition-key-ordered stand-in that
//! satisfies that contract with plain Tokio channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{mpsc, Mutex};

use crate::error::{PipelineError, Result};

pub const TOPIC_TRADES: &str = "trades";
pub const TOPIC_ALERTS: &str = "alerts";

/// A single record as it travels through the log: a partition key plus the serialized payload.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub key: String,
    pub value: Vec<u8>,
}

/// The trade/alert log contract. Implementors need only guarantee that records sharing a key are
/// delivered to a given subscriber in production order (SPEC_FULL.md §5 "Ordering guarantees");
/// cross-key ordering is unspecified, and delivery is at-least-once.
#[async_trait::async_trait]
pub trait TradeLog: Send + Sync {
    async fn produce(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<()>;

    /// Polls the named topic for the next record, waiting up to `timeout`. Returns `None` on
    /// timeout; a transient poll error is returned as `Err` and must not be treated as fatal by
    /// the caller (SPEC_FULL.md §7: "sustained failures do not crash the supervisor").
    async fn poll(&self, topic: &str, timeout: Duration) -> Result<Option<LogRecord>>;

    /// Count of records dropped because `topic`'s bounded queue was full at produce time
    /// (SPEC_FULL.md §4.7: "drop the newest and record a drop counter"). Zero for an unknown topic.
    fn dropped_count(&self, topic: &str) -> u64;
}

/// Serializes `value` with the deterministic JSON field names fixed by SPEC_FULL.md §6 and
/// produces it to `topic` keyed by `key`.
pub async fn produce_json<T: Serialize + Sync>(
    log: &dyn TradeLog,
    topic: &str,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)
        .map_err(|e| PipelineError::Log(format!("serialize failed: {e}")))?;
    log.produce(topic, key, bytes).await
}

pub fn decode_json<T: DeserializeOwned>(record: &LogRecord) -> Result<T> {
    serde_json::from_slice(&record.value).map_err(|e| PipelineError::Log(format!("decode failed: {e}")))
}

struct Topic {
    sender: mpsc::Sender<LogRecord>,
    receiver: Mutex<mpsc::Receiver<LogRecord>>,
    dropped: AtomicU64,
}

/// In-process, bounded-channel stand-in for a durable log. One `(sender, receiver)` pair per
/// topic; `subscribe`/`poll` here collapse into a single shared receiver per topic, which is
/// sufficient for the single-consumer-group-per-topic shape this pipeline uses (one analyzer).
pub struct InMemoryLog {
    topics: HashMap<&'static str, Topic>,
}

impl InMemoryLog {
    /// `trade_capacity`/`alert_capacity` size the `trades`/`alerts` topics independently, matching
    /// the distinct queue-depth defaults in SPEC_FULL.md §6 (1000 and 10 respectively).
    pub fn new(trade_capacity: usize, alert_capacity: usize) -> Arc<Self> {
        let mut topics = HashMap::new();
        for (name, capacity) in [(TOPIC_TRADES, trade_capacity), (TOPIC_ALERTS, alert_capacity)] {
            let (sender, receiver) = mpsc::channel(capacity);
            topics.insert(
                name,
                Topic {
                    sender,
                    receiver: Mutex::new(receiver),
                    dropped: AtomicU64::new(0),
                },
            );
        }
        Arc::new(Self { topics })
    }
}

#[async_trait::async_trait]
impl TradeLog for InMemoryLog {
    async fn produce(&self, topic: &str, key: &str, value: Vec<u8>) -> Result<()> {
        let entry = self
            .topics
            .get(topic)
            .ok_or_else(|| PipelineError::Log(format!("unknown topic {topic}")))?;
        // Bounded-channel backpressure here mirrors load shedding at the log boundary: a full
        // channel means the consumer (analyzer) has fallen behind, so we drop rather than block.
        match entry.sender.try_send(LogRecord {
            key: key.to_string(),
            value,
        }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                entry.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(PipelineError::Log(format!("topic {topic} closed")))
            }
        }
    }

    async fn poll(&self, topic: &str, timeout: Duration) -> Result<Option<LogRecord>> {
        let entry = self
            .topics
            .get(topic)
            .ok_or_else(|| PipelineError::Log(format!("unknown topic {topic}")))?;
        let mut receiver = entry.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(record)) => Ok(Some(record)),
            Ok(None) => Err(PipelineError::Log(format!("topic {topic} closed"))),
            Err(_elapsed) => Ok(None),
        }
    }

    fn dropped_count(&self, topic: &str) -> u64 {
        self.topics
            .get(topic)
            .map(|t| t.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Trade;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn produce_then_poll_round_trips_in_order() {
        let log = InMemoryLog::new(16, 16);
        let trade = Trade {
            symbol: "BTCUSDT".into(),
            price: Decimal::new(50000, 0),
            volume: Decimal::new(1, 0),
            time: 1,
        };
        produce_json(log.as_ref(), TOPIC_TRADES, &trade.symbol, &trade)
            .await
            .unwrap();

        let record = log
            .poll(TOPIC_TRADES, Duration::from_millis(100))
            .await
            .unwrap()
            .expect("record should be present");
        let decoded: Trade = decode_json(&record).unwrap();
        assert_eq!(decoded, trade);
    }

    #[tokio::test]
    async fn poll_times_out_on_empty_topic() {
        let log = InMemoryLog::new(16, 16);
        let result = log.poll(TOPIC_TRADES, Duration::from_millis(10)).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn same_key_records_are_delivered_in_produced_order() {
        let log = InMemoryLog::new(16, 16);
        for i in 0..5 {
            log.produce(TOPIC_TRADES, "BTCUSDT", vec![i]).await.unwrap();
        }
        for expected in 0..5u8 {
            let record = log
                .poll(TOPIC_TRADES, Duration::from_millis(100))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(record.value, vec![expected]);
        }
    }

    #[tokio::test]
    async fn overflow_drops_newest_and_counts_it() {
        let log = InMemoryLog::new(1, 16);
        log.produce(TOPIC_TRADES, "BTCUSDT", vec![1]).await.unwrap();
        // The one slot is full; this produce is dropped rather than blocking.
        log.produce(TOPIC_TRADES, "BTCUSDT", vec![2]).await.unwrap();
        assert_eq!(log.dropped_count(TOPIC_TRADES), 1);
        assert_eq!(log.dropped_count(TOPIC_ALERTS), 0);

        let record = log
            .poll(TOPIC_TRADES, Duration::from_millis(100))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.value, vec![1]);
    }
}
