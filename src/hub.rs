//! The pipeline's bounded queues and the subscriber registry/fan-out point (SPEC_FULL.md §4.7).
//!
//! Subscribers are tracked in a concurrent map keyed by id, each with its own bounded JSON and
//! binary (audio) mailbox, so a broadcast never blocks on one slow subscriber -- a full or
//! closed mailbox just gets evicted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::model::{AlertEvent, AnalysisEvent, Trade};

/// Outbound message shapes pushed to subscribers over the transport (SPEC_FULL.md §6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SubscriberMessage {
    Trade {
        data: TradePayload,
    },
    Alert {
        data: AlertPayload,
    },
    Analysis {
        data: AnalysisPayload,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TradePayload {
    pub symbol: String,
    pub price: f64,
    pub volume: f64,
    pub time: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertPayload {
    pub symbol: String,
    pub price: f64,
    #[serde(rename = "triggerType")]
    pub trigger_type: &'static str,
    #[serde(rename = "triggerValue")]
    pub trigger_value: f64,
    pub message: String,
    pub time: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisPayload {
    pub symbol: String,
    pub text: String,
    pub time: i64,
}

impl From<&Trade> for TradePayload {
    fn from(trade: &Trade) -> Self {
        TradePayload {
            symbol: trade.symbol.clone(),
            price: trade.price_f64(),
            volume: trade.volume_f64(),
            time: trade.time,
        }
    }
}

impl From<&AlertEvent> for AlertPayload {
    fn from(alert: &AlertEvent) -> Self {
        AlertPayload {
            symbol: alert.symbol.clone(),
            price: alert.price,
            trigger_type: alert.trigger_type.as_str(),
            trigger_value: alert.trigger_value,
            message: alert.message.clone(),
            time: alert.time,
        }
    }
}

impl From<&AnalysisEvent> for AnalysisPayload {
    fn from(analysis: &AnalysisEvent) -> Self {
        AnalysisPayload {
            symbol: analysis.symbol.clone(),
            text: analysis.text.clone(),
            time: analysis.time,
        }
    }
}

/// One attached subscriber's outbound mailbox. `json` carries the three `SubscriberMessage`
/// shapes; `binary` carries synthesized audio frames. Both are bounded: a slow subscriber must
/// never stall the broadcaster (SPEC_FULL.md §5).
struct Subscriber {
    json: mpsc::Sender<SubscriberMessage>,
    binary: mpsc::Sender<Vec<u8>>,
}

/// Counters surfaced on the health endpoint (SPEC_FULL.md §6, §7). The bounded trades/alerts
/// queue drop counters live on the log (`TradeLog::dropped_count`) since that's where those two
/// channels are actually bounded; this struct only counts subscriber-broadcast evictions.
#[derive(Debug, Default)]
pub struct HubCounters {
    pub subscribers_evicted: AtomicU64,
}

/// The subscriber registry: attach/detach and JSON/binary fan-out
/// (SPEC_FULL.md §4.7: "drop the newest and record a drop counter").
pub struct Hub {
    subscribers: DashMap<u64, Subscriber>,
    next_subscriber_id: AtomicU64,
    pub counters: HubCounters,
    subscriber_buffer_size: usize,
}

impl Hub {
    pub fn new(subscriber_buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: DashMap::new(),
            next_subscriber_id: AtomicU64::new(1),
            counters: HubCounters::default(),
            subscriber_buffer_size,
        })
    }

    /// True when at least one subscriber is attached -- the audience gate the analyzer consults
    /// before paying for an LLM/TTS round trip (SPEC_FULL.md §4.5, §9 "Audience gate").
    pub fn has_subscribers(&self) -> bool {
        !self.subscribers.is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Registers a new subscriber and returns its id plus the two receivers the transport layer
    /// should forward onto the wire (JSON text frames, binary audio frames).
    pub fn attach(&self) -> (u64, mpsc::Receiver<SubscriberMessage>, mpsc::Receiver<Vec<u8>>) {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (json_tx, json_rx) = mpsc::channel(self.subscriber_buffer_size);
        let (bin_tx, bin_rx) = mpsc::channel(self.subscriber_buffer_size);
        self.subscribers.insert(
            id,
            Subscriber {
                json: json_tx,
                binary: bin_tx,
            },
        );
        (id, json_rx, bin_rx)
    }

    pub fn detach(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    /// Broadcasts a JSON message shape to every subscriber, evicting any whose mailbox is full
    /// or whose receiver has hung up (SPEC_FULL.md §4.7, §5: "never block on a single slow
    /// subscriber").
    pub fn broadcast_json(&self, message: SubscriberMessage) {
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().json.try_send(message.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        self.evict(dead);
    }

    pub fn broadcast_binary(&self, bytes: Vec<u8>) {
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().binary.try_send(bytes.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        self.evict(dead);
    }

    fn evict(&self, ids: Vec<u64>) {
        for id in ids {
            self.subscribers.remove(&id);
            self.counters.subscribers_evicted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn broadcast_trade(&self, trade: &Trade) {
        self.broadcast_json(SubscriberMessage::Trade {
            data: trade.into(),
        });
    }

    pub fn broadcast_alert(&self, alert: &AlertEvent) {
        self.broadcast_json(SubscriberMessage::Alert { data: alert.into() });
    }

    pub fn broadcast_analysis(&self, analysis: &AnalysisEvent) {
        self.broadcast_json(SubscriberMessage::Analysis {
            data: analysis.into(),
        });
    }
}
