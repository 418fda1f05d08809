//! Exchange WebSocket ingestor (SPEC_FULL.md §4.6).
//!
//! Connects, reads until the socket closes or a fatal transport error occurs, and reconnects
//! with capped exponential backoff (SPEC_FULL.md §9 "Open Question resolutions" -- reconnect
//! policy). A 30-second read timeout is *not* fatal: it triggers a keepalive ping on the same
//! connection, matching `services/ingestor.py`'s `_connect_and_stream`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::hub::Hub;
use crate::model::{RawFeedMessage, Trade};
use crate::tradelog::{produce_json, TradeLog, TOPIC_TRADES};

const READ_TIMEOUT: Duration = Duration::from_secs(30);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
pub struct IngestorCounters {
    pub running: AtomicBool,
    pub messages_processed: AtomicU64,
    pub parse_errors: AtomicU64,
    pub reconnect_count: AtomicU64,
}

pub struct Ingestor {
    feed_url: String,
    log: Arc<dyn TradeLog>,
    hub: Arc<Hub>,
    pub counters: Arc<IngestorCounters>,
}

impl Ingestor {
    pub fn new(feed_url: String, log: Arc<dyn TradeLog>, hub: Arc<Hub>) -> Self {
        Self {
            feed_url,
            log,
            hub,
            counters: Arc::new(IngestorCounters::default()),
        }
    }

    /// Runs the connect/stream/reconnect loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        self.counters.running.store(true, Ordering::Relaxed);
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.stream_once(&cancel).await {
                Ok(()) => {
                    // Cancelled mid-stream, or the exchange closed the socket cleanly.
                    backoff = INITIAL_BACKOFF;
                    if cancel.is_cancelled() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, backoff_secs = backoff.as_secs(), "feed connection lost, retrying");
                    self.counters.reconnect_count.fetch_add(1, Ordering::Relaxed);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }

        self.counters.running.store(false, Ordering::Relaxed);
        info!("ingestor stopped");
    }

    async fn stream_once(&self, cancel: &CancellationToken) -> Result<()> {
        let (socket, _response) = tokio_tungstenite::connect_async(&self.feed_url)
            .await
            .map_err(|e| PipelineError::Transport(format!("connect failed: {e}")))?;
        info!(url = %self.feed_url, "connected to feed");
        let (mut write, mut read) = socket.split();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                msg = timeout(READ_TIMEOUT, read.next()) => msg,
            };

            let message = match next {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => return Err(PipelineError::Transport(format!("socket error: {e}"))),
                Ok(None) => return Err(PipelineError::Transport("socket closed by peer".to_string())),
                Err(_elapsed) => {
                    // Quiet period, not a failure: probe with a keepalive ping and keep streaming.
                    warn!(timeout_secs = READ_TIMEOUT.as_secs(), "no message within read timeout, sending keepalive ping");
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .map_err(|e| PipelineError::Transport(format!("keepalive ping failed: {e}")))?;
                    continue;
                }
            };

            match message {
                Message::Text(text) => self.handle_payload(text.as_bytes()).await,
                Message::Binary(bytes) => self.handle_payload(&bytes).await,
                Message::Ping(_) | Message::Pong(_) => {}
                Message::Close(_) => return Err(PipelineError::Transport("peer sent close frame".to_string())),
                Message::Frame(_) => {}
            }
        }
    }

    async fn handle_payload(&self, bytes: &[u8]) {
        let raw: RawFeedMessage = match serde_json::from_slice(bytes) {
            Ok(raw) => raw,
            Err(e) => {
                self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "failed to parse feed message");
                return;
            }
        };

        let trade = match Trade::from_feed_message(&raw) {
            Ok(trade) => trade,
            Err(e) => {
                self.counters.parse_errors.fetch_add(1, Ordering::Relaxed);
                let err: PipelineError = e.into();
                warn!(error = %err, "rejected malformed trade");
                return;
            }
        };

        self.counters.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.hub.broadcast_trade(&trade);

        if let Err(e) = produce_json(self.log.as_ref(), TOPIC_TRADES, &trade.symbol, &trade).await {
            warn!(error = %e, "failed to publish trade to the log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tradelog::InMemoryLog;

    #[tokio::test]
    async fn handle_payload_rejects_malformed_json() {
        let log = InMemoryLog::new(8, 8);
        let hub = Hub::new(8);
        let ingestor = Ingestor::new("wss://example.test/ws".into(), log, hub);
        ingestor.handle_payload(b"not json").await;
        assert_eq!(ingestor.counters.parse_errors.load(Ordering::Relaxed), 1);
        assert_eq!(ingestor.counters.messages_processed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn handle_payload_accepts_well_formed_trade() {
        let log = InMemoryLog::new(8, 8);
        let hub = Hub::new(8);
        let ingestor = Ingestor::new("wss://example.test/ws".into(), log, hub);
        let payload = br#"{"s":"BTCUSDT","p":"67000.50","q":"0.01","T":1703683200000}"#;
        ingestor.handle_payload(payload).await;
        assert_eq!(ingestor.counters.messages_processed.load(Ordering::Relaxed), 1);
        assert_eq!(ingestor.counters.parse_errors.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn handle_payload_rejects_non_positive_price() {
        let log = InMemoryLog::new(8, 8);
        let hub = Hub::new(8);
        let ingestor = Ingestor::new("wss://example.test/ws".into(), log, hub);
        let payload = br#"{"s":"BTCUSDT","p":"0","q":"0.01","T":1703683200000}"#;
        ingestor.handle_payload(payload).await;
        assert_eq!(ingestor.counters.parse_errors.load(Ordering::Relaxed), 1);
    }
}
