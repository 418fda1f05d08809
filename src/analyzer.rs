//! The trigger/cooldown evaluator (SPEC_FULL.md §4.5).
//!
//! Consumes trades from the log, drives the four indicators per symbol, turns their outputs
//! into `AlertEvent`s under a per-(symbol,trigger) cooldown, and dispatches LLM/TTS work -- but
//! only when the hub's audience gate says someone is listening.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::Result;
use crate::hub::Hub;
use crate::indicators::{LevelCross, LevelDirection, PriceChangeWindow, RsiBySecond, VolumeSpikeBySecond};
use crate::llm::LlmClient;
use crate::model::{AlertEvent, AnalysisEvent, Trade, TriggerKind};
use crate::tradelog::{decode_json, produce_json, TradeLog, TOPIC_ALERTS, TOPIC_TRADES};
use crate::tts::TtsClient;

/// Per-symbol indicator state. Owned exclusively by the analyzer task -- no locking
/// (SPEC_FULL.md §5, §9 "Per-symbol mutable state").
struct SymbolIndicators {
    last_price: f64,
}

/// Health counters surfaced on `/health` (SPEC_FULL.md §6).
#[derive(Debug, Default)]
pub struct AnalyzerCounters {
    pub trades_processed: AtomicU64,
    pub alerts_triggered: AtomicU64,
    pub alerts_skipped: AtomicU64,
    pub log_poll_errors: AtomicU64,
}

/// Throttles the "skipping AI generation" log line to once every 10 skips, matching
/// `services/analyzer.py`'s `if self.alerts_skipped % 10 == 0`.
const SKIP_LOG_EVERY: u64 = 10;

pub struct Analyzer {
    rsi: RsiBySecond,
    volume: VolumeSpikeBySecond,
    whale: PriceChangeWindow,
    levels: LevelCross,
    symbols: HashMap<String, SymbolIndicators>,
    cooldowns: HashMap<(String, TriggerKind), Instant>,
    cooldown: Duration,
    pub counters: Arc<AnalyzerCounters>,
    log: Arc<dyn TradeLog>,
    hub: Arc<Hub>,
    llm: Arc<dyn LlmClient>,
    tts: Arc<dyn TtsClient>,
    voice_id: String,
}

impl Analyzer {
    pub fn new(
        config: &AppConfig,
        log: Arc<dyn TradeLog>,
        hub: Arc<Hub>,
        llm: Arc<dyn LlmClient>,
        tts: Arc<dyn TtsClient>,
    ) -> Self {
        Self {
            rsi: RsiBySecond::with_thresholds(
                config.rsi.period,
                config.rsi.overbought_threshold,
                config.rsi.oversold_threshold,
            ),
            volume: VolumeSpikeBySecond::new(config.volume.window_size, config.volume.spike_threshold),
            whale: PriceChangeWindow::new(config.whale.window_seconds, config.whale.threshold_percent),
            levels: LevelCross::new(config.levels.clone()),
            symbols: HashMap::new(),
            cooldowns: HashMap::new(),
            cooldown: Duration::from_secs(config.cooldown_seconds),
            counters: Arc::new(AnalyzerCounters::default()),
            log,
            hub,
            llm,
            tts,
            voice_id: config.tts_voice_id.clone(),
        }
    }

    pub fn counters(&self) -> Arc<AnalyzerCounters> {
        self.counters.clone()
    }

    /// Runs the consume-loop until `cancel` fires. Each poll timeout is small so cancellation is
    /// observed promptly (SPEC_FULL.md §5 "Cancellation").
    pub async fn run(&mut self, cancel: tokio_util::sync::CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                poll_result = self.log.poll(TOPIC_TRADES, Duration::from_millis(500)) => {
                    match poll_result {
                        Ok(Some(record)) => {
                            match decode_json::<Trade>(&record) {
                                Ok(trade) => self.process_trade(trade).await,
                                Err(e) => warn!(error = %e, "failed to decode trade record"),
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            self.counters.log_poll_errors.fetch_add(1, Ordering::Relaxed);
                            warn!(error = %e, "trade log poll failed, continuing");
                        }
                    }
                }
            }
        }
    }

    pub async fn process_trade(&mut self, trade: Trade) {
        self.counters.trades_processed.fetch_add(1, Ordering::Relaxed);
        self.symbols
            .entry(trade.symbol.clone())
            .or_insert(SymbolIndicators { last_price: trade.price_f64() })
            .last_price = trade.price_f64();

        let price = trade.price_f64();
        let volume = trade.volume_f64();

        if let Some(rsi) = self.rsi.update(&trade.symbol, price, trade.time) {
            if rsi.overbought {
                self.maybe_fire(
                    &trade,
                    TriggerKind::RsiHigh,
                    rsi.rsi,
                    format!("{} RSI hit {} - extremely overbought!", trade.symbol, rsi.rsi),
                )
                .await;
            } else if rsi.oversold {
                self.maybe_fire(
                    &trade,
                    TriggerKind::RsiLow,
                    rsi.rsi,
                    format!("{} RSI dropped to {} - oversold territory!", trade.symbol, rsi.rsi),
                )
                .await;
            }
        }

        if let Some(vol) = self.volume.update(&trade.symbol, volume, trade.time) {
            if vol.is_spike {
                self.maybe_fire(
                    &trade,
                    TriggerKind::VolumeSpike,
                    vol.multiplier,
                    format!("{} volume spike {:.2}x!", trade.symbol, vol.multiplier),
                )
                .await;
            }
        }

        if let Some(whale) = self.whale.update(&trade.symbol, price, trade.time) {
            let direction = if whale.change_percent > 0.0 { "surged" } else { "dumped" };
            self.maybe_fire(
                &trade,
                TriggerKind::WhaleAlert,
                whale.change_percent,
                format!(
                    "{} {} {}% in {}s!",
                    trade.symbol, direction, whale.change_percent, whale.window_seconds
                ),
            )
            .await;
        }

        if let Some(level) = self.levels.update(&trade.symbol, price) {
            let direction = match level.direction {
                LevelDirection::Up => "UP",
                LevelDirection::Down => "DOWN",
            };
            self.maybe_fire(
                &trade,
                TriggerKind::PsychLevel,
                level.level as f64,
                format!("{} crossed ${} {}!", trade.symbol, level.level, direction),
            )
            .await;
        }
    }

    async fn maybe_fire(&mut self, trade: &Trade, kind: TriggerKind, value: f64, message: String) {
        let key = (trade.symbol.clone(), kind);
        let now = Instant::now();
        if let Some(last) = self.cooldowns.get(&key) {
            if now.duration_since(*last) < self.cooldown {
                return;
            }
        }
        self.cooldowns.insert(key, now);
        self.counters.alerts_triggered.fetch_add(1, Ordering::Relaxed);

        let alert = AlertEvent {
            symbol: trade.symbol.clone(),
            price: trade.price_f64(),
            trigger_type: kind,
            trigger_value: value,
            message: message.clone(),
            time: trade.time,
        };
        info!(symbol = %alert.symbol, trigger = kind.as_str(), %message, "alert fired");

        if let Err(e) = produce_json(self.log.as_ref(), TOPIC_ALERTS, &alert.symbol, &alert).await {
            warn!(error = %e, "failed to publish alert to the log");
        }
        self.hub.broadcast_alert(&alert);

        if !self.hub.has_subscribers() {
            let skipped = self.counters.alerts_skipped.fetch_add(1, Ordering::Relaxed) + 1;
            if skipped % SKIP_LOG_EVERY == 0 {
                info!(total_skipped = skipped, "skipping AI generation, no active subscribers");
            }
            return;
        }

        self.generate_and_speak(alert).await;
    }

    async fn generate_and_speak(&self, alert: AlertEvent) {
        let prompt = format!(
            "Event: {} triggered for {}\nPrice: {:.2}\nTrigger value: {}\nGive a 1-sentence market insight.",
            alert.trigger_type.as_str(),
            alert.symbol,
            alert.price,
            alert.trigger_value
        );

        match self.llm.generate(&prompt, 0.7, 100).await {
            Ok(text) => {
                let analysis = AnalysisEvent {
                    symbol: alert.symbol.clone(),
                    text: text.clone(),
                    time: alert.time,
                };
                self.hub.broadcast_analysis(&analysis);

                match self.tts.synthesize(&text, &self.voice_id).await {
                    Ok(audio) if !audio.is_empty() => self.hub.broadcast_binary(audio),
                    Ok(_) => debug!(symbol = %alert.symbol, "tts produced no audio"),
                    Err(e) => warn!(error = %e, "tts synthesis failed, continuing"),
                }
            }
            Err(e) => warn!(error = %e, "llm generation failed, continuing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueSettings, RsiSettings, VolumeSettings, WhaleSettings};
    use crate::llm::StubLlmClient;
    use crate::tradelog::InMemoryLog;
    use crate::tts::StubTtsClient;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn test_config() -> AppConfig {
        AppConfig {
            feed_url: "wss://example.test/ws".into(),
            tracked_symbols: vec!["BTCUSDT".into()],
            rsi: RsiSettings { period: 2, overbought_threshold: 70.0, oversold_threshold: 30.0 },
            volume: VolumeSettings::default(),
            whale: WhaleSettings::default(),
            levels: vec![69000],
            cooldown_seconds: 300,
            queues: QueueSettings::default(),
            shutdown_grace_seconds: 5,
            llm_api_key: String::new(),
            tts_api_key: String::new(),
            tts_voice_id: "default".into(),
            health_bind_addr: None,
        }
    }

    fn trade(symbol: &str, price: &str, time: i64) -> Trade {
        Trade {
            symbol: symbol.to_string(),
            price: Decimal::from_str(price).unwrap(),
            volume: Decimal::from_str("1.0").unwrap(),
            time,
        }
    }

    /// Scenario F (SPEC_FULL.md §8): two RSI_HIGH detections 10s apart produce one alert.
    #[tokio::test]
    async fn cooldown_suppresses_repeat_alerts() {
        let config = test_config();
        let log = InMemoryLog::new(64, 64);
        let hub = Hub::new(8);
        let llm = Arc::new(StubLlmClient::default());
        let tts = Arc::new(StubTtsClient::default());
        let mut analyzer = Analyzer::new(&config, log, hub, llm.clone(), tts);

        let base = 1_000_000_000_000_i64;
        for (i, price) in ["100", "110", "120"].iter().enumerate() {
            analyzer.process_trade(trade("BTCUSDT", price, base + i as i64 * 1100)).await;
        }
        let first_count = analyzer.counters.alerts_triggered.load(Ordering::Relaxed);
        assert_eq!(first_count, 1);

        // A further overbought-triggering tick only 10s later is still in cooldown.
        analyzer.process_trade(trade("BTCUSDT", "130", base + 10_000)).await;
        assert_eq!(analyzer.counters.alerts_triggered.load(Ordering::Relaxed), first_count);
    }

    #[tokio::test]
    async fn no_subscribers_means_no_llm_call() {
        let config = test_config();
        let log = InMemoryLog::new(64, 64);
        let hub = Hub::new(8);
        let llm = Arc::new(StubLlmClient::default());
        let tts = Arc::new(StubTtsClient::default());
        let mut analyzer = Analyzer::new(&config, log, hub.clone(), llm.clone(), tts);
        assert!(!hub.has_subscribers());

        let base = 1_000_000_000_000_i64;
        for (i, price) in ["100", "110", "120"].iter().enumerate() {
            analyzer.process_trade(trade("BTCUSDT", price, base + i as i64 * 1100)).await;
        }

        assert_eq!(llm.call_count(), 0);
        assert_eq!(analyzer.counters.alerts_skipped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn subscribers_present_triggers_llm_call() {
        let config = test_config();
        let log = InMemoryLog::new(64, 64);
        let hub = Hub::new(8);
        let (_id, _json_rx, _bin_rx) = hub.attach();
        let llm = Arc::new(StubLlmClient::default());
        let tts = Arc::new(StubTtsClient::default());
        let mut analyzer = Analyzer::new(&config, log, hub, llm.clone(), tts);

        let base = 1_000_000_000_000_i64;
        for (i, price) in ["100", "110", "120"].iter().enumerate() {
            analyzer.process_trade(trade("BTCUSDT", price, base + i as i64 * 1100)).await;
        }

        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn level_cross_fires_psych_level_trigger() {
        let config = test_config();
        let log = InMemoryLog::new(64, 64);
        let hub = Hub::new(8);
        let llm = Arc::new(StubLlmClient::default());
        let tts = Arc::new(StubTtsClient::default());
        let mut analyzer = Analyzer::new(&config, log, hub, llm, tts);

        analyzer.process_trade(trade("BTCUSDT", "68000", 0)).await;
        analyzer.process_trade(trade("BTCUSDT", "69005", 1)).await;
        assert_eq!(analyzer.counters.alerts_triggered.load(Ordering::Relaxed), 1);
    }
}
