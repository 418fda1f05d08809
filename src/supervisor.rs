//! Process lifecycle (SPEC_FULL.md §4.8): wires ingestor, analyzer, hub, log, and the
//! LLM/TTS clients together, runs each stage as its own task, and drives cooperative shutdown
//! through a shared `CancellationToken` with a bounded grace period.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analyzer::{Analyzer, AnalyzerCounters};
use crate::config::AppConfig;
use crate::hub::Hub;
use crate::ingestor::Ingestor;
use crate::llm::{HttpLlmClient, LlmClient};
use crate::tradelog::{InMemoryLog, TradeLog};
use crate::tts::{HttpTtsClient, TtsClient};

pub struct Supervisor {
    pub hub: Arc<Hub>,
    pub log: Arc<dyn TradeLog>,
    pub ingestor: Arc<Ingestor>,
    analyzer: Analyzer,
    cancel: CancellationToken,
    shutdown_grace: Duration,
}

impl Supervisor {
    pub fn new(config: &AppConfig) -> Self {
        let hub = Hub::new(config.queues.subscriber_buffer_size);
        let log = InMemoryLog::new(config.queues.trade_capacity, config.queues.alert_capacity);
        let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(config.llm_api_key.clone()));
        let tts: Arc<dyn TtsClient> = Arc::new(HttpTtsClient::new(config.tts_api_key.clone()));

        let ingestor = Arc::new(Ingestor::new(config.feed_url.clone(), log.clone(), hub.clone()));
        let analyzer = Analyzer::new(config, log.clone(), hub.clone(), llm, tts);

        Self {
            hub,
            log,
            ingestor,
            analyzer,
            cancel: CancellationToken::new(),
            shutdown_grace: Duration::from_secs(config.shutdown_grace_seconds),
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn analyzer_counters(&self) -> Arc<AnalyzerCounters> {
        self.analyzer.counters()
    }

    /// Runs every stage to completion, returning once `cancel` has fired and either every task
    /// has exited on its own or the shutdown grace period has elapsed (SPEC_FULL.md §4.8).
    pub async fn run(mut self) {
        let mut tasks = JoinSet::new();

        let ingestor = self.ingestor.clone();
        let ingestor_cancel = self.cancel.clone();
        tasks.spawn(async move { ingestor.run(ingestor_cancel).await });

        let analyzer_cancel = self.cancel.clone();
        let mut analyzer = self.analyzer;
        tasks.spawn(async move { analyzer.run(analyzer_cancel).await });

        self.cancel.cancelled().await;
        info!(grace_secs = self.shutdown_grace.as_secs(), "shutdown requested, waiting for stages to drain");

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!("shutdown grace period elapsed, aborting remaining stages");
            tasks.shutdown().await;
        }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{QueueSettings, RsiSettings, VolumeSettings, WhaleSettings};

    fn test_config() -> AppConfig {
        AppConfig {
            feed_url: "wss://example.test/ws".into(),
            tracked_symbols: vec!["BTCUSDT".into()],
            rsi: RsiSettings::default(),
            volume: VolumeSettings::default(),
            whale: WhaleSettings::default(),
            levels: vec![69000],
            cooldown_seconds: 300,
            queues: QueueSettings::default(),
            shutdown_grace_seconds: 1,
            llm_api_key: String::new(),
            tts_api_key: String::new(),
            tts_voice_id: "default".into(),
            health_bind_addr: None,
        }
    }

    #[tokio::test]
    async fn stop_unblocks_run_within_the_grace_period() {
        let supervisor = Supervisor::new(&test_config());
        let cancel = supervisor.cancellation_token();
        let handle = tokio::spawn(supervisor.run());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("supervisor should stop within the grace period")
            .expect("supervisor task should not panic");
    }
}
