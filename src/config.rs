//! Typed configuration (SPEC_FULL.md §4.9).
//!
//! Layered the way `kamoussa-solbot` layers its settings: built-in defaults, an optional
//! `config.toml`, environment variables (`APP_`-prefixed), then CLI overrides. A missing or
//! malformed required value is a fatal startup error (SPEC_FULL.md §7); everything else defaults.

use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct RsiSettings {
    pub period: usize,
    pub overbought_threshold: f64,
    pub oversold_threshold: f64,
}

impl Default for RsiSettings {
    fn default() -> Self {
        Self {
            period: 60,
            overbought_threshold: 70.0,
            oversold_threshold: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeSettings {
    pub window_size: usize,
    pub spike_threshold: f64,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            window_size: 30,
            spike_threshold: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhaleSettings {
    pub window_seconds: u64,
    pub threshold_percent: f64,
}

impl Default for WhaleSettings {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            threshold_percent: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    pub trade_capacity: usize,
    pub alert_capacity: usize,
    pub subscriber_buffer_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            trade_capacity: 1000,
            alert_capacity: 10,
            subscriber_buffer_size: 32,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Exchange WebSocket URL (symbol channels already concatenated, per SPEC_FULL.md §6).
    pub feed_url: String,
    pub tracked_symbols: Vec<String>,

    #[serde(default)]
    pub rsi: RsiSettings,
    #[serde(default)]
    pub volume: VolumeSettings,
    #[serde(default)]
    pub whale: WhaleSettings,
    #[serde(default = "default_levels")]
    pub levels: Vec<i64>,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default)]
    pub queues: QueueSettings,
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,

    #[serde(default)]
    pub llm_api_key: String,
    #[serde(default)]
    pub tts_api_key: String,
    #[serde(default = "default_voice_id")]
    pub tts_voice_id: String,

    #[serde(default)]
    pub health_bind_addr: Option<String>,
}

fn default_levels() -> Vec<i64> {
    vec![68000, 69000, 70000]
}

fn default_cooldown_seconds() -> u64 {
    300
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

fn default_voice_id() -> String {
    "default".to_string()
}

impl AppConfig {
    /// Loads configuration from (in increasing precedence) built-in defaults, an optional
    /// `config.toml` next to the binary, `APP_`-prefixed environment variables, and finally the
    /// parsed CLI overrides.
    pub fn load(cli: &CliOverrides) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("rsi.period", 60i64)
            .map_err(config_err)?
            .set_default("rsi.overbought_threshold", 70.0)
            .map_err(config_err)?
            .set_default("rsi.oversold_threshold", 30.0)
            .map_err(config_err)?
            .set_default("volume.window_size", 30i64)
            .map_err(config_err)?
            .set_default("volume.spike_threshold", 5.0)
            .map_err(config_err)?
            .set_default("whale.window_seconds", 60i64)
            .map_err(config_err)?
            .set_default("whale.threshold_percent", 1.0)
            .map_err(config_err)?
            .set_default("cooldown_seconds", 300i64)
            .map_err(config_err)?
            .set_default("shutdown_grace_seconds", 5i64)
            .map_err(config_err)?
            .set_default("tts_voice_id", "default")
            .map_err(config_err)?;

        if let Some(path) = &cli.config_file {
            builder = builder.add_source(config::File::from(path.clone()).required(true));
        } else {
            builder = builder.add_source(config::File::with_name("config").required(false));
        }

        builder = builder.add_source(config::Environment::with_prefix("APP").separator("__"));

        let built = builder.build().map_err(config_err)?;
        let mut app: AppConfig = built.try_deserialize().map_err(config_err)?;

        if let Some(feed_url) = &cli.feed_url {
            app.feed_url = feed_url.clone();
        }
        if !cli.symbols.is_empty() {
            app.tracked_symbols = cli.symbols.clone();
        }

        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<()> {
        if self.feed_url.is_empty() {
            return Err(PipelineError::Config(
                "feed_url is required (set APP_FEED_URL or --feed-url)".into(),
            ));
        }
        url::Url::parse(&self.feed_url)
            .map_err(|e| PipelineError::Config(format!("feed_url is not a valid URL: {e}")))?;
        if self.tracked_symbols.is_empty() {
            return Err(PipelineError::Config(
                "tracked_symbols must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn config_err(e: config::ConfigError) -> PipelineError {
    PipelineError::Config(e.to_string())
}

/// CLI overrides layered on top of file/env configuration (SPEC_FULL.md §4.9).
#[derive(Debug, Parser, Default)]
#[command(name = "tickforge", about = "Streaming indicator + alert pipeline", long_about = None)]
pub struct CliOverrides {
    /// Path to a TOML config file (overrides the default `config.toml` lookup).
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Overrides the configured exchange WebSocket URL.
    #[arg(long)]
    pub feed_url: Option<String>,

    /// Overrides the configured tracked-symbol list.
    #[arg(long, value_delimiter = ',')]
    pub symbols: Vec<String>,
}
