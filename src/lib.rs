//! Real-time market-data indicator pipeline.
//!
//! Trades flow from the exchange ingestor through a durable log into the analyzer, which drives
//! a set of streaming indicators (RSI, volume spike, whale, psychological level) and fires
//! cooldown-gated alerts -- enriched with AI analysis only when the hub has a live audience --
//! out to every subscriber attached over the WebSocket transport.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod health;
pub mod hub;
pub mod indicators;
pub mod ingestor;
pub mod llm;
pub mod model;
pub mod supervisor;
pub mod tradelog;
pub mod tts;

pub use error::{PipelineError, Result};
