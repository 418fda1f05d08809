//! Crate-wide error taxonomy (SPEC_FULL.md §4.10, §7).
//!
//! Only configuration errors are fatal. Everything else is handled locally by the component
//! that raised it (retry, evict, skip-and-count) and is surfaced here purely so call sites can
//! log or count it uniformly.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("feed message parse error: {0}")]
    FeedParse(#[from] crate::model::TradeParseError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("trade log error: {0}")]
    Log(String),

    #[error("downstream service error ({service}): {message}")]
    Downstream { service: &'static str, message: String },
}

impl PipelineError {
    pub fn downstream(service: &'static str, message: impl Into<String>) -> Self {
        PipelineError::Downstream {
            service,
            message: message.into(),
        }
    }
}
