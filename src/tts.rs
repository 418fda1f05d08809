//! Text-to-speech client (SPEC_FULL.md §4.12).
//!
//! Normalizes the LLM's text into something speakable before handing it to the voice provider,
//! grounded on `services/voice.py`/`voice/synthesizer.py`'s replacement tables (currency signs,
//! ticker shorthand, percent signs, markdown emphasis).

use async_trait::async_trait;

use crate::error::{PipelineError, Result};

#[async_trait]
pub trait TtsClient: Send + Sync {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>>;
}

/// Replacement pairs applied in order, matching the Python source's normalization table.
const REPLACEMENTS: &[(&str, &str)] = &[
    ("BTC", "Bitcoin"),
    ("ETH", "Ethereum"),
    ("SOL", "Solana"),
    ("RSI", "R S I"),
    ("%", " percent"),
    ("$", "dollars "),
];

/// Strips the markdown emphasis markers the LLM sometimes emits and applies the symbol/ticker
/// replacement table, then collapses repeated whitespace left behind by the substitutions.
pub fn normalize_for_speech(text: &str) -> String {
    let mut normalized = text.replace(['*', '_', '`', '#'], "");
    for (from, to) in REPLACEMENTS {
        normalized = normalized.replace(from, to);
    }
    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

const ENDPOINT_TEMPLATE: &str = "https://api.elevenlabs.io/v1/text-to-speech";

pub struct HttpTtsClient {
    client: reqwest::Client,
    api_key: String,
}

impl HttpTtsClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl TtsClient for HttpTtsClient {
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let normalized = normalize_for_speech(text);
        let url = format!("{ENDPOINT_TEMPLATE}/{voice_id}");

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&serde_json::json!({ "text": normalized }))
            .send()
            .await
            .map_err(|e| PipelineError::downstream("tts", e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::downstream(
                "tts",
                format!("unexpected status {}", response.status()),
            ));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| PipelineError::downstream("tts", format!("bad response body: {e}")))
    }
}

/// Test double that skips the network and returns a fixed, non-empty audio payload.
#[derive(Default)]
pub struct StubTtsClient;

#[async_trait]
impl TtsClient for StubTtsClient {
    async fn synthesize(&self, _text: &str, _voice_id: &str) -> Result<Vec<u8>> {
        Ok(vec![0u8; 4])
    }
}
