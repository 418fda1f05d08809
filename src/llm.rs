//! LLM text-generation client (SPEC_FULL.md §4.12).
//!
//! The analyzer asks for a one-sentence market insight per alert, the same prompt/temperature
//! shape as `services/analyzer.py`'s Gemini call. Expressed as a trait so the analyzer can be
//! driven by a stub in tests; `HttpLlmClient` is the reqwest-backed default, which fires the HTTP
//! call and surfaces failure as a `Downstream` error the caller is free to log and continue past.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String>;
}

/// Minimal Gemini-style `generateContent` request/response shape.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: String,
}

const ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";

pub struct HttpLlmClient {
    client: reqwest::Client,
    api_key: String,
}

impl HttpLlmClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String> {
        let body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature,
                max_output_tokens: max_tokens,
            },
        };

        let response = self
            .client
            .post(ENDPOINT)
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::downstream("llm", e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::downstream(
                "llm",
                format!("unexpected status {}", response.status()),
            ));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::downstream("llm", format!("bad response body: {e}")))?;

        parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| PipelineError::downstream("llm", "empty candidate list"))
    }
}

/// Deterministic test double that counts calls instead of reaching the network.
#[derive(Default)]
pub struct StubLlmClient {
    calls: AtomicU64,
}

impl StubLlmClient {
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmClient for StubLlmClient {
    async fn generate(&self, _prompt: &str, _temperature: f32, _max_tokens: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok("stubbed market insight".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_counts_calls() {
        let stub = StubLlmClient::default();
        stub.generate("prompt", 0.7, 100).await.unwrap();
        stub.generate("prompt", 0.7, 100).await.unwrap();
        assert_eq!(stub.call_count(), 2);
    }
}
