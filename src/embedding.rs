//! Embedding and text-generation provider abstraction.
//!
//! The engine consumes the model provider as a black box: a batch of texts
//! in, one vector per text out, plus a single-prompt text generation used
//! for paraphrase expansion. [`HttpProvider`] talks to an OpenAI-compatible
//! API with batching, retry, and exponential backoff.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::EmbeddingConfig;

/// Black-box model provider: text → vector, and prompt → generated text.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Generate a completion for a single prompt (paraphrase expansion).
    async fn generate_text(&self, prompt: &str) -> Result<String>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn ModelProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Provider backed by an OpenAI-compatible HTTP API.
pub struct HttpProvider {
    config: EmbeddingConfig,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        if std::env::var(&config.api_key_env).is_err() {
            bail!("{} environment variable not set", config.api_key_env);
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    fn api_key(&self) -> Result<String> {
        std::env::var(&self.config.api_key_env)
            .map_err(|_| anyhow::anyhow!("{} not set", self.config.api_key_env))
    }

    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let api_key = self.api_key()?;
        let url = format!("{}/{}", self.config.url.trim_end_matches('/'), path);
        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json().await?);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("provider error {}: {}", status, body_text));
                        continue;
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("provider error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("provider call failed after retries")))
    }
}

#[async_trait]
impl ModelProvider for HttpProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let body = serde_json::json!({
                "model": self.config.model,
                "input": batch,
            });
            let json = self.post_with_retry("embeddings", &body).await?;
            embeddings.extend(parse_embeddings_response(&json)?);
        }
        if embeddings.len() != texts.len() {
            bail!(
                "provider returned {} embeddings for {} inputs",
                embeddings.len(),
                texts.len()
            );
        }
        Ok(embeddings)
    }

    async fn generate_text(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.config.generation_model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let json = self.post_with_retry("chat/completions", &body).await?;
        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|t| t.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing content"))
    }
}

fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid embeddings response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}
