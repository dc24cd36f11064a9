//! Best-effort sync to an external full-text index service.
//!
//! The vector store is the source of truth; the external index only mirrors
//! chunk text for full-text consumers and may lag or miss updates. Every
//! operation retries a fixed number of times and then logs a warning
//! instead of failing the pipeline.

use anyhow::{bail, Context, Result};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SearchIndexConfig;
use crate::models::Segment;

const INDEX_NAME: &str = "segments";
const SYNC_ATTEMPTS: u32 = 3;
const SYNC_BACKOFF: Duration = Duration::from_secs(2);

/// Client for a Meilisearch-compatible index service.
pub struct SearchIndexClient {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

/// Deterministic index document id for a chunk: hash of the knowledge base
/// id plus whitespace-normalized content, so re-publishing identical content
/// overwrites instead of duplicating.
pub fn entry_id(knowledge_base_id: &str, content: &str) -> String {
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(knowledge_base_id.as_bytes());
    hasher.update(b":");
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl SearchIndexClient {
    pub fn new(config: &SearchIndexConfig) -> Result<Option<Self>> {
        let Some(url) = &config.url else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Some(Self {
            url: url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        }))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, format!("{}{}", self.url, path));
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        req
    }

    async fn ensure_settings(&self) -> Result<()> {
        let body = json!({
            "searchableAttributes": ["pageContent"],
            "filterableAttributes": ["knowledgeBaseId"],
        });
        let resp = self
            .request(
                reqwest::Method::PATCH,
                &format!("/indexes/{}/settings", INDEX_NAME),
            )
            .json(&body)
            .send()
            .await
            .context("index settings request failed")?;
        if !resp.status().is_success() {
            bail!("index settings update failed: HTTP {}", resp.status());
        }
        Ok(())
    }

    async fn try_publish(
        &self,
        knowledge_base_id: &str,
        chunks: &[(String, serde_json::Value)],
    ) -> Result<()> {
        self.ensure_settings().await?;
        let docs: Vec<serde_json::Value> = chunks
            .iter()
            .map(|(content, metadata)| {
                let mut doc = serde_json::Map::new();
                doc.insert("id".into(), json!(entry_id(knowledge_base_id, content)));
                doc.insert("knowledgeBaseId".into(), json!(knowledge_base_id));
                doc.insert("pageContent".into(), json!(content));
                if let Some(map) = metadata.as_object() {
                    for (k, v) in map {
                        doc.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
                serde_json::Value::Object(doc)
            })
            .collect();

        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/indexes/{}/documents", INDEX_NAME),
            )
            .json(&docs)
            .send()
            .await
            .context("index publish request failed")?;
        if !resp.status().is_success() {
            bail!("index publish failed: HTTP {}", resp.status());
        }
        Ok(())
    }

    async fn try_remove(&self, knowledge_base_id: &str, segments: &[Segment]) -> Result<()> {
        let ids: Vec<String> = segments
            .iter()
            .map(|s| entry_id(knowledge_base_id, &s.content))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/indexes/{}/documents/delete-batch", INDEX_NAME),
            )
            .json(&ids)
            .send()
            .await
            .context("index delete request failed")?;
        if !resp.status().is_success() {
            bail!("index delete failed: HTTP {}", resp.status());
        }
        Ok(())
    }

    /// Publish chunk texts with their metadata. Never fails the caller.
    pub async fn publish_chunks(
        &self,
        knowledge_base_id: &str,
        chunks: &[(String, serde_json::Value)],
    ) {
        if chunks.is_empty() {
            return;
        }
        for attempt in 1..=SYNC_ATTEMPTS {
            match self.try_publish(knowledge_base_id, chunks).await {
                Ok(()) => {
                    debug!(knowledge_base_id, count = chunks.len(), "published chunks to index");
                    return;
                }
                Err(e) if attempt < SYNC_ATTEMPTS => {
                    debug!(knowledge_base_id, attempt, error = %e, "index publish retry");
                    tokio::time::sleep(SYNC_BACKOFF).await;
                }
                Err(e) => {
                    warn!(knowledge_base_id, error = %e, "index publish failed, giving up");
                }
            }
        }
    }

    /// Remove the index entries derived from the given segments. Never fails
    /// the caller.
    pub async fn remove_segments(&self, knowledge_base_id: &str, segments: &[Segment]) {
        if segments.is_empty() {
            return;
        }
        for attempt in 1..=SYNC_ATTEMPTS {
            match self.try_remove(knowledge_base_id, segments).await {
                Ok(()) => {
                    debug!(knowledge_base_id, count = segments.len(), "removed index entries");
                    return;
                }
                Err(e) if attempt < SYNC_ATTEMPTS => {
                    debug!(knowledge_base_id, attempt, error = %e, "index removal retry");
                    tokio::time::sleep(SYNC_BACKOFF).await;
                }
                Err(e) => {
                    warn!(knowledge_base_id, error = %e, "index removal failed, giving up");
                }
            }
        }
    }
}
