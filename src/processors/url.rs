//! `url` documents: crawled web pages.
//!
//! Two provider strategies: a reader proxy that returns extracted readable
//! text (the target URL is appended to the proxy base), or a scraping
//! provider that is POSTed the target URL and answers with structured
//! markdown. The crawl result is written as the document's canonical
//! source; processing re-reads and whitespace-normalizes it.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use super::{ProcessorContext, SourceProcessor};
use crate::config::CrawlConfig;
use crate::models::{CrawlProviderKind, Document, ProcessedRecord, SourcePayload};

/// Crawl collaborator: URL in, page text out.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn crawl(&self, url: &str, provider: CrawlProviderKind) -> Result<String>;
}

/// HTTP crawler using the configured reader proxy / scrape endpoint.
pub struct HttpCrawler {
    config: CrawlConfig,
    client: reqwest::Client,
}

impl HttpCrawler {
    pub fn new(config: CrawlConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl Crawler for HttpCrawler {
    async fn crawl(&self, url: &str, provider: CrawlProviderKind) -> Result<String> {
        match provider {
            CrawlProviderKind::Reader => {
                let reader_url = format!(
                    "{}/{}",
                    self.config.reader_url.trim_end_matches('/'),
                    url
                );
                let resp = self
                    .client
                    .get(&reader_url)
                    .send()
                    .await
                    .with_context(|| format!("reader crawl failed for {}", url))?;
                if !resp.status().is_success() {
                    bail!("reader crawl failed for {}: HTTP {}", url, resp.status());
                }
                Ok(resp.text().await?)
            }
            CrawlProviderKind::Scrape => {
                let Some(scrape_url) = &self.config.scrape_url else {
                    bail!("scrape provider requested but crawl.scrape_url is not configured");
                };
                let resp = self
                    .client
                    .post(scrape_url)
                    .json(&serde_json::json!({ "url": url, "format": "markdown" }))
                    .send()
                    .await
                    .with_context(|| format!("scrape crawl failed for {}", url))?;
                if !resp.status().is_success() {
                    bail!("scrape crawl failed for {}: HTTP {}", url, resp.status());
                }
                let json: serde_json::Value = resp.json().await?;
                json.get("markdown")
                    .and_then(|m| m.as_str())
                    .map(|s| s.to_string())
                    .ok_or_else(|| anyhow::anyhow!("scrape response missing markdown field"))
            }
        }
    }
}

pub struct UrlProcessor;

#[async_trait]
impl SourceProcessor for UrlProcessor {
    async fn save_original(&self, ctx: &ProcessorContext<'_>, doc: &Document) -> Result<()> {
        let SourcePayload::Url { url, provider } = &doc.payload else {
            bail!(
                "document {} has a {} payload, expected url",
                doc.id,
                doc.payload.kind()
            );
        };
        let text = ctx.crawler.crawl(url, *provider).await?;
        let path = ctx.original_path(doc);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &text)
            .await
            .with_context(|| format!("Failed to write canonical source: {}", path.display()))?;
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ProcessorContext<'_>,
        doc: &Document,
    ) -> Result<Vec<ProcessedRecord>> {
        let SourcePayload::Url { url, .. } = &doc.payload else {
            bail!(
                "document {} has a {} payload, expected url",
                doc.id,
                doc.payload.kind()
            );
        };
        let path = ctx.original_path(doc);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Missing canonical source: {}", path.display()))?;
        let record = ProcessedRecord::with_metadata(
            normalize(&raw),
            serde_json::json!({ "url": url }),
        );
        Ok(vec![record])
    }

    fn prefers_markdown(&self) -> bool {
        true
    }
}

/// Normalize line endings and collapse runs of blank lines.
fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out.trim().to_string()
}
