//! `discussionThread` documents: posts pulled from a discussion service.
//!
//! A selector resolves to one or more thread ids (a single thread, every
//! thread in a collection, or every thread of a given type). Each resolved
//! thread is fetched once per requested locale together with all of its
//! comment pages; the combined payload is serialized as the canonical
//! source, and processing flattens it into one record per thread/locale.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ProcessorContext, SourceProcessor};
use crate::config::DiscussionConfig;
use crate::models::{Document, ProcessedRecord, SourcePayload, ThreadSelector};

/// A discussion thread's top post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadPost {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub languages: Vec<String>,
}

/// A single comment under a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadComment {
    pub author: String,
    pub body: String,
}

/// Discussion service collaborator.
#[async_trait]
pub trait DiscussionApi: Send + Sync {
    /// Fetch a thread, optionally in a specific locale.
    async fn fetch_thread(&self, id: &str, locale: Option<&str>) -> Result<ThreadPost>;

    /// Fetch one page of comments for a thread. An empty page ends paging.
    async fn fetch_comments(
        &self,
        id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<ThreadComment>>;

    /// List thread ids matching a selector, one page at a time.
    async fn list_threads(
        &self,
        selector: &ThreadSelector,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<String>>;
}

/// REST client for the discussion service.
pub struct HttpDiscussionApi {
    config: DiscussionConfig,
    client: reqwest::Client,
}

impl HttpDiscussionApi {
    pub fn new(config: DiscussionConfig) -> Result<Self> {
        if config.base_url.is_none() {
            bail!("discussion.base_url is not configured");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or_default()
            .trim_end_matches('/')
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("discussion request failed: {}", url))?;
        if !resp.status().is_success() {
            bail!("discussion request failed: {} HTTP {}", url, resp.status());
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl DiscussionApi for HttpDiscussionApi {
    async fn fetch_thread(&self, id: &str, locale: Option<&str>) -> Result<ThreadPost> {
        let mut url = format!("{}/threads/{}", self.base_url(), id);
        if let Some(locale) = locale {
            url.push_str(&format!("?locale={}", locale));
        }
        let json = self.get_json(&url).await?;
        Ok(serde_json::from_value(json)?)
    }

    async fn fetch_comments(
        &self,
        id: &str,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<ThreadComment>> {
        let url = format!(
            "{}/threads/{}/comments?page={}&pageSize={}",
            self.base_url(),
            id,
            page,
            page_size
        );
        let json = self.get_json(&url).await?;
        let items = json
            .get("comments")
            .cloned()
            .unwrap_or(serde_json::Value::Array(vec![]));
        Ok(serde_json::from_value(items)?)
    }

    async fn list_threads(
        &self,
        selector: &ThreadSelector,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<String>> {
        let url = match selector {
            ThreadSelector::Single { thread_id } => {
                return Ok(vec![thread_id.clone()]);
            }
            ThreadSelector::Collection { collection_id } => format!(
                "{}/collections/{}/threads?page={}&pageSize={}",
                self.base_url(),
                collection_id,
                page,
                page_size
            ),
            ThreadSelector::ThreadType { type_id } => format!(
                "{}/threads?type={}&page={}&pageSize={}",
                self.base_url(),
                type_id,
                page,
                page_size
            ),
        };
        let json = self.get_json(&url).await?;
        let ids = json
            .get("threadIds")
            .and_then(|t| t.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(ids)
    }
}

/// Serialized form of a fully fetched thread, one per thread/locale pair.
#[derive(Debug, Serialize, Deserialize)]
struct FetchedThread {
    locale: Option<String>,
    post: ThreadPost,
    comments: Vec<ThreadComment>,
}

pub struct ThreadProcessor;

impl ThreadProcessor {
    async fn resolve_threads(
        &self,
        ctx: &ProcessorContext<'_>,
        selector: &ThreadSelector,
    ) -> Result<Vec<String>> {
        if let ThreadSelector::Single { thread_id } = selector {
            return Ok(vec![thread_id.clone()]);
        }
        let page_size = ctx.config.discussion.page_size.max(1) as usize;
        let mut ids = Vec::new();
        let mut page = 0usize;
        loop {
            let batch = ctx.discussions.list_threads(selector, page, page_size).await?;
            let short = batch.len() < page_size;
            if batch.is_empty() {
                break;
            }
            ids.extend(batch);
            if short {
                break;
            }
            page += 1;
        }
        Ok(ids)
    }

    async fn fetch_all_comments(
        &self,
        ctx: &ProcessorContext<'_>,
        thread_id: &str,
    ) -> Result<Vec<ThreadComment>> {
        let page_size = ctx.config.discussion.page_size.max(1) as usize;
        let mut comments = Vec::new();
        let mut page = 0usize;
        loop {
            let batch = ctx
                .discussions
                .fetch_comments(thread_id, page, page_size)
                .await?;
            let short = batch.len() < page_size;
            if batch.is_empty() {
                break;
            }
            comments.extend(batch);
            if short {
                break;
            }
            page += 1;
        }
        Ok(comments)
    }
}

#[async_trait]
impl SourceProcessor for ThreadProcessor {
    async fn save_original(&self, ctx: &ProcessorContext<'_>, doc: &Document) -> Result<()> {
        let SourcePayload::DiscussionThread { selector, locales } = &doc.payload else {
            bail!(
                "document {} has a {} payload, expected discussionThread",
                doc.id,
                doc.payload.kind()
            );
        };

        let thread_ids = self.resolve_threads(ctx, selector).await?;
        if thread_ids.is_empty() {
            bail!("selector matched no threads for document {}", doc.id);
        }

        let locale_list: Vec<Option<String>> = if locales.is_empty() {
            vec![None]
        } else {
            locales.iter().cloned().map(Some).collect()
        };

        let mut fetched = Vec::new();
        for thread_id in &thread_ids {
            let comments = self.fetch_all_comments(ctx, thread_id).await?;
            for locale in &locale_list {
                let post = ctx
                    .discussions
                    .fetch_thread(thread_id, locale.as_deref())
                    .await
                    .with_context(|| format!("Failed to fetch thread {}", thread_id))?;
                fetched.push(FetchedThread {
                    locale: locale.clone(),
                    post,
                    comments: comments.clone(),
                });
            }
        }

        let path = ctx.original_path(doc);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&fetched)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write canonical source: {}", path.display()))?;
        Ok(())
    }

    async fn process(
        &self,
        ctx: &ProcessorContext<'_>,
        doc: &Document,
    ) -> Result<Vec<ProcessedRecord>> {
        if !matches!(doc.payload, SourcePayload::DiscussionThread { .. }) {
            bail!(
                "document {} has a {} payload, expected discussionThread",
                doc.id,
                doc.payload.kind()
            );
        }
        let path = ctx.original_path(doc);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Missing canonical source: {}", path.display()))?;
        let fetched: Vec<FetchedThread> = serde_json::from_str(&raw)?;

        let mut records = Vec::with_capacity(fetched.len());
        for thread in fetched {
            let content = render_thread(&thread.post, &thread.comments);
            let mut metadata = serde_json::Map::new();
            if let Some(link) = &thread.post.link {
                metadata.insert("link".to_string(), serde_json::json!(link));
            }
            if let Some(locale) = &thread.locale {
                metadata.insert("locale".to_string(), serde_json::json!(locale));
            }
            records.push(ProcessedRecord::with_metadata(
                content,
                serde_json::Value::Object(metadata),
            ));
        }
        Ok(records)
    }

    fn prefers_markdown(&self) -> bool {
        true
    }
}

/// Flatten a thread into a markdown document: title heading, post body,
/// then each comment attributed to its author.
fn render_thread(post: &ThreadPost, comments: &[ThreadComment]) -> String {
    let mut out = format!("# {}\n\n{}", post.title.trim(), post.body.trim());
    for comment in comments {
        out.push_str("\n\n## Comment by ");
        out.push_str(comment.author.trim());
        out.push_str("\n\n");
        out.push_str(comment.body.trim());
    }
    out
}
