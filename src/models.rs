//! Core data models for the ingestion and retrieval engine.
//!
//! These types represent the knowledge bases, documents, segments, and jobs
//! that flow through the pipeline. Persistence is delegated to the
//! [`RecordStore`](crate::records::RecordStore) collaborator; nothing here
//! talks to a database directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use uuid::Uuid;

/// A logical collection of documents sharing one vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: String,
    /// When set, the collection is read-only and its index directory is
    /// resolved from a bundled resource instead of the mutable data dir.
    pub resource_ref: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
}

impl KnowledgeBase {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_ref: None,
            created_at: Utc::now(),
        }
    }
}

/// Embedding lifecycle of a [`Document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Idle,
    Uploading,
    Success,
    Error,
}

/// Which crawl backend fetches a `url` document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlProviderKind {
    /// A reader proxy that returns extracted readable text.
    Reader,
    /// A scraping provider that returns structured markdown.
    Scrape,
}

/// How a `discussionThread` document selects its threads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "camelCase")]
pub enum ThreadSelector {
    /// One thread by id.
    Single { thread_id: String },
    /// Every thread in a collection.
    Collection { collection_id: String },
    /// Every thread of a given type.
    ThreadType { type_id: String },
}

/// Source-kind specific payload of a [`Document`].
///
/// Closed set: each variant maps to exactly one processor implementation
/// (see [`crate::processors::processor_for`]). The payload is immutable once
/// the document is created, except for `Text` whose body may be replaced in
/// place to trigger a new embedding cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SourcePayload {
    File {
        /// Path of the already-uploaded file within the data dir.
        stored_path: PathBuf,
        original_name: String,
    },
    Text {
        body: String,
    },
    Url {
        url: String,
        provider: CrawlProviderKind,
    },
    DiscussionThread {
        selector: ThreadSelector,
        /// Locale variants to fetch; empty means default locale only.
        locales: Vec<String>,
    },
}

impl SourcePayload {
    /// Stable name of the source kind, used in logs and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            SourcePayload::File { .. } => "file",
            SourcePayload::Text { .. } => "text",
            SourcePayload::Url { .. } => "url",
            SourcePayload::DiscussionThread { .. } => "discussionThread",
        }
    }
}

/// A source unit owned by a knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub knowledge_base_id: String,
    pub payload: SourcePayload,
    pub embedding_status: EmbeddingStatus,
    /// Last pipeline error, cleared on a successful run.
    pub error: Option<String>,
    /// Size of the processed representation in bytes.
    pub size_bytes: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(knowledge_base_id: impl Into<String>, payload: SourcePayload) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            knowledge_base_id: knowledge_base_id.into(),
            payload,
            embedding_status: EmbeddingStatus::Idle,
            error: None,
            size_bytes: 0,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One chunk of normalized text derived from a document.
///
/// The segment id doubles as the vector store's external id for the chunk,
/// so deleting vectors before segments keeps the two stores consistent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: String,
    pub document_id: String,
    pub knowledge_base_id: String,
    pub chunk_index: i64,
    /// Raw chunk content, kept for auditing and secondary-index sync.
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Segment {
    pub fn new(
        knowledge_base_id: impl Into<String>,
        document_id: impl Into<String>,
        chunk_index: i64,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id: document_id.into(),
            knowledge_base_id: knowledge_base_id.into(),
            chunk_index,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Status of an embedding history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Uploading,
    Success,
    Error,
}

/// Idempotence ledger row: records that a given chunk-content hash was
/// embedded for (knowledge base, document), so unchanged content is skipped
/// on re-ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingHistoryEntry {
    pub knowledge_base_id: String,
    pub document_id: String,
    pub content_hash: String,
    pub status: LedgerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One `(content, metadata)` record produced by a source processor.
///
/// Metadata is always a JSON object; it is stamped onto every chunk derived
/// from this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedRecord {
    pub content: String,
    #[serde(default = "empty_object")]
    pub metadata: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

impl ProcessedRecord {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: empty_object(),
        }
    }

    pub fn with_metadata(content: impl Into<String>, metadata: serde_json::Value) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// An ingestion job. Transient; lives only in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub knowledge_base_id: String,
    pub document_id: String,
    /// Re-embed: delete the document's existing segments and vectors first.
    #[serde(default)]
    pub update: bool,
}

impl Job {
    pub fn new(knowledge_base_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            knowledge_base_id: knowledge_base_id.into(),
            document_id: document_id.into(),
            update: false,
        }
    }

    pub fn update(knowledge_base_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            update: true,
            ..Self::new(knowledge_base_id, document_id)
        }
    }

    /// Deterministic hash of the job's JSON form, used for in-flight dedup.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_string(self).expect("job serialization cannot fail");
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
