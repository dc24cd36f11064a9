//! Source-kind processors.
//!
//! Each document kind (`file`, `text`, `url`, `discussionThread`) implements
//! the same two-step capability set: materialize the canonical source bytes,
//! then transform them into chunkable `(content, metadata)` records. The
//! kind set is closed; [`processor_for`] dispatches on the payload variant.

pub mod file;
pub mod text;
pub mod thread;
pub mod url;

use anyhow::Result;
use async_trait::async_trait;
use std::path::PathBuf;

use crate::config::Config;
use crate::models::{Document, ProcessedRecord, SourcePayload};

pub use thread::{DiscussionApi, HttpDiscussionApi, ThreadComment, ThreadPost};
pub use url::{Crawler, HttpCrawler};

/// Shared collaborators handed to every processor invocation.
pub struct ProcessorContext<'a> {
    pub config: &'a Config,
    pub crawler: &'a dyn Crawler,
    pub discussions: &'a dyn DiscussionApi,
}

impl ProcessorContext<'_> {
    /// Directory holding a document's canonical and processed files.
    pub fn doc_dir(&self, doc: &Document) -> PathBuf {
        self.config
            .storage
            .data_dir
            .join("kb")
            .join(&doc.knowledge_base_id)
            .join("docs")
            .join(&doc.id)
    }

    /// Canonical source text for the document.
    pub fn original_path(&self, doc: &Document) -> PathBuf {
        self.doc_dir(doc).join("original.txt")
    }

    /// Persisted processed representation (records as JSON).
    pub fn processed_path(&self, doc: &Document) -> PathBuf {
        self.doc_dir(doc).join("processed.json")
    }
}

/// A source-kind processor.
#[async_trait]
pub trait SourceProcessor: Send + Sync {
    /// Materialize the canonical source bytes. Kinds whose source of truth
    /// already exists (`file`, `text`) are no-ops here.
    async fn save_original(&self, ctx: &ProcessorContext<'_>, doc: &Document) -> Result<()>;

    /// Transform the canonical source into one or more records. Most kinds
    /// produce exactly one; a discussion thread expands into one record per
    /// thread/locale combination.
    async fn process(&self, ctx: &ProcessorContext<'_>, doc: &Document)
        -> Result<Vec<ProcessedRecord>>;

    /// Whether chunking should prefer the markdown-aware splitter for this
    /// kind's records.
    fn prefers_markdown(&self) -> bool {
        false
    }
}

/// Select the processor implementation for a payload variant.
pub fn processor_for(payload: &SourcePayload) -> &'static dyn SourceProcessor {
    match payload {
        SourcePayload::File { .. } => &file::FileProcessor,
        SourcePayload::Text { .. } => &text::TextProcessor,
        SourcePayload::Url { .. } => &url::UrlProcessor,
        SourcePayload::DiscussionThread { .. } => &thread::ThreadProcessor,
    }
}
