//! The ingestion pipeline: one job in, one embedded document out.
//!
//! A job names a (knowledge base, document) pair. Execution marks the
//! document `uploading`, materializes and processes its source, then embeds
//! each processed record unless the ledger says its content is already in
//! the store. Segments and vectors are written together under the segment
//! id, and the external full-text index is synced in the background after
//! the document succeeds.
//!
//! Failure anywhere marks the document `error` with a user-facing message;
//! already-embedded records from earlier in the run stay in place and the
//! ledger keeps them from being re-embedded on retry.

use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::chunking::{chunk_record, content_hash};
use crate::config::Config;
use crate::embedding::ModelProvider;
use crate::error::IngestError;
use crate::ledger::EmbeddingLedger;
use crate::models::{
    Document, EmbeddingStatus, Job, KnowledgeBase, ProcessedRecord, Segment,
};
use crate::processors::{processor_for, Crawler, DiscussionApi, ProcessorContext};
use crate::records::RecordStore;
use crate::search_index::SearchIndexClient;
use crate::vector_store::{index_dir, StoredChunk, VectorStoreCache};

/// Pipeline lifecycle notifications, delivered per document.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    Started {
        document_id: String,
    },
    /// `completed` of `total` processed records handled so far. Skipped
    /// records (blank or ledger hits) count as completed.
    Progress {
        document_id: String,
        completed: usize,
        total: usize,
    },
    Finished {
        document_id: String,
    },
    Failed {
        document_id: String,
        message: String,
    },
}

/// Observer for [`IngestEvent`]s. Delivery is synchronous and must not block.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: IngestEvent);
}

/// Sink that drops every event.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: IngestEvent) {}
}

/// Sink that logs every event through `tracing`.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn emit(&self, event: IngestEvent) {
        match event {
            IngestEvent::Started { document_id } => {
                info!(%document_id, "ingestion started");
            }
            IngestEvent::Progress {
                document_id,
                completed,
                total,
            } => {
                info!(%document_id, completed, total, "ingestion progress");
            }
            IngestEvent::Finished { document_id } => {
                info!(%document_id, "ingestion finished");
            }
            IngestEvent::Failed {
                document_id,
                message,
            } => {
                warn!(%document_id, %message, "ingestion failed");
            }
        }
    }
}

pub struct IngestionPipeline {
    config: Arc<Config>,
    records: Arc<dyn RecordStore>,
    embeddings: Arc<dyn ModelProvider>,
    crawler: Arc<dyn Crawler>,
    discussions: Arc<dyn DiscussionApi>,
    stores: Arc<VectorStoreCache>,
    search_index: Option<Arc<SearchIndexClient>>,
    progress: Arc<dyn ProgressSink>,
    ledger: EmbeddingLedger,
}

impl IngestionPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        records: Arc<dyn RecordStore>,
        embeddings: Arc<dyn ModelProvider>,
        crawler: Arc<dyn Crawler>,
        discussions: Arc<dyn DiscussionApi>,
        stores: Arc<VectorStoreCache>,
        search_index: Option<Arc<SearchIndexClient>>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let ledger = EmbeddingLedger::new(records.clone());
        Self {
            config,
            records,
            embeddings,
            crawler,
            discussions,
            stores,
            search_index,
            progress,
            ledger,
        }
    }

    /// Execute one job to completion.
    #[instrument(skip(self), fields(kb = %job.knowledge_base_id, doc = %job.document_id, update = job.update))]
    pub async fn execute(&self, job: &Job) -> Result<(), IngestError> {
        let kb = self
            .records
            .find_knowledge_base(&job.knowledge_base_id)
            .await?
            .ok_or_else(|| IngestError::NotFound {
                kind: "knowledge base",
                id: job.knowledge_base_id.clone(),
            })?;
        let mut doc = self
            .records
            .find_document(&job.document_id)
            .await?
            .ok_or_else(|| IngestError::NotFound {
                kind: "document",
                id: job.document_id.clone(),
            })?;

        doc.embedding_status = EmbeddingStatus::Uploading;
        doc.error = None;
        doc.started_at = Some(Utc::now());
        doc.finished_at = None;
        self.records.update_document(&doc).await?;
        self.progress.emit(IngestEvent::Started {
            document_id: doc.id.clone(),
        });

        match self.run(job, &kb, &mut doc).await {
            Ok(()) => {
                doc.embedding_status = EmbeddingStatus::Success;
                doc.error = None;
                doc.finished_at = Some(Utc::now());
                self.records.update_document(&doc).await?;
                self.progress.emit(IngestEvent::Finished {
                    document_id: doc.id.clone(),
                });
                info!("document embedded");
                Ok(())
            }
            Err(e) => {
                let message = e.user_message();
                doc.embedding_status = EmbeddingStatus::Error;
                doc.error = Some(message.clone());
                doc.finished_at = Some(Utc::now());
                self.records.update_document(&doc).await?;
                self.progress.emit(IngestEvent::Failed {
                    document_id: doc.id.clone(),
                    message,
                });
                warn!(error = %e, "document embedding failed");
                Err(e)
            }
        }
    }

    /// Persist a failure that happened outside [`execute`](Self::execute),
    /// such as the queue cancelling a run on timeout. There is no run left to
    /// unwind, so this only moves the document to `error` and notifies; the
    /// ledger keeps whatever state the cancelled run reached.
    pub async fn record_failure(&self, job: &Job, error: &IngestError) {
        let message = error.user_message();
        match self.records.find_document(&job.document_id).await {
            Ok(Some(mut doc)) => {
                doc.embedding_status = EmbeddingStatus::Error;
                doc.error = Some(message.clone());
                doc.finished_at = Some(Utc::now());
                if let Err(e) = self.records.update_document(&doc).await {
                    warn!(error = %e, doc = %doc.id, "failed to persist document failure");
                    return;
                }
                self.progress.emit(IngestEvent::Failed {
                    document_id: doc.id.clone(),
                    message,
                });
            }
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, doc = %job.document_id, "failed to load document after job failure");
            }
        }
    }

    async fn run(
        &self,
        job: &Job,
        kb: &KnowledgeBase,
        doc: &mut Document,
    ) -> Result<(), IngestError> {
        let processor = processor_for(&doc.payload);
        let ctx = ProcessorContext {
            config: &self.config,
            crawler: self.crawler.as_ref(),
            discussions: self.discussions.as_ref(),
        };

        processor
            .save_original(&ctx, doc)
            .await
            .map_err(IngestError::Provider)?;
        let records = processor
            .process(&ctx, doc)
            .await
            .map_err(IngestError::Provider)?;

        self.persist_processed(&ctx, doc, &records).await?;

        let store = self.stores.open(&index_dir(&self.config, kb)).await?;

        if job.update {
            let stale = self.records.find_segments(&doc.id).await?;
            // Vectors go first so a crash can only leave orphan rows, never
            // orphan vectors.
            let stale_ids: Vec<String> = stale.iter().map(|s| s.id.clone()).collect();
            store.delete(&stale_ids);
            store.save()?;
            self.records.destroy_segments(&doc.id).await?;
            self.ledger.forget_document(&kb.id, &doc.id).await?;
            self.remove_from_index(&kb.id, stale);
        }

        let markdown = processor.prefers_markdown();
        let total = records.len();
        let mut chunk_index = self.records.find_segments(&doc.id).await?.len() as i64;
        let mut published: Vec<(String, serde_json::Value)> = Vec::new();

        for (completed, record) in records.iter().enumerate() {
            let outcome = self
                .embed_record(kb, doc, record, &store, markdown, &mut chunk_index)
                .await?;
            published.extend(outcome);
            self.progress.emit(IngestEvent::Progress {
                document_id: doc.id.clone(),
                completed: completed + 1,
                total,
            });
        }

        self.publish_to_index(&kb.id, published);
        Ok(())
    }

    /// Embed one processed record, returning the chunks that went into the
    /// store (empty when the record was blank or the ledger skipped it).
    async fn embed_record(
        &self,
        kb: &KnowledgeBase,
        doc: &Document,
        record: &ProcessedRecord,
        store: &crate::vector_store::VectorStore,
        markdown: bool,
        chunk_index: &mut i64,
    ) -> Result<Vec<(String, serde_json::Value)>, IngestError> {
        if record.content.trim().is_empty() {
            return Ok(Vec::new());
        }
        let hash = content_hash(&record.content);
        if self
            .ledger
            .already_embedded(&kb.id, &doc.id, &hash)
            .await?
        {
            return Ok(Vec::new());
        }
        self.ledger.mark_uploading(&kb.id, &doc.id, &hash).await?;

        // Any failure from here on marks the entry `error`, so the next run
        // recomputes the record instead of trusting half-written state.
        match self
            .embed_chunks(kb, doc, record, store, markdown, chunk_index)
            .await
        {
            Ok(published) => {
                self.ledger.mark_success(&kb.id, &doc.id, &hash).await?;
                Ok(published)
            }
            Err(e) => {
                self.ledger.mark_error(&kb.id, &doc.id, &hash).await?;
                Err(e)
            }
        }
    }

    async fn embed_chunks(
        &self,
        kb: &KnowledgeBase,
        doc: &Document,
        record: &ProcessedRecord,
        store: &crate::vector_store::VectorStore,
        markdown: bool,
        chunk_index: &mut i64,
    ) -> Result<Vec<(String, serde_json::Value)>, IngestError> {
        let chunks = chunk_record(record, &self.config.chunking, markdown);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embeddings
            .embed(&texts)
            .await
            .map_err(IngestError::Provider)?;

        let mut ids = Vec::with_capacity(chunks.len());
        let mut stored = Vec::with_capacity(chunks.len());
        let mut published = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let segment = Segment::new(&kb.id, &doc.id, *chunk_index, &chunk.content);
            *chunk_index += 1;
            ids.push(segment.id.clone());
            // Retrieval hydrates document-level fields from this id.
            let mut metadata = chunk.metadata.clone();
            match metadata.as_object_mut() {
                Some(map) => {
                    map.insert("documentId".to_string(), serde_json::json!(doc.id));
                }
                None => metadata = serde_json::json!({ "documentId": doc.id }),
            }
            stored.push(StoredChunk {
                content: chunk.content.clone(),
                metadata: metadata.clone(),
            });
            published.push((chunk.content.clone(), metadata));
            self.records.create_segment(&segment).await?;
        }
        store.add_vectors(vectors, stored, ids)?;
        store.save()?;

        Ok(published)
    }

    async fn persist_processed(
        &self,
        ctx: &ProcessorContext<'_>,
        doc: &mut Document,
        records: &[ProcessedRecord],
    ) -> Result<(), IngestError> {
        let json = serde_json::to_string_pretty(records)
            .context("Failed to serialize processed records")?;
        let path = ctx.processed_path(doc);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, &json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        doc.size_bytes = json.len() as u64;
        self.records.update_document(doc).await?;
        Ok(())
    }

    fn publish_to_index(&self, knowledge_base_id: &str, chunks: Vec<(String, serde_json::Value)>) {
        let Some(index) = &self.search_index else {
            return;
        };
        if chunks.is_empty() {
            return;
        }
        let index = index.clone();
        let kb = knowledge_base_id.to_string();
        tokio::spawn(async move {
            index.publish_chunks(&kb, &chunks).await;
        });
    }

    fn remove_from_index(&self, knowledge_base_id: &str, segments: Vec<Segment>) {
        let Some(index) = &self.search_index else {
            return;
        };
        if segments.is_empty() {
            return;
        }
        let index = index.clone();
        let kb = knowledge_base_id.to_string();
        tokio::spawn(async move {
            index.remove_segments(&kb, &segments).await;
        });
    }
}
