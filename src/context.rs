//! Explicit engine context.
//!
//! Every collaborator (record store, model provider, crawler, discussion
//! API, vector store cache, optional full-text index, progress sink) is
//! passed in here once and threaded through explicitly; nothing in the crate
//! reaches for a global singleton. The context is the seam embedders use to
//! swap real collaborators for fakes.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::embedding::ModelProvider;
use crate::error::IngestError;
use crate::models::KnowledgeBase;
use crate::pipeline::{IngestionPipeline, NoProgress, ProgressSink};
use crate::processors::{Crawler, DiscussionApi};
use crate::queue::JobQueue;
use crate::records::RecordStore;
use crate::retriever::{HybridRetriever, SearchHit};
use crate::search_index::SearchIndexClient;
use crate::vector_store::{index_dir, VectorStoreCache};

pub struct EngineContext {
    pub config: Arc<Config>,
    pub records: Arc<dyn RecordStore>,
    pub embeddings: Arc<dyn ModelProvider>,
    pub crawler: Arc<dyn Crawler>,
    pub discussions: Arc<dyn DiscussionApi>,
    pub stores: Arc<VectorStoreCache>,
    pub search_index: Option<Arc<SearchIndexClient>>,
    pub progress: Arc<dyn ProgressSink>,
}

impl EngineContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        records: Arc<dyn RecordStore>,
        embeddings: Arc<dyn ModelProvider>,
        crawler: Arc<dyn Crawler>,
        discussions: Arc<dyn DiscussionApi>,
        search_index: Option<Arc<SearchIndexClient>>,
        progress: Option<Arc<dyn ProgressSink>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            records,
            embeddings,
            crawler,
            discussions,
            stores: Arc::new(VectorStoreCache::new()),
            search_index,
            progress: progress.unwrap_or_else(|| Arc::new(NoProgress)),
        }
    }

    /// The ingestion pipeline over this context's collaborators.
    pub fn pipeline(&self) -> Arc<IngestionPipeline> {
        Arc::new(IngestionPipeline::new(
            self.config.clone(),
            self.records.clone(),
            self.embeddings.clone(),
            self.crawler.clone(),
            self.discussions.clone(),
            self.stores.clone(),
            self.search_index.clone(),
            self.progress.clone(),
        ))
    }

    /// Start the worker pool configured in `[queue]`.
    pub fn start_queue(&self) -> JobQueue {
        JobQueue::start(self.pipeline(), &self.config.queue)
    }

    /// A retriever over the knowledge base's vector store.
    pub async fn retriever(&self, knowledge_base_id: &str) -> Result<HybridRetriever, IngestError> {
        let kb = self.require_knowledge_base(knowledge_base_id).await?;
        let store = self.stores.open(&index_dir(&self.config, &kb)).await?;
        Ok(HybridRetriever::new(
            store,
            self.embeddings.clone(),
            self.config.retrieval.clone(),
        ))
    }

    /// Hybrid search over one knowledge base.
    pub async fn search(
        &self,
        knowledge_base_id: &str,
        query: &str,
        requested: Option<usize>,
    ) -> Result<Vec<SearchHit>, IngestError> {
        let retriever = self.retriever(knowledge_base_id).await?;
        retriever
            .search(query, requested)
            .await
            .map_err(IngestError::Other)
    }

    /// Remove a document and everything derived from it: vectors first,
    /// then segments and ledger rows, then the index entries and files.
    pub async fn remove_document(
        &self,
        knowledge_base_id: &str,
        document_id: &str,
    ) -> Result<(), IngestError> {
        let kb = self.require_knowledge_base(knowledge_base_id).await?;
        let doc = self
            .records
            .find_document(document_id)
            .await?
            .ok_or_else(|| IngestError::NotFound {
                kind: "document",
                id: document_id.to_string(),
            })?;

        let segments = self.records.find_segments(&doc.id).await?;
        let store = self.stores.open(&index_dir(&self.config, &kb)).await?;
        let ids: Vec<String> = segments.iter().map(|s| s.id.clone()).collect();
        store.delete(&ids);
        store.save()?;
        self.records.destroy_segments(&doc.id).await?;
        self.records.destroy_history(&kb.id, &doc.id).await?;

        if let Some(index) = &self.search_index {
            let index = index.clone();
            let kb_id = kb.id.clone();
            tokio::spawn(async move {
                index.remove_segments(&kb_id, &segments).await;
            });
        }

        self.records.destroy_document(&doc.id).await?;
        let doc_dir = self.document_dir(&kb.id, &doc.id);
        if let Err(e) = tokio::fs::remove_dir_all(&doc_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %doc_dir.display(), error = %e, "failed to remove document files");
            }
        }
        Ok(())
    }

    async fn require_knowledge_base(&self, id: &str) -> Result<KnowledgeBase, IngestError> {
        self.records
            .find_knowledge_base(id)
            .await?
            .ok_or_else(|| IngestError::NotFound {
                kind: "knowledge base",
                id: id.to_string(),
            })
    }

    fn document_dir(&self, knowledge_base_id: &str, document_id: &str) -> PathBuf {
        self.config
            .storage
            .data_dir
            .join("kb")
            .join(knowledge_base_id)
            .join("docs")
            .join(document_id)
    }
}
