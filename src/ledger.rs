//! Embedding history ledger.
//!
//! A deliberate cache-invalidation mechanism, not a general cache: one row
//! per (knowledge base, document, content hash) records whether that exact
//! chunk content was already embedded successfully, so re-ingestion of an
//! unchanged record skips the embedding provider entirely. Kept separate
//! from the vector store's own state on purpose.

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::models::LedgerStatus;
use crate::records::{history_entry, RecordStore};

pub struct EmbeddingLedger {
    records: Arc<dyn RecordStore>,
}

impl EmbeddingLedger {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// True when this exact content hash already embedded successfully for
    /// the document. Entries are keyed by the hash itself, so a `success`
    /// row can never disagree with the content it was computed from; any
    /// changed content produces a different key and forces recomputation.
    pub async fn already_embedded(
        &self,
        knowledge_base_id: &str,
        document_id: &str,
        content_hash: &str,
    ) -> Result<bool> {
        let entry = self
            .records
            .find_history(knowledge_base_id, document_id, content_hash)
            .await?;
        let skip = matches!(entry, Some(e) if e.status == LedgerStatus::Success);
        if skip {
            debug!(
                knowledge_base_id,
                document_id, content_hash, "ledger hit, skipping re-embedding"
            );
        }
        Ok(skip)
    }

    pub async fn mark_uploading(
        &self,
        knowledge_base_id: &str,
        document_id: &str,
        content_hash: &str,
    ) -> Result<()> {
        self.records
            .upsert_history(&history_entry(
                knowledge_base_id,
                document_id,
                content_hash,
                LedgerStatus::Uploading,
            ))
            .await
    }

    pub async fn mark_success(
        &self,
        knowledge_base_id: &str,
        document_id: &str,
        content_hash: &str,
    ) -> Result<()> {
        self.records
            .upsert_history(&history_entry(
                knowledge_base_id,
                document_id,
                content_hash,
                LedgerStatus::Success,
            ))
            .await
    }

    pub async fn mark_error(
        &self,
        knowledge_base_id: &str,
        document_id: &str,
        content_hash: &str,
    ) -> Result<()> {
        self.records
            .upsert_history(&history_entry(
                knowledge_base_id,
                document_id,
                content_hash,
                LedgerStatus::Error,
            ))
            .await
    }

    /// Drop all entries for a document, forcing full re-embedding next run.
    pub async fn forget_document(
        &self,
        knowledge_base_id: &str,
        document_id: &str,
    ) -> Result<()> {
        self.records
            .destroy_history(knowledge_base_id, document_id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::InMemoryStore;

    #[tokio::test]
    async fn only_success_entries_skip() {
        let records = Arc::new(InMemoryStore::new());
        let ledger = EmbeddingLedger::new(records);

        assert!(!ledger.already_embedded("kb", "d", "h1").await.unwrap());

        ledger.mark_uploading("kb", "d", "h1").await.unwrap();
        assert!(!ledger.already_embedded("kb", "d", "h1").await.unwrap());

        ledger.mark_success("kb", "d", "h1").await.unwrap();
        assert!(ledger.already_embedded("kb", "d", "h1").await.unwrap());

        ledger.mark_error("kb", "d", "h1").await.unwrap();
        assert!(!ledger.already_embedded("kb", "d", "h1").await.unwrap());
    }

    #[tokio::test]
    async fn forget_document_forces_recompute() {
        let records = Arc::new(InMemoryStore::new());
        let ledger = EmbeddingLedger::new(records);
        ledger.mark_success("kb", "d", "h1").await.unwrap();
        ledger.mark_success("kb", "other", "h1").await.unwrap();

        ledger.forget_document("kb", "d").await.unwrap();
        assert!(!ledger.already_embedded("kb", "d", "h1").await.unwrap());
        assert!(ledger.already_embedded("kb", "other", "h1").await.unwrap());
    }
}
