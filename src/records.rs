//! Generic record store collaborator.
//!
//! The relational storage of knowledge bases, documents, segments, and
//! embedding-history rows lives outside this engine; the pipeline only needs
//! find/create/update/destroy semantics, expressed here as a trait. The
//! bundled [`InMemoryStore`] backs tests and embedded deployments.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::models::{
    Document, EmbeddingHistoryEntry, KnowledgeBase, LedgerStatus, Segment,
};

/// CRUD surface the engine requires from its record storage.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>>;
    async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()>;

    async fn find_document(&self, id: &str) -> Result<Option<Document>>;
    async fn create_document(&self, doc: &Document) -> Result<()>;
    /// Persist the document's current state (status, error, timestamps, size).
    async fn update_document(&self, doc: &Document) -> Result<()>;
    async fn destroy_document(&self, id: &str) -> Result<()>;

    async fn create_segment(&self, segment: &Segment) -> Result<()>;
    async fn find_segments(&self, document_id: &str) -> Result<Vec<Segment>>;
    async fn destroy_segments(&self, document_id: &str) -> Result<()>;

    /// Find the ledger entry for (knowledge base, document, content hash).
    async fn find_history(
        &self,
        knowledge_base_id: &str,
        document_id: &str,
        content_hash: &str,
    ) -> Result<Option<EmbeddingHistoryEntry>>;
    /// Insert or update the entry keyed by (kb, document, hash).
    async fn upsert_history(&self, entry: &EmbeddingHistoryEntry) -> Result<()>;
    async fn destroy_history(&self, knowledge_base_id: &str, document_id: &str) -> Result<()>;
}

/// Convenience constructor for ledger upserts.
pub fn history_entry(
    knowledge_base_id: &str,
    document_id: &str,
    content_hash: &str,
    status: LedgerStatus,
) -> EmbeddingHistoryEntry {
    let now = Utc::now();
    EmbeddingHistoryEntry {
        knowledge_base_id: knowledge_base_id.to_string(),
        document_id: document_id.to_string(),
        content_hash: content_hash.to_string(),
        status,
        created_at: now,
        updated_at: now,
    }
}

type HistoryKey = (String, String, String);

/// In-memory record store for tests and embedded use.
#[derive(Default)]
pub struct InMemoryStore {
    knowledge_bases: RwLock<HashMap<String, KnowledgeBase>>,
    documents: RwLock<HashMap<String, Document>>,
    segments: RwLock<Vec<Segment>>,
    history: RwLock<HashMap<HistoryKey, EmbeddingHistoryEntry>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn find_knowledge_base(&self, id: &str) -> Result<Option<KnowledgeBase>> {
        Ok(self.knowledge_bases.read().unwrap().get(id).cloned())
    }

    async fn create_knowledge_base(&self, kb: &KnowledgeBase) -> Result<()> {
        self.knowledge_bases
            .write()
            .unwrap()
            .insert(kb.id.clone(), kb.clone());
        Ok(())
    }

    async fn find_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(self.documents.read().unwrap().get(id).cloned())
    }

    async fn create_document(&self, doc: &Document) -> Result<()> {
        self.documents
            .write()
            .unwrap()
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn update_document(&self, doc: &Document) -> Result<()> {
        let mut updated = doc.clone();
        updated.updated_at = Utc::now();
        self.documents
            .write()
            .unwrap()
            .insert(doc.id.clone(), updated);
        Ok(())
    }

    async fn destroy_document(&self, id: &str) -> Result<()> {
        self.documents.write().unwrap().remove(id);
        Ok(())
    }

    async fn create_segment(&self, segment: &Segment) -> Result<()> {
        self.segments.write().unwrap().push(segment.clone());
        Ok(())
    }

    async fn find_segments(&self, document_id: &str) -> Result<Vec<Segment>> {
        let mut segments: Vec<Segment> = self
            .segments
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.document_id == document_id)
            .cloned()
            .collect();
        segments.sort_by_key(|s| s.chunk_index);
        Ok(segments)
    }

    async fn destroy_segments(&self, document_id: &str) -> Result<()> {
        self.segments
            .write()
            .unwrap()
            .retain(|s| s.document_id != document_id);
        Ok(())
    }

    async fn find_history(
        &self,
        knowledge_base_id: &str,
        document_id: &str,
        content_hash: &str,
    ) -> Result<Option<EmbeddingHistoryEntry>> {
        let key = (
            knowledge_base_id.to_string(),
            document_id.to_string(),
            content_hash.to_string(),
        );
        Ok(self.history.read().unwrap().get(&key).cloned())
    }

    async fn upsert_history(&self, entry: &EmbeddingHistoryEntry) -> Result<()> {
        let key = (
            entry.knowledge_base_id.clone(),
            entry.document_id.clone(),
            entry.content_hash.clone(),
        );
        let mut history = self.history.write().unwrap();
        match history.get_mut(&key) {
            Some(existing) => {
                existing.status = entry.status;
                existing.updated_at = Utc::now();
            }
            None => {
                history.insert(key, entry.clone());
            }
        }
        Ok(())
    }

    async fn destroy_history(&self, knowledge_base_id: &str, document_id: &str) -> Result<()> {
        self.history
            .write()
            .unwrap()
            .retain(|(kb, doc, _), _| kb != knowledge_base_id || doc != document_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourcePayload;

    #[tokio::test]
    async fn document_crud_round_trip() {
        let store = InMemoryStore::new();
        let doc = Document::new(
            "kb1",
            SourcePayload::Text {
                body: "hello".to_string(),
            },
        );
        store.create_document(&doc).await.unwrap();
        let found = store.find_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(found.knowledge_base_id, "kb1");

        store.destroy_document(&doc.id).await.unwrap();
        assert!(store.find_document(&doc.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn segments_filtered_by_document_and_ordered() {
        let store = InMemoryStore::new();
        for (doc, idx) in [("d1", 1), ("d2", 0), ("d1", 0)] {
            store
                .create_segment(&Segment::new("kb1", doc, idx, format!("seg {idx}")))
                .await
                .unwrap();
        }
        let segs = store.find_segments("d1").await.unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].chunk_index, 0);

        store.destroy_segments("d1").await.unwrap();
        assert!(store.find_segments("d1").await.unwrap().is_empty());
        assert_eq!(store.find_segments("d2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_upsert_updates_status_in_place() {
        let store = InMemoryStore::new();
        let entry = history_entry("kb1", "d1", "abc", LedgerStatus::Uploading);
        store.upsert_history(&entry).await.unwrap();
        let entry = history_entry("kb1", "d1", "abc", LedgerStatus::Success);
        store.upsert_history(&entry).await.unwrap();

        let found = store
            .find_history("kb1", "d1", "abc")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, LedgerStatus::Success);
    }
}
