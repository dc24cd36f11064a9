//! End-to-end engine tests with in-memory records, temp-dir vector stores,
//! and a deterministic mock model provider.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lorebase::config::Config;
use lorebase::context::EngineContext;
use lorebase::embedding::ModelProvider;
use lorebase::models::{
    CrawlProviderKind, Document, EmbeddingStatus, Job, KnowledgeBase, SourcePayload,
    ThreadSelector,
};
use lorebase::processors::{Crawler, DiscussionApi, ThreadComment, ThreadPost};
use lorebase::records::{InMemoryStore, RecordStore};
use lorebase::vector_store::index_dir;

/// Deterministic provider: texts mentioning "hello" embed along one axis,
/// everything else along the other. Counts embed calls so tests can assert
/// the ledger short-circuits.
struct CountingProvider {
    embed_calls: AtomicUsize,
    delay: Duration,
}

impl CountingProvider {
    fn new() -> Self {
        Self {
            embed_calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            embed_calls: AtomicUsize::new(0),
            delay,
        }
    }

    fn calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for CountingProvider {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(texts
            .iter()
            .map(|t| {
                if t.to_lowercase().contains("hello") {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                }
            })
            .collect())
    }

    async fn generate_text(&self, _prompt: &str) -> Result<String> {
        anyhow::bail!("no generation in these tests")
    }
}

struct FailingCrawler;

#[async_trait]
impl Crawler for FailingCrawler {
    async fn crawl(&self, url: &str, _provider: CrawlProviderKind) -> Result<String> {
        anyhow::bail!("crawl refused for {}", url)
    }
}

struct NoDiscussions;

#[async_trait]
impl DiscussionApi for NoDiscussions {
    async fn fetch_thread(&self, id: &str, _locale: Option<&str>) -> Result<ThreadPost> {
        anyhow::bail!("no thread {}", id)
    }

    async fn fetch_comments(
        &self,
        id: &str,
        _page: usize,
        _page_size: usize,
    ) -> Result<Vec<ThreadComment>> {
        anyhow::bail!("no comments for {}", id)
    }

    async fn list_threads(
        &self,
        _selector: &ThreadSelector,
        _page: usize,
        _page_size: usize,
    ) -> Result<Vec<String>> {
        anyhow::bail!("no listing")
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    ctx: EngineContext,
    records: Arc<InMemoryStore>,
    provider: Arc<CountingProvider>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn harness_full(provider: CountingProvider, tweak: fn(&mut Config)) -> Harness {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_dir(dir.path());
    tweak(&mut config);
    let records = Arc::new(InMemoryStore::new());
    let provider = Arc::new(provider);
    let ctx = EngineContext::new(
        config,
        records.clone(),
        provider.clone(),
        Arc::new(FailingCrawler),
        Arc::new(NoDiscussions),
        None,
        None,
    );
    Harness {
        _dir: dir,
        ctx,
        records,
        provider,
    }
}

fn harness_with(provider: CountingProvider) -> Harness {
    harness_full(provider, |_| {})
}

fn harness() -> Harness {
    harness_with(CountingProvider::new())
}

async fn seed_text(h: &Harness, kb: &str, body: &str) -> Document {
    if h.records.find_knowledge_base(kb).await.unwrap().is_none() {
        h.records
            .create_knowledge_base(&KnowledgeBase::new(kb))
            .await
            .unwrap();
    }
    let doc = Document::new(
        kb,
        SourcePayload::Text {
            body: body.to_string(),
        },
    );
    h.records.create_document(&doc).await.unwrap();
    doc
}

#[tokio::test]
async fn text_ingest_then_search_hits() {
    let h = harness();
    let doc = seed_text(&h, "kb1", "Hello world").await;

    h.ctx
        .pipeline()
        .execute(&Job::new("kb1", &doc.id))
        .await
        .unwrap();

    let stored = h.records.find_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.embedding_status, EmbeddingStatus::Success);
    assert!(stored.size_bytes > 0);
    assert_eq!(h.records.find_segments(&doc.id).await.unwrap().len(), 1);

    let hits = h.ctx.search("kb1", "hello", None).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits[0].content.contains("Hello world"));
    assert_eq!(hits[0].metadata["documentId"], doc.id);
}

#[tokio::test]
async fn second_ingest_of_unchanged_content_skips_embedding() {
    let h = harness();
    let doc = seed_text(&h, "kb1", "Hello world, stable content").await;
    let pipeline = h.ctx.pipeline();

    pipeline.execute(&Job::new("kb1", &doc.id)).await.unwrap();
    let calls_after_first = h.provider.calls();
    let segments_after_first = h.records.find_segments(&doc.id).await.unwrap().len();

    pipeline.execute(&Job::new("kb1", &doc.id)).await.unwrap();
    assert_eq!(h.provider.calls(), calls_after_first);
    assert_eq!(
        h.records.find_segments(&doc.id).await.unwrap().len(),
        segments_after_first
    );
}

#[tokio::test]
async fn update_leaves_no_stale_ids_in_mapping() {
    let h = harness();
    let mut doc = seed_text(&h, "kb1", "Hello first revision").await;
    let pipeline = h.ctx.pipeline();
    pipeline.execute(&Job::new("kb1", &doc.id)).await.unwrap();

    let old_ids: Vec<String> = h
        .records
        .find_segments(&doc.id)
        .await
        .unwrap()
        .iter()
        .map(|s| s.id.clone())
        .collect();
    assert!(!old_ids.is_empty());

    doc.payload = SourcePayload::Text {
        body: "Hello second revision".to_string(),
    };
    h.records.update_document(&doc).await.unwrap();
    pipeline.execute(&Job::update("kb1", &doc.id)).await.unwrap();

    let kb = h.records.find_knowledge_base("kb1").await.unwrap().unwrap();
    let store = h
        .ctx
        .stores
        .open(&index_dir(&h.ctx.config, &kb))
        .await
        .unwrap();
    let mapping = store.mapping();
    for old in &old_ids {
        assert!(!mapping.contains_key(old), "stale id {} survived update", old);
    }
    let new_segments = h.records.find_segments(&doc.id).await.unwrap();
    assert!(!new_segments.is_empty());
    for seg in &new_segments {
        assert!(mapping.contains_key(&seg.id));
    }
}

#[tokio::test]
async fn unsupported_file_extension_still_succeeds() {
    let h = harness();
    h.records
        .create_knowledge_base(&KnowledgeBase::new("kb1"))
        .await
        .unwrap();
    let upload_dir = tempfile::tempdir().unwrap();
    let path = upload_dir.path().join("data.xyz");
    std::fs::write(&path, "hello from an unknown format").unwrap();

    let doc = Document::new(
        "kb1",
        SourcePayload::File {
            stored_path: path,
            original_name: "data.xyz".to_string(),
        },
    );
    h.records.create_document(&doc).await.unwrap();
    h.ctx
        .pipeline()
        .execute(&Job::new("kb1", &doc.id))
        .await
        .unwrap();

    let stored = h.records.find_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.embedding_status, EmbeddingStatus::Success);
    assert_eq!(h.records.find_segments(&doc.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn crawl_failure_marks_document_error() {
    let h = harness();
    h.records
        .create_knowledge_base(&KnowledgeBase::new("kb1"))
        .await
        .unwrap();
    let doc = Document::new(
        "kb1",
        SourcePayload::Url {
            url: "https://example.com/page".to_string(),
            provider: CrawlProviderKind::Reader,
        },
    );
    h.records.create_document(&doc).await.unwrap();

    let err = h
        .ctx
        .pipeline()
        .execute(&Job::new("kb1", &doc.id))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("crawl refused"));

    let stored = h.records.find_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.embedding_status, EmbeddingStatus::Error);
    assert!(stored.error.as_deref().unwrap().contains("crawl refused"));
    assert!(h.records.find_segments(&doc.id).await.unwrap().is_empty());
    assert_eq!(h.provider.calls(), 0);
}

#[tokio::test]
async fn search_on_empty_knowledge_base_returns_empty() {
    let h = harness();
    h.records
        .create_knowledge_base(&KnowledgeBase::new("kb1"))
        .await
        .unwrap();
    let hits = h.ctx.search("kb1", "anything", None).await.unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn queue_executes_duplicate_job_once() {
    let h = harness_with(CountingProvider::slow(Duration::from_millis(200)));
    let doc = seed_text(&h, "kb1", "Hello queued world").await;
    let queue = h.ctx.start_queue();

    let first = queue.enqueue_if_absent(Job::new("kb1", &doc.id)).unwrap();
    let second = queue.enqueue_if_absent(Job::new("kb1", &doc.id)).unwrap();
    assert!(first);
    assert!(!second, "duplicate job should be rejected while in flight");

    queue.shutdown().await;
    assert_eq!(h.provider.calls(), 1);
    let stored = h.records.find_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.embedding_status, EmbeddingStatus::Success);
}

#[tokio::test]
async fn timed_out_job_marks_document_error() {
    let h = harness_full(CountingProvider::slow(Duration::from_secs(5)), |c| {
        c.queue.job_timeout_secs = 1;
    });
    let doc = seed_text(&h, "kb1", "Hello slow world").await;
    let queue = h.ctx.start_queue();

    assert!(queue.enqueue_if_absent(Job::new("kb1", &doc.id)).unwrap());
    queue.shutdown().await;

    let stored = h.records.find_document(&doc.id).await.unwrap().unwrap();
    assert_eq!(stored.embedding_status, EmbeddingStatus::Error);
    assert!(stored.error.as_deref().unwrap().contains("timed out"));
    assert!(h.records.find_segments(&doc.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn remove_document_clears_vectors_segments_and_files() {
    let h = harness();
    let doc = seed_text(&h, "kb1", "Hello removable").await;
    h.ctx
        .pipeline()
        .execute(&Job::new("kb1", &doc.id))
        .await
        .unwrap();

    h.ctx.remove_document("kb1", &doc.id).await.unwrap();

    assert!(h.records.find_document(&doc.id).await.unwrap().is_none());
    assert!(h.records.find_segments(&doc.id).await.unwrap().is_empty());
    let kb = h.records.find_knowledge_base("kb1").await.unwrap().unwrap();
    let store = h
        .ctx
        .stores
        .open(&index_dir(&h.ctx.config, &kb))
        .await
        .unwrap();
    assert!(store.mapping().is_empty());
}
