//! Hybrid lexical + vector retrieval with reciprocal-rank fusion.
//!
//! A query runs against two rankers over the same corpus: cosine similarity
//! in the knowledge base's vector store, and a BM25 engine built on the fly
//! from the store's full chunk listing. Per query variant the two ranked
//! lists are fused by weighted RRF; when paraphrase expansion is on, the
//! per-variant lists are fused again across variants, with a consistency
//! bonus for chunks surfaced by more than one list. Chunks with identical
//! normalized text collapse to the highest-scoring occurrence.

use anyhow::Result;
use bm25::{Language, SearchEngineBuilder};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::chunking::content_hash;
use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, ModelProvider};
use crate::vector_store::{StoredChunk, VectorStore};

/// One retrieval result. `metadata` carries `documentId` and
/// `relevanceScore` alongside the chunk's source-specific fields.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub content: String,
    pub metadata: serde_json::Value,
    pub score: f64,
}

pub struct HybridRetriever {
    store: Arc<VectorStore>,
    provider: Arc<dyn ModelProvider>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        store: Arc<VectorStore>,
        provider: Arc<dyn ModelProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
        }
    }

    /// Single-pass hybrid search: one ensemble run plus dedup.
    pub async fn search(&self, query: &str, requested: Option<usize>) -> Result<Vec<SearchHit>> {
        self.run(query, requested, false).await
    }

    /// Multi-query search: the query is paraphrased (bounded by
    /// `paraphrase_count`) and the per-variant rankings are fused.
    pub async fn search_expanded(
        &self,
        query: &str,
        requested: Option<usize>,
    ) -> Result<Vec<SearchHit>> {
        self.run(query, requested, true).await
    }

    #[instrument(skip(self), fields(query_len = query.len(), expand))]
    async fn run(
        &self,
        query: &str,
        requested: Option<usize>,
        expand: bool,
    ) -> Result<Vec<SearchHit>> {
        let candidates = self
            .store
            .similarity_search(&[], self.config.candidate_limit);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }
        let k = requested.unwrap_or(self.config.top_k).min(candidates.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        // BM25 over the same corpus the vector store holds. Internal u64 ids
        // are positions into the candidate listing.
        let docs: Vec<bm25::Document<u64>> = candidates
            .iter()
            .enumerate()
            .map(|(i, (_, chunk))| bm25::Document {
                id: i as u64,
                contents: chunk.content.clone(),
            })
            .collect();
        let engine = SearchEngineBuilder::<u64>::with_documents(Language::English, docs).build();
        let external_ids: Vec<&str> = candidates.iter().map(|(id, _)| id.as_str()).collect();
        let by_id: HashMap<&str, &StoredChunk> = candidates
            .iter()
            .map(|(id, chunk)| (id.as_str(), chunk))
            .collect();

        let variants = if expand {
            self.expand_query(query).await
        } else {
            vec![query.to_string()]
        };

        let mut lists: Vec<Vec<(String, f64)>> = Vec::with_capacity(variants.len());
        for variant in &variants {
            lists.push(self.ensemble(&engine, &external_ids, variant).await?);
        }
        let fused = fuse_lists(&lists, self.config.rrf_k);

        // Dedup by normalized content, keeping the best-scoring occurrence.
        let mut best: HashMap<String, (f64, &str)> = HashMap::new();
        for (id, score) in &fused {
            let Some(chunk) = by_id.get(id.as_str()) else {
                continue;
            };
            let hash = content_hash(&chunk.content);
            let entry = best.entry(hash).or_insert((*score, id.as_str()));
            if *score > entry.0 {
                *entry = (*score, id.as_str());
            }
        }

        let mut hits: Vec<SearchHit> = best
            .into_values()
            .filter_map(|(score, id)| {
                let chunk = by_id.get(id)?;
                let mut metadata = chunk.metadata.clone();
                if let Some(map) = metadata.as_object_mut() {
                    map.insert("relevanceScore".to_string(), serde_json::json!(score));
                }
                Some(SearchHit {
                    content: chunk.content.clone(),
                    metadata,
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    /// Weighted RRF of the lexical and vector rankings for one query
    /// variant, sorted by combined score descending.
    async fn ensemble(
        &self,
        engine: &bm25::SearchEngine<u64>,
        external_ids: &[&str],
        variant: &str,
    ) -> Result<Vec<(String, f64)>> {
        let depth = self.config.candidate_limit;
        let query_vec = embed_query(self.provider.as_ref(), variant).await?;
        let vector_list = self.store.similarity_search_with_score(&query_vec, depth);
        let lexical_list = engine.search(variant, depth);

        let mut scores: HashMap<String, f64> = HashMap::new();
        for (rank, (id, _, _)) in vector_list.iter().enumerate() {
            *scores.entry(id.clone()).or_default() +=
                self.config.vector_weight / (self.config.rrf_k + rank as f64 + 1.0);
        }
        for (rank, result) in lexical_list.iter().enumerate() {
            let Some(id) = external_ids.get(result.document.id as usize) else {
                continue;
            };
            *scores.entry(id.to_string()).or_default() +=
                self.config.lexical_weight / (self.config.rrf_k + rank as f64 + 1.0);
        }

        let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ranked)
    }

    /// The original query plus up to `paraphrase_count` rewrites. Generation
    /// failure degrades to the original query alone, never an error.
    async fn expand_query(&self, query: &str) -> Vec<String> {
        let mut variants = vec![query.to_string()];
        if self.config.paraphrase_count == 0 {
            return variants;
        }
        let prompt = format!(
            "Rewrite the following search query in {} different ways. \
             Reply with one rewrite per line and nothing else.\n\nQuery: {}",
            self.config.paraphrase_count, query
        );
        match self.provider.generate_text(&prompt).await {
            Ok(text) => {
                for line in text.lines() {
                    if variants.len() > self.config.paraphrase_count {
                        break;
                    }
                    let cleaned = line
                        .trim()
                        .trim_start_matches(|c: char| {
                            c.is_ascii_digit() || c == '.' || c == ')' || c == '-' || c == '*'
                        })
                        .trim();
                    if !cleaned.is_empty() && cleaned != query {
                        variants.push(cleaned.to_string());
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "paraphrase generation failed, using original query only");
            }
        }
        variants
    }
}

/// Fuse ranked lists by reciprocal rank, weighting each contribution by the
/// item's own relevance within its list, with a multiplicative bonus for
/// items present in several lists.
fn fuse_lists(lists: &[Vec<(String, f64)>], rrf_k: f64) -> Vec<(String, f64)> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut sources: HashMap<String, usize> = HashMap::new();

    for list in lists {
        for (rank, (id, own_relevance)) in list.iter().enumerate() {
            let relevance = if *own_relevance > 0.0 {
                *own_relevance
            } else {
                1.0
            };
            *scores.entry(id.clone()).or_default() +=
                relevance / (rrf_k + rank as f64 + 1.0);
            *sources.entry(id.clone()).or_default() += 1;
        }
    }

    let mut fused: Vec<(String, f64)> = scores
        .into_iter()
        .map(|(id, score)| {
            let count = sources.get(&id).copied().unwrap_or(1);
            (id, score * (1.0 + 0.1 * count as f64))
        })
        .collect();
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use async_trait::async_trait;
    use serde_json::json;

    /// Embeds along two axes: "hello"-ish texts point one way, everything
    /// else the other, so similarity is predictable.
    struct AxisProvider {
        generation: Option<String>,
    }

    #[async_trait]
    impl ModelProvider for AxisProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
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
            match &self.generation {
                Some(text) => Ok(text.clone()),
                None => anyhow::bail!("generation unavailable"),
            }
        }
    }

    fn store_with(chunks: &[(&str, &str)]) -> (tempfile::TempDir, Arc<VectorStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::load(dir.path()).unwrap();
        let vectors = chunks
            .iter()
            .map(|(_, content)| {
                if content.to_lowercase().contains("hello") {
                    vec![1.0, 0.0]
                } else {
                    vec![0.0, 1.0]
                }
            })
            .collect();
        let stored = chunks
            .iter()
            .map(|(id, content)| StoredChunk {
                content: content.to_string(),
                metadata: json!({ "documentId": format!("doc-{}", id) }),
            })
            .collect();
        let ids = chunks.iter().map(|(id, _)| id.to_string()).collect();
        store.add_vectors(vectors, stored, ids).unwrap();
        (dir, Arc::new(store))
    }

    fn retriever(store: Arc<VectorStore>, generation: Option<String>) -> HybridRetriever {
        HybridRetriever::new(
            store,
            Arc::new(AxisProvider { generation }),
            RetrievalConfig::default(),
        )
    }

    #[tokio::test]
    async fn empty_store_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(VectorStore::load(dir.path()).unwrap());
        let r = retriever(store, None);
        assert!(r.search("anything", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn hybrid_search_finds_matching_chunk() {
        let (_dir, store) = store_with(&[
            ("s1", "Hello world from the first document"),
            ("s2", "Entirely unrelated content about gardening"),
        ]);
        let r = retriever(store, None);
        let hits = r.search("hello", None).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].content.contains("Hello world"));
        assert_eq!(hits[0].metadata["documentId"], "doc-s1");
        assert!(hits[0].metadata["relevanceScore"].as_f64().unwrap() > 0.0);
    }

    #[tokio::test]
    async fn k_capped_by_store_size() {
        let (_dir, store) = store_with(&[("s1", "hello once")]);
        let r = retriever(store, None);
        let hits = r.search("hello", Some(10)).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn identical_content_collapses_to_one_hit() {
        let (_dir, store) = store_with(&[
            ("s1", "Hello   world"),
            ("s2", "Hello world"),
            ("s3", "something else entirely"),
        ]);
        let r = retriever(store, None);
        let hits = r.search("hello world", Some(10)).await.unwrap();
        let hello_hits = hits
            .iter()
            .filter(|h| h.content.to_lowercase().contains("hello"))
            .count();
        assert_eq!(hello_hits, 1);
    }

    #[tokio::test]
    async fn expansion_failure_falls_back_to_original_query() {
        let (_dir, store) = store_with(&[("s1", "hello again"), ("s2", "other text")]);
        let r = retriever(store, None);
        let hits = r.search_expanded("hello", None).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].content.contains("hello"));
    }

    #[tokio::test]
    async fn expansion_uses_generated_variants() {
        let (_dir, store) = store_with(&[("s1", "hello there"), ("s2", "greetings text")]);
        let r = retriever(
            store,
            Some("1. hello greetings\n2. say hello".to_string()),
        );
        let hits = r.search_expanded("hello", None).await.unwrap();
        assert!(!hits.is_empty());
    }

    #[test]
    fn fusion_is_monotonic_in_rank() {
        // "a" tops both lists, "z" is last in both.
        let lists = vec![
            vec![
                ("a".to_string(), 1.0),
                ("m".to_string(), 1.0),
                ("z".to_string(), 1.0),
            ],
            vec![
                ("a".to_string(), 1.0),
                ("m".to_string(), 1.0),
                ("z".to_string(), 1.0),
            ],
        ];
        let fused = fuse_lists(&lists, 60.0);
        let score = |id: &str| fused.iter().find(|(i, _)| i == id).unwrap().1;
        assert!(score("a") > score("z"));
        assert_eq!(fused[0].0, "a");
    }

    #[test]
    fn fusion_rewards_multi_list_presence() {
        let lists = vec![
            vec![("a".to_string(), 1.0), ("b".to_string(), 1.0)],
            vec![("a".to_string(), 1.0)],
        ];
        let fused = fuse_lists(&lists, 60.0);
        let score = |id: &str| fused.iter().find(|(i, _)| i == id).unwrap().1;
        assert!(score("a") > score("b"));
    }
}
