//! Persistent per-knowledge-base vector store.
//!
//! Each knowledge base owns one directory holding an index file (vectors in
//! insertion order plus the external-id order) and a docstore manifest
//! mapping external ids to serialized chunk records. A directory without the
//! index file is treated as "store not yet initialized" and loads empty.
//!
//! Search is brute-force cosine similarity over the in-memory state; an
//! empty query vector lists all chunks with score 0, which the retriever
//! uses as its "list everything" broad fetch. Mutations only become durable
//! after [`VectorStore::save`]; the pipeline always pairs the two.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::models::KnowledgeBase;

const INDEX_FILE: &str = "index.json";
const DOCSTORE_FILE: &str = "docstore.json";

/// Directory holding a knowledge base's vector index. Bundled read-only
/// collections resolve to their resource path instead of the data dir.
pub fn index_dir(config: &Config, kb: &KnowledgeBase) -> PathBuf {
    match &kb.resource_ref {
        Some(path) => path.clone(),
        None => config
            .storage
            .data_dir
            .join("kb")
            .join(&kb.id)
            .join("index"),
    }
}

/// Serialized chunk record travelling with its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Default, Serialize, Deserialize)]
struct IndexFile {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
}

#[derive(Default)]
struct State {
    /// External ids in internal-index order.
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    mapping: HashMap<String, usize>,
    chunks: HashMap<String, StoredChunk>,
}

impl State {
    fn rebuild_mapping(&mut self) {
        self.mapping = self
            .ids
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();
    }
}

/// One knowledge base's ANN index plus id↔chunk mapping.
pub struct VectorStore {
    dir: PathBuf,
    state: RwLock<State>,
}

impl VectorStore {
    /// Load the store at `dir`, creating an empty one if the index file is
    /// absent. Prefer [`VectorStoreCache::open`] so concurrent loaders share
    /// a single instance per path.
    pub fn load(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;

        let index_path = dir.join(INDEX_FILE);
        let mut state = State::default();
        if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path)
                .with_context(|| format!("Failed to read index file: {}", index_path.display()))?;
            let index: IndexFile =
                serde_json::from_str(&raw).with_context(|| "Corrupt vector index file")?;
            state.ids = index.ids;
            state.vectors = index.vectors;
            state.rebuild_mapping();

            let docstore_path = dir.join(DOCSTORE_FILE);
            if docstore_path.exists() {
                let raw = std::fs::read_to_string(&docstore_path).with_context(|| {
                    format!("Failed to read docstore manifest: {}", docstore_path.display())
                })?;
                state.chunks =
                    serde_json::from_str(&raw).with_context(|| "Corrupt docstore manifest")?;
            }
        } else {
            debug!(dir = %dir.display(), "vector store not initialized, starting empty");
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            state: RwLock::new(state),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append vectors with their chunk records under the given external ids.
    pub fn add_vectors(
        &self,
        vectors: Vec<Vec<f32>>,
        chunks: Vec<StoredChunk>,
        ids: Vec<String>,
    ) -> Result<()> {
        if vectors.len() != chunks.len() || vectors.len() != ids.len() {
            anyhow::bail!(
                "add_vectors length mismatch: {} vectors, {} chunks, {} ids",
                vectors.len(),
                chunks.len(),
                ids.len()
            );
        }
        let mut state = self.state.write().unwrap();
        for ((vector, chunk), id) in vectors.into_iter().zip(chunks).zip(ids) {
            if let Some(&existing) = state.mapping.get(&id) {
                state.vectors[existing] = vector;
            } else {
                let idx = state.ids.len();
                state.ids.push(id.clone());
                state.vectors.push(vector);
                state.mapping.insert(id.clone(), idx);
            }
            state.chunks.insert(id, chunk);
        }
        Ok(())
    }

    /// Remove the given external ids. Ids not present are ignored.
    pub fn delete(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let victims: std::collections::HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut state = self.state.write().unwrap();
        let keep: Vec<usize> = (0..state.ids.len())
            .filter(|&i| !victims.contains(state.ids[i].as_str()))
            .collect();
        let kept_ids: Vec<String> = keep.iter().map(|&i| state.ids[i].clone()).collect();
        let kept_vectors: Vec<Vec<f32>> = keep.iter().map(|&i| state.vectors[i].clone()).collect();
        state.ids = kept_ids;
        state.vectors = kept_vectors;
        state.chunks.retain(|id, _| !victims.contains(id.as_str()));
        state.rebuild_mapping();
    }

    /// Persist the index and docstore manifest to disk.
    pub fn save(&self) -> Result<()> {
        let (index_json, docstore_json) = {
            let state = self.state.read().unwrap();
            let index = IndexFile {
                ids: state.ids.clone(),
                vectors: state.vectors.clone(),
            };
            (
                serde_json::to_string(&index)?,
                serde_json::to_string(&state.chunks)?,
            )
        };
        std::fs::write(self.dir.join(INDEX_FILE), index_json)
            .with_context(|| format!("Failed to write index file in {}", self.dir.display()))?;
        std::fs::write(self.dir.join(DOCSTORE_FILE), docstore_json)
            .with_context(|| format!("Failed to write docstore in {}", self.dir.display()))?;
        Ok(())
    }

    /// External id → internal index snapshot.
    pub fn mapping(&self) -> HashMap<String, usize> {
        self.state.read().unwrap().mapping.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top-`k` chunks by cosine similarity. An empty store yields no results;
    /// an empty query vector lists chunks in insertion order with score 0.
    pub fn similarity_search_with_score(
        &self,
        query: &[f32],
        k: usize,
    ) -> Vec<(String, StoredChunk, f32)> {
        let state = self.state.read().unwrap();
        let mut results: Vec<(String, StoredChunk, f32)> = state
            .ids
            .iter()
            .enumerate()
            .filter_map(|(i, id)| {
                let chunk = state.chunks.get(id)?.clone();
                let score = if query.is_empty() {
                    0.0
                } else {
                    cosine_similarity(query, &state.vectors[i])
                };
                Some((id.clone(), chunk, score))
            })
            .collect();
        if !query.is_empty() {
            results.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
        }
        results.truncate(k);
        results
    }

    /// [`Self::similarity_search_with_score`] without the scores.
    pub fn similarity_search(&self, query: &[f32], k: usize) -> Vec<(String, StoredChunk)> {
        self.similarity_search_with_score(query, k)
            .into_iter()
            .map(|(id, chunk, _)| (id, chunk))
            .collect()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// Path-keyed cache of live [`VectorStore`] instances.
///
/// Concurrent opens of the same path share one construction: the map is held
/// behind an async mutex for the duration of a load, so a second caller waits
/// for the first instead of building a duplicate index.
#[derive(Default)]
pub struct VectorStoreCache {
    inner: Mutex<HashMap<PathBuf, Arc<VectorStore>>>,
}

impl VectorStoreCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reuse) the store at `dir`.
    pub async fn open(&self, dir: &Path) -> Result<Arc<VectorStore>> {
        let mut cache = self.inner.lock().await;
        if let Some(store) = cache.get(dir) {
            return Ok(store.clone());
        }
        let store = Arc::new(VectorStore::load(dir)?);
        cache.insert(dir.to_path_buf(), store.clone());
        Ok(store)
    }

    /// Drop the cached handle for `dir`, e.g. after knowledge-base deletion.
    pub async fn evict(&self, dir: &Path) {
        self.inner.lock().await.remove(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(content: &str) -> StoredChunk {
        StoredChunk {
            content: content.to_string(),
            metadata: json!({}),
        }
    }

    #[test]
    fn empty_store_returns_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::load(dir.path()).unwrap();
        assert!(store.is_empty());
        assert!(store.similarity_search(&[1.0, 0.0], 5).is_empty());
        assert!(store.mapping().is_empty());
    }

    #[test]
    fn add_save_load_round_trips_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::load(dir.path()).unwrap();
        store
            .add_vectors(
                vec![vec![1.0, 0.0], vec![0.0, 1.0]],
                vec![chunk("alpha"), chunk("beta")],
                vec!["s1".to_string(), "s2".to_string()],
            )
            .unwrap();
        store.save().unwrap();

        let reloaded = VectorStore::load(dir.path()).unwrap();
        assert_eq!(reloaded.mapping(), store.mapping());
        assert_eq!(reloaded.len(), 2);
        let hit = &reloaded.similarity_search_with_score(&[1.0, 0.0], 1)[0];
        assert_eq!(hit.0, "s1");
        assert_eq!(hit.1.content, "alpha");
        assert!(hit.2 > 0.99);
    }

    #[test]
    fn delete_removes_ids_from_mapping() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::load(dir.path()).unwrap();
        store
            .add_vectors(
                vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]],
                vec![chunk("a"), chunk("b"), chunk("c")],
                vec!["s1".into(), "s2".into(), "s3".into()],
            )
            .unwrap();
        store.delete(&["s2".to_string()]);
        let mapping = store.mapping();
        assert_eq!(mapping.len(), 2);
        assert!(mapping.contains_key("s1"));
        assert!(!mapping.contains_key("s2"));
        // Remaining internal indices stay dense.
        let mut idx: Vec<usize> = mapping.values().copied().collect();
        idx.sort_unstable();
        assert_eq!(idx, vec![0, 1]);
    }

    #[test]
    fn empty_query_lists_all_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::load(dir.path()).unwrap();
        store
            .add_vectors(
                vec![vec![1.0], vec![2.0]],
                vec![chunk("a"), chunk("b")],
                vec!["s1".into(), "s2".into()],
            )
            .unwrap();
        let all = store.similarity_search(&[], 100);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, "s1");
    }

    #[tokio::test]
    async fn cache_shares_one_instance_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let cache = VectorStoreCache::new();
        let a = cache.open(dir.path()).await.unwrap();
        let b = cache.open(dir.path()).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
