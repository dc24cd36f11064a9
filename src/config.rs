//! TOML configuration with validation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub discussion: DiscussionConfig,
    #[serde(default)]
    pub search_index: SearchIndexConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for per-knowledge-base index directories and
    /// canonical/processed document files.
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

fn default_workers() -> usize {
    2
}
fn default_job_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Overlap carried from the end of one chunk into the next, in characters.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Separator hierarchy tried in order; a hard character split is the
    /// final fallback.
    #[serde(default = "default_separators")]
    pub separators: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            separators: default_separators(),
        }
    }
}

fn default_chunk_size() -> usize {
    800
}
fn default_overlap() -> usize {
    80
}
fn default_separators() -> Vec<String> {
    vec!["\n\n".to_string(), "\n".to_string(), " ".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Paraphrase variants generated in multi-query mode.
    #[serde(default = "default_paraphrase_count")]
    pub paraphrase_count: usize,
    /// Upper bound on candidates fetched per ranked list.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            vector_weight: default_vector_weight(),
            lexical_weight: default_lexical_weight(),
            rrf_k: default_rrf_k(),
            paraphrase_count: default_paraphrase_count(),
            candidate_limit: default_candidate_limit(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_vector_weight() -> f64 {
    0.7
}
fn default_lexical_weight() -> f64 {
    0.3
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_paraphrase_count() -> usize {
    3
}
fn default_candidate_limit() -> usize {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_embedding_url")]
    pub url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Chat model used for paraphrase generation.
    #[serde(default = "default_generation_model")]
    pub generation_model: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            generation_model: default_generation_model(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_embedding_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_generation_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    /// Reader proxy prefixed to the target URL, returns readable text.
    #[serde(default = "default_reader_url")]
    pub reader_url: String,
    /// Scraping endpoint; POSTed the target URL, returns markdown.
    #[serde(default)]
    pub scrape_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            reader_url: default_reader_url(),
            scrape_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_reader_url() -> String {
    "https://r.jina.ai".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DiscussionConfig {
    /// Base URL of the discussion API; empty disables thread ingestion.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page_size() -> u32 {
    50
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SearchIndexConfig {
    /// Base URL of the full-text index service; unset disables sync.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl SearchIndexConfig {
    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.queue.workers == 0 {
        anyhow::bail!("queue.workers must be >= 1");
    }
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.chunk_size");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    let weight_sum = config.retrieval.vector_weight + config.retrieval.lexical_weight;
    if !(0.0..=2.0).contains(&weight_sum) || weight_sum <= 0.0 {
        anyhow::bail!("retrieval weights must be positive");
    }
    if config.retrieval.rrf_k <= 0.0 {
        anyhow::bail!("retrieval.rrf_k must be > 0");
    }
    Ok(())
}

impl Config {
    /// Minimal config rooted at `data_dir`, defaults everywhere else.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage: StorageConfig {
                data_dir: data_dir.into(),
            },
            queue: QueueConfig::default(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            crawl: CrawlConfig::default(),
            discussion: DiscussionConfig::default(),
            search_index: SearchIndexConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config: Config = toml::from_str(
            r#"
[storage]
data_dir = "/tmp/lorebase"
"#,
        )
        .unwrap();
        assert_eq!(config.queue.workers, 2);
        assert_eq!(config.chunking.chunk_size, 800);
        assert!((config.retrieval.vector_weight - 0.7).abs() < 1e-9);
        assert!(!config.search_index.is_enabled());
        validate(&config).unwrap();
    }

    #[test]
    fn rejects_zero_workers() {
        let config: Config = toml::from_str(
            r#"
[storage]
data_dir = "/tmp/lorebase"

[queue]
workers = 0
"#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_overlap_ge_chunk_size() {
        let config: Config = toml::from_str(
            r#"
[storage]
data_dir = "/tmp/lorebase"

[chunking]
chunk_size = 100
overlap = 100
"#,
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }
}
