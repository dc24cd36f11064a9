//! # Lorebase
//!
//! A knowledge-base ingestion and hybrid retrieval engine.
//!
//! Lorebase turns heterogeneous sources (uploaded files, plain text, crawled
//! URLs, paginated discussion threads) into per-knowledge-base vector
//! indexes, and answers queries with hybrid lexical + semantic search fused
//! by reciprocal rank.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌─────────────┐
//! │  Processors  │──▶│  Pipeline    │──▶│ VectorStore │
//! │ file/text/   │   │ chunk+embed │   │ per-KB dir  │
//! │ url/thread   │   │ +ledger     │   └──────┬──────┘
//! └──────────────┘   └──────┬──────┘          │
//!         ▲                 │                 ▼
//!    ┌────┴────┐      ┌─────▼──────┐   ┌───────────┐
//!    │ JobQueue │      │ full-text  │   │ Retriever │
//!    │ workers  │      │ index sync │   │ BM25+RRF  │
//!    └─────────┘      └────────────┘   └───────────┘
//! ```
//!
//! Jobs name a (knowledge base, document) pair and run through the queue's
//! worker pool. Each document's processed records are chunked, embedded
//! unless the embedding ledger has already seen their content hash, and
//! written to the knowledge base's vector store together with Segment rows.
//! Retrieval fetches the store's corpus, ranks it lexically and by cosine
//! similarity, and fuses the rankings.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy at the pipeline/queue boundary |
//! | [`records`] | Record store trait + in-memory implementation |
//! | [`vector_store`] | Per-knowledge-base persistent vector index |
//! | [`ledger`] | Content-hash embedding history |
//! | [`chunking`] | Recursive splitting with overlap |
//! | [`extract`] | PDF/DOCX/plain-text extraction |
//! | [`embedding`] | Embedding/LLM provider abstraction |
//! | [`processors`] | Source-kind processors |
//! | [`pipeline`] | Ingestion state machine + progress events |
//! | [`queue`] | Job queue with worker pool and dedup |
//! | [`retriever`] | Hybrid BM25 + vector retrieval |
//! | [`search_index`] | Best-effort external full-text index sync |
//! | [`context`] | Explicit collaborator wiring |

pub mod chunking;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ledger;
pub mod models;
pub mod pipeline;
pub mod processors;
pub mod queue;
pub mod records;
pub mod retriever;
pub mod search_index;
pub mod vector_store;

pub use config::{load_config, Config};
pub use context::EngineContext;
pub use error::IngestError;
pub use models::{Document, Job, KnowledgeBase, Segment, SourcePayload};
pub use retriever::{HybridRetriever, SearchHit};
