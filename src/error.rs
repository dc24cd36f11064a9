//! Error taxonomy at the pipeline/queue boundary.
//!
//! Internals use `anyhow` for step-level plumbing; this enum classifies the
//! failure once it reaches the job queue so logs can distinguish validation
//! problems, vanished rows, provider failures, and timeouts.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Malformed job payload; rejected synchronously at enqueue time.
    #[error("invalid job: {0}")]
    Validation(String),

    /// Document or knowledge base vanished between enqueue and execution.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Embedding, crawl, or LLM call failed.
    #[error("provider failure: {0}")]
    Provider(#[source] anyhow::Error),

    /// The job exceeded its wall-clock budget.
    #[error("job timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// Message persisted onto the document for external observers.
    pub fn user_message(&self) -> String {
        match self {
            IngestError::Provider(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}
