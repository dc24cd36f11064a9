//! `file` documents: an already-uploaded file on disk.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::{ProcessorContext, SourceProcessor};
use crate::extract::extract_file_text;
use crate::models::{Document, ProcessedRecord, SourcePayload};

pub struct FileProcessor;

#[async_trait]
impl SourceProcessor for FileProcessor {
    /// The upload already materialized the bytes; just confirm they exist.
    async fn save_original(&self, _ctx: &ProcessorContext<'_>, doc: &Document) -> Result<()> {
        let SourcePayload::File { stored_path, .. } = &doc.payload else {
            bail!(
                "document {} has a {} payload, expected file",
                doc.id,
                doc.payload.kind()
            );
        };
        if !stored_path.exists() {
            bail!(
                "stored file missing for document {}: {}",
                doc.id,
                stored_path.display()
            );
        }
        Ok(())
    }

    async fn process(
        &self,
        _ctx: &ProcessorContext<'_>,
        doc: &Document,
    ) -> Result<Vec<ProcessedRecord>> {
        let SourcePayload::File {
            stored_path,
            original_name,
        } = &doc.payload
        else {
            bail!(
                "document {} has a {} payload, expected file",
                doc.id,
                doc.payload.kind()
            );
        };
        let content = extract_file_text(stored_path)
            .with_context(|| format!("Failed to extract text from {}", original_name))?;
        Ok(vec![ProcessedRecord::new(content)])
    }
}
