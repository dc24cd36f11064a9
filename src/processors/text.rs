//! `text` documents: the stored body is already the source of truth.

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{ProcessorContext, SourceProcessor};
use crate::models::{Document, ProcessedRecord, SourcePayload};

pub struct TextProcessor;

#[async_trait]
impl SourceProcessor for TextProcessor {
    async fn save_original(&self, _ctx: &ProcessorContext<'_>, _doc: &Document) -> Result<()> {
        Ok(())
    }

    async fn process(
        &self,
        _ctx: &ProcessorContext<'_>,
        doc: &Document,
    ) -> Result<Vec<ProcessedRecord>> {
        let SourcePayload::Text { body } = &doc.payload else {
            bail!(
                "document {} has a {} payload, expected text",
                doc.id,
                doc.payload.kind()
            );
        };
        Ok(vec![ProcessedRecord::new(body.clone())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::processors::thread::tests::NullDiscussionApi;
    use crate::processors::url::tests::NullCrawler;

    #[tokio::test]
    async fn wraps_body_in_single_record() {
        let config = Config::with_data_dir("/tmp/unused");
        let ctx = ProcessorContext {
            config: &config,
            crawler: &NullCrawler,
            discussions: &NullDiscussionApi,
        };
        let doc = Document::new(
            "kb1",
            SourcePayload::Text {
                body: "Hello world".to_string(),
            },
        );
        let records = TextProcessor.process(&ctx, &doc).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].content, "Hello world");
    }

    #[tokio::test]
    async fn rejects_wrong_payload_kind() {
        let config = Config::with_data_dir("/tmp/unused");
        let ctx = ProcessorContext {
            config: &config,
            crawler: &NullCrawler,
            discussions: &NullDiscussionApi,
        };
        let doc = Document::new(
            "kb1",
            SourcePayload::Url {
                url: "https://example.com".to_string(),
                provider: crate::models::CrawlProviderKind::Reader,
            },
        );
        let err = TextProcessor.process(&ctx, &doc).await.unwrap_err();
        assert!(err.to_string().contains("expected text"));
    }
}
