//! The per-job enrichment pipeline:
//! read record → fetch page → extract metadata → merge → update record.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use linkshelf_scraper::MetadataSource;
use linkshelf_shared::{
    Cancellation, EnrichmentJob, LinkshelfError, Record, RecordId, Result, WorkerConfig,
};
use linkshelf_storage::RecordRepository;
use tracing::{Span, debug, instrument};

use crate::merge::merge;

/// Runs the enrichment pipeline for a single record.
#[derive(Clone)]
pub struct Enricher {
    repository: Arc<dyn RecordRepository>,
    source: Arc<dyn MetadataSource>,
    repository_timeout: Duration,
    fetch_timeout: Duration,
}

impl Enricher {
    pub fn new(
        repository: Arc<dyn RecordRepository>,
        source: Arc<dyn MetadataSource>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            repository,
            source,
            repository_timeout: config.repository_timeout,
            fetch_timeout: config.fetch_timeout,
        }
    }

    /// Decode a job payload and enrich the record it references.
    ///
    /// Malformed payloads fail before any repository call.
    pub async fn process_job(&self, body: &[u8], cancel: &Cancellation) -> Result<Record> {
        let job = EnrichmentJob::decode(body)?;
        let id = job.record_id()?;
        self.enrich(&id, cancel).await
    }

    /// Enrich one record in place and return the stored result.
    #[instrument(skip_all, fields(record_id = %id, url = tracing::field::Empty))]
    pub async fn enrich(&self, id: &RecordId, cancel: &Cancellation) -> Result<Record> {
        let record = self
            .with_deadline("record lookup", self.repository.get_record(id))
            .await?
            .ok_or_else(|| LinkshelfError::not_found(id))?;
        Span::current().record("url", record.url.as_str());

        let extracted = self
            .source
            .fetch_metadata(&record.url, self.fetch_timeout, cancel)
            .await?;
        debug!(
            title = %extracted.title,
            tags = extracted.tags.len(),
            "metadata extracted"
        );

        let update = merge(&record, &extracted);
        self.with_deadline("record update", self.repository.update_record(&update))
            .await
    }

    async fn with_deadline<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::time::timeout(self.repository_timeout, fut)
            .await
            .map_err(|_| LinkshelfError::Timeout {
                operation,
                millis: self.repository_timeout.as_millis() as u64,
            })?
    }
}
