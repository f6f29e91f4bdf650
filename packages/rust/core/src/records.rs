//! Record management: the create path that triggers enrichment, plus the
//! plain read/update/delete operations.

use std::sync::Arc;

use linkshelf_shared::{
    LinkshelfError, NewRecord, PublishMode, Record, RecordId, Result, UpdateRecord,
};
use linkshelf_storage::Storage;
use tracing::{info, instrument, warn};
use url::Url;

use crate::publisher::JobPublisher;

/// Record operations backed by [`Storage`].
pub struct RecordService {
    storage: Arc<Storage>,
    publisher: JobPublisher,
    mode: PublishMode,
}

impl RecordService {
    pub fn new(storage: Arc<Storage>, publisher: JobPublisher, mode: PublishMode) -> Self {
        Self {
            storage,
            publisher,
            mode,
        }
    }

    /// Store a new record and schedule its enrichment.
    ///
    /// In [`PublishMode::Direct`] the job is published after the insert; if
    /// that fails the record stays stored and [`LinkshelfError::PublishFailed`]
    /// is returned. In [`PublishMode::Outbox`] the job is recorded in the same
    /// transaction as the record and forwarded later by the outbox relay.
    #[instrument(skip_all, fields(url = %new.url, mode = ?self.mode))]
    pub async fn create(&self, new: &NewRecord) -> Result<Record> {
        validate_url(&new.url)?;

        let record = match self.mode {
            PublishMode::Direct => {
                let record = self.storage.insert_record(new).await?;
                if let Err(e) = self.publisher.publish(&record.id).await {
                    warn!(id = %record.id, error = %e, "record stored but job not published");
                    return Err(LinkshelfError::PublishFailed {
                        id: record.id.to_string(),
                        message: e.to_string(),
                    });
                }
                record
            }
            PublishMode::Outbox => {
                self.storage
                    .insert_record_with_outbox(new, self.publisher.queue())
                    .await?
            }
        };

        info!(id = %record.id, "record created");
        Ok(record)
    }

    /// Fetch a record, failing with `NotFound` when it does not exist.
    pub async fn get(&self, id: &RecordId) -> Result<Record> {
        self.storage
            .find_record(id)
            .await?
            .ok_or_else(|| LinkshelfError::not_found(id))
    }

    /// List records, optionally for one user.
    pub async fn list(&self, user_id: Option<&str>) -> Result<Vec<Record>> {
        self.storage.list_records(user_id).await
    }

    /// Replace a record's mutable fields. Never creates a record.
    pub async fn update(&self, update: &UpdateRecord) -> Result<Record> {
        validate_url(&update.url)?;
        self.storage.replace_record(update).await
    }

    /// Delete a record, failing with `NotFound` when it does not exist.
    pub async fn delete(&self, id: &RecordId) -> Result<()> {
        if self.storage.delete_record(id).await? {
            info!(%id, "record deleted");
            Ok(())
        } else {
            Err(LinkshelfError::not_found(id))
        }
    }
}

fn validate_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| LinkshelfError::validation(format!("invalid URL '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(LinkshelfError::validation(format!(
            "unsupported URL scheme '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_storage;
    use linkshelf_broker::MemoryBroker;

    const QUEUE: &str = "link_enrichment";

    async fn service(mode: PublishMode) -> (RecordService, MemoryBroker, Arc<Storage>) {
        let broker = MemoryBroker::new();
        let storage = Arc::new(temp_storage().await);
        let publisher = JobPublisher::new(Arc::new(broker.clone()), QUEUE);
        (
            RecordService::new(storage.clone(), publisher, mode),
            broker,
            storage,
        )
    }

    fn new_record(url: &str) -> NewRecord {
        NewRecord {
            url: url.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn direct_create_publishes_job() {
        let (svc, broker, _) = service(PublishMode::Direct).await;
        let record = svc.create(&new_record("https://example.com")).await.unwrap();

        assert_eq!(broker.published(QUEUE), 1);
        assert_eq!(svc.get(&record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn direct_publish_failure_keeps_record() {
        let (svc, broker, storage) = service(PublishMode::Direct).await;
        broker.close(QUEUE);

        let err = svc
            .create(&new_record("https://example.com"))
            .await
            .unwrap_err();
        let id = match err {
            LinkshelfError::PublishFailed { id, .. } => id,
            other => panic!("expected PublishFailed, got {other:?}"),
        };

        let id = RecordId::parse(&id).unwrap();
        let stored = storage.find_record(&id).await.unwrap().expect("record persisted");
        assert_eq!(stored.title, "");
    }

    #[tokio::test]
    async fn outbox_create_defers_publish() {
        let (svc, broker, storage) = service(PublishMode::Outbox).await;
        let record = svc.create(&new_record("https://example.com")).await.unwrap();

        assert_eq!(broker.published(QUEUE), 0);
        let pending = storage.pending_outbox(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].record_id, record.id.to_string());
    }

    #[tokio::test]
    async fn invalid_urls_rejected() {
        let (svc, broker, storage) = service(PublishMode::Direct).await;
        for url in ["", "not a url", "ftp://example.com/file"] {
            assert!(matches!(
                svc.create(&new_record(url)).await,
                Err(LinkshelfError::Validation { .. })
            ));
        }
        assert_eq!(broker.published(QUEUE), 0);
        assert!(storage.list_records(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_and_delete() {
        let (svc, _, _) = service(PublishMode::Direct).await;
        let record = svc.create(&new_record("https://example.com")).await.unwrap();

        let mut update = UpdateRecord::from(&record);
        update.title = "Renamed".into();
        assert_eq!(svc.update(&update).await.unwrap().title, "Renamed");

        svc.delete(&record.id).await.unwrap();
        assert!(svc.get(&record.id).await.unwrap_err().is_not_found());
        assert!(svc.delete(&record.id).await.unwrap_err().is_not_found());
        assert!(svc.update(&update).await.unwrap_err().is_not_found());
    }
}
