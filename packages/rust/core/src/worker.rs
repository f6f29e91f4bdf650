//! Long-running enrichment worker.
//!
//! Consumes the enrichment queue one delivery at a time and runs each job
//! through the [`Enricher`]. A failed job is logged and the loop moves on;
//! only broker failures (a closed stream or an error item) end the loop.

use std::sync::Arc;

use futures::StreamExt;
use linkshelf_broker::{Broker, ConsumeOptions, Delivery};
use linkshelf_shared::{AckMode, Cancellation, LinkshelfError, Result, WorkerConfig};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::enrich::Enricher;

/// Observable worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for the next delivery.
    Idle,
    /// Running a job.
    Processing,
    /// The loop has exited. Terminal.
    Cancelled,
}

/// Enrichment queue consumer.
pub struct EnrichmentWorker {
    broker: Arc<dyn Broker>,
    enricher: Enricher,
    queue: String,
    ack_mode: AckMode,
    state: watch::Sender<WorkerState>,
}

impl EnrichmentWorker {
    pub fn new(broker: Arc<dyn Broker>, enricher: Enricher, config: &WorkerConfig) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            broker,
            enricher,
            queue: config.queue.clone(),
            ack_mode: config.ack_mode,
            state,
        }
    }

    /// Current state.
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Consume until `cancel` fires (returns `Ok`) or the broker fails
    /// (returns the broker error).
    #[instrument(skip_all, fields(queue = %self.queue, ack_mode = ?self.ack_mode))]
    pub async fn run(&self, cancel: &Cancellation) -> Result<()> {
        let options = ConsumeOptions {
            auto_ack: self.ack_mode == AckMode::Auto,
            exclusive: false,
        };
        let mut deliveries = match self.broker.consume(&self.queue, options).await {
            Ok(stream) => stream,
            Err(e) => {
                self.set_state(WorkerState::Cancelled);
                return Err(e);
            }
        };
        info!("enrichment worker started");

        let outcome = loop {
            if cancel.is_cancelled() {
                break Ok(());
            }

            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!(error = %e, "broker stream failed");
                    break Err(e);
                }
                None => {
                    error!("broker stream closed");
                    break Err(LinkshelfError::Broker(format!(
                        "consumption stream for {} closed",
                        self.queue
                    )));
                }
            };

            self.set_state(WorkerState::Processing);
            self.handle(delivery, cancel).await;
            self.set_state(WorkerState::Idle);
        };

        self.set_state(WorkerState::Cancelled);
        info!(ok = outcome.is_ok(), "enrichment worker stopped");
        outcome
    }

    #[instrument(skip_all, fields(tag = delivery.tag, attempt = delivery.attempt))]
    async fn handle(&self, delivery: Delivery, cancel: &Cancellation) {
        let result = self.enricher.process_job(&delivery.body, cancel).await;

        match &result {
            Ok(record) => info!(
                record_id = %record.id,
                url = %record.url,
                tags = record.tags.len(),
                "record enriched"
            ),
            Err(LinkshelfError::Cancelled) => debug!("job interrupted by cancellation"),
            Err(e) if e.is_not_found() => warn!(error = %e, "record gone before enrichment finished"),
            Err(e) => error!(error = %e, "enrichment failed"),
        }

        if !delivery.requires_ack() {
            return;
        }

        let settled = match &result {
            Ok(_) => delivery.ack().await,
            Err(LinkshelfError::Cancelled) => delivery.reject(true, None).await,
            Err(e) => delivery.reject(false, Some(&e.to_string())).await,
        };
        if let Err(e) = settled {
            warn!(error = %e, "failed to settle delivery");
        }
    }

    fn set_state(&self, state: WorkerState) {
        self.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::publisher::JobPublisher;
    use crate::test_support::{
        CountingRepository, as_repository, page_server, seed_record, temp_storage,
    };
    use linkshelf_broker::{MemoryBroker, OutgoingMessage};
    use linkshelf_scraper::Fetcher;
    use linkshelf_shared::{FetchConfig, RecordId};

    const QUEUE: &str = "link_enrichment";
    const PAGE: &str = r#"<html><head><title>Example Domain</title><meta name="keywords" content="web, examples "></head></html>"#;

    struct Harness {
        broker: MemoryBroker,
        repo: Arc<CountingRepository>,
        worker: EnrichmentWorker,
    }

    async fn harness(ack_mode: AckMode) -> Harness {
        let broker = MemoryBroker::new();
        let repo = Arc::new(CountingRepository::new(temp_storage().await));
        let config = WorkerConfig {
            ack_mode,
            ..WorkerConfig::default()
        };
        let fetcher = Fetcher::new(&FetchConfig::default()).unwrap();
        let enricher = Enricher::new(as_repository(&repo), Arc::new(fetcher), &config);
        let worker = EnrichmentWorker::new(Arc::new(broker.clone()), enricher, &config);
        Harness {
            broker,
            repo,
            worker,
        }
    }

    impl Harness {
        async fn publish(&self, id: &RecordId) {
            JobPublisher::new(Arc::new(self.broker.clone()), QUEUE)
                .publish(id)
                .await
                .expect("publish");
        }

        async fn publish_raw(&self, body: &[u8]) {
            self.broker
                .publish(QUEUE, OutgoingMessage::json(body.to_vec()))
                .await
                .expect("publish raw");
        }

        /// Close the queue and run the worker until it drains it.
        async fn drain(&self) -> Result<()> {
            self.broker.close(QUEUE);
            tokio::time::timeout(Duration::from_secs(10), self.worker.run(&Cancellation::new()))
                .await
                .expect("worker drains queue")
        }
    }

    #[tokio::test]
    async fn enriches_title_and_tags() {
        let h = harness(AckMode::Auto).await;
        let server = page_server(200, PAGE).await;
        let record = seed_record(h.repo.storage(), &format!("{}/page", server.uri())).await;

        h.publish(&record.id).await;
        let _ = h.drain().await;

        let stored = h.repo.storage().find_record(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Example Domain");
        assert_eq!(stored.tags, vec!["seed", "web", "examples"]);
        assert_eq!(stored.images, record.images);
        assert_eq!(stored.user_id, record.user_id);
        assert_eq!(h.repo.updates(), 1);
    }

    #[tokio::test]
    async fn non_200_leaves_record_untouched() {
        let h = harness(AckMode::Auto).await;
        let server = page_server(404, "missing").await;
        let record = seed_record(h.repo.storage(), &format!("{}/page", server.uri())).await;

        h.publish(&record.id).await;
        let _ = h.drain().await;

        assert_eq!(h.repo.reads(), 1);
        assert_eq!(h.repo.updates(), 0);
        let stored = h.repo.storage().find_record(&record.id).await.unwrap().unwrap();
        assert_eq!(stored, record);
    }

    #[tokio::test]
    async fn malformed_jobs_are_dropped_and_loop_continues() {
        let h = harness(AckMode::Auto).await;
        let server = page_server(200, PAGE).await;
        let record = seed_record(h.repo.storage(), &format!("{}/page", server.uri())).await;

        h.publish_raw(b"definitely not json").await;
        h.publish_raw(br#"{"id":"64f1c0ffee"}"#).await;
        h.publish(&record.id).await;
        let _ = h.drain().await;

        // Only the valid job reached the repository
        assert_eq!(h.repo.reads(), 1);
        assert_eq!(h.repo.updates(), 1);
    }

    #[tokio::test]
    async fn duplicate_job_duplicates_tags() {
        let h = harness(AckMode::Auto).await;
        let server = page_server(200, PAGE).await;
        let record = seed_record(h.repo.storage(), &format!("{}/page", server.uri())).await;

        h.publish(&record.id).await;
        h.publish(&record.id).await;
        let _ = h.drain().await;

        let stored = h.repo.storage().find_record(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Example Domain");
        assert_eq!(
            stored.tags,
            vec!["seed", "web", "examples", "web", "examples"]
        );
    }

    #[tokio::test]
    async fn deleted_record_is_not_fatal() {
        let h = harness(AckMode::Auto).await;
        let server = page_server(200, PAGE).await;
        let gone = seed_record(h.repo.storage(), &format!("{}/page", server.uri())).await;
        let kept = seed_record(h.repo.storage(), &format!("{}/page", server.uri())).await;
        h.repo.storage().delete_record(&gone.id).await.unwrap();

        h.publish(&gone.id).await;
        h.publish(&kept.id).await;
        let _ = h.drain().await;

        assert!(h.repo.storage().find_record(&gone.id).await.unwrap().is_none());
        let stored = h.repo.storage().find_record(&kept.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Example Domain");
    }

    #[tokio::test]
    async fn closed_stream_is_fatal() {
        let h = harness(AckMode::Auto).await;
        let err = h.drain().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(h.worker.state(), WorkerState::Cancelled);
    }

    #[tokio::test]
    async fn cancellation_stops_idle_worker() {
        let h = harness(AckMode::Auto).await;
        assert_eq!(h.worker.state(), WorkerState::Idle);

        let cancel = Cancellation::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        tokio::time::timeout(Duration::from_secs(2), h.worker.run(&cancel))
            .await
            .expect("worker observes cancellation")
            .expect("cancellation is a clean exit");
        assert_eq!(h.worker.state(), WorkerState::Cancelled);
        assert_eq!(h.repo.reads(), 0);
    }

    #[tokio::test]
    async fn state_changes_are_observable() {
        let h = harness(AckMode::Auto).await;
        let server = page_server(200, PAGE).await;
        let record = seed_record(h.repo.storage(), &format!("{}/page", server.uri())).await;
        let mut states = h.worker.subscribe();

        h.publish(&record.id).await;
        let _ = h.drain().await;

        // The last value seen is terminal; a change was published along the way
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), WorkerState::Cancelled);
    }

    #[tokio::test]
    async fn after_persist_acks_success_and_dead_letters_failures() {
        let h = harness(AckMode::AfterPersist).await;
        let ok = page_server(200, PAGE).await;
        let broken = page_server(500, "boom").await;
        let good = seed_record(h.repo.storage(), &format!("{}/page", ok.uri())).await;
        let bad = seed_record(h.repo.storage(), &format!("{}/page", broken.uri())).await;

        h.publish(&good.id).await;
        h.publish(&bad.id).await;
        h.publish_raw(b"garbage").await;
        let _ = h.drain().await;

        assert_eq!(h.broker.unacked(QUEUE), 0);
        let dead = h.broker.dead_letters(QUEUE);
        assert_eq!(dead.len(), 2);
        assert!(dead[0].reason.as_deref().unwrap_or_default().contains("500"));
        assert_eq!(dead[1].body, b"garbage");

        let stored = h.repo.storage().find_record(&good.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Example Domain");
    }
}
