//! Enrichment job publishing.

use std::sync::Arc;

use linkshelf_broker::{Broker, OutgoingMessage};
use linkshelf_shared::{EnrichmentJob, RecordId, Result};
use tracing::{debug, instrument};

/// Publishes `{"id": ...}` jobs to the enrichment queue.
#[derive(Clone)]
pub struct JobPublisher {
    broker: Arc<dyn Broker>,
    queue: String,
}

impl JobPublisher {
    pub fn new(broker: Arc<dyn Broker>, queue: impl Into<String>) -> Self {
        Self {
            broker,
            queue: queue.into(),
        }
    }

    /// The queue jobs are published to.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Publish an enrichment job for `id`.
    #[instrument(skip_all, fields(record_id = %id, queue = %self.queue))]
    pub async fn publish(&self, id: &RecordId) -> Result<()> {
        self.publish_job(&EnrichmentJob::new(*id)).await
    }

    /// Publish an already-built job.
    pub async fn publish_job(&self, job: &EnrichmentJob) -> Result<()> {
        publish_to(self.broker.as_ref(), &self.queue, job).await
    }
}

/// Encode `job` and publish it to `queue`.
pub(crate) async fn publish_to(
    broker: &dyn Broker,
    queue: &str,
    job: &EnrichmentJob,
) -> Result<()> {
    let body = job.encode()?;
    broker.publish(queue, OutgoingMessage::json(body)).await?;
    debug!(record_id = %job.record_id, queue, "enrichment job published");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use linkshelf_broker::{ConsumeOptions, MemoryBroker};

    const QUEUE: &str = "link_enrichment";

    #[tokio::test]
    async fn publishes_json_job() {
        let broker = MemoryBroker::new();
        let publisher = JobPublisher::new(Arc::new(broker.clone()), QUEUE);
        let id = RecordId::new();

        publisher.publish(&id).await.expect("publish");
        assert_eq!(broker.published(QUEUE), 1);

        let mut stream = broker
            .consume(QUEUE, ConsumeOptions { auto_ack: true, exclusive: false })
            .await
            .unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.content_type, "application/json");

        let job = EnrichmentJob::decode(&delivery.body).unwrap();
        assert_eq!(job.record_id().unwrap(), id);
    }

    #[tokio::test]
    async fn broker_failure_surfaces() {
        let broker = MemoryBroker::new();
        broker.close(QUEUE);
        let publisher = JobPublisher::new(Arc::new(broker), QUEUE);

        let err = publisher.publish(&RecordId::new()).await.unwrap_err();
        assert!(err.is_fatal());
    }
}
