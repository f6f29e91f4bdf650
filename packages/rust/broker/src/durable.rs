//! Broker persisted in the libSQL store.
//!
//! Publishes append rows to `queue_messages`; consumers claim rows in id
//! order. An idle consumer sleeps for the poll interval, or until a publish
//! through the same broker wakes it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use linkshelf_shared::Result;
use linkshelf_storage::{QueuedMessage, Storage};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::{Acknowledger, Broker, ConsumeOptions, Delivery, DeliveryStream, OutgoingMessage};

/// [`Broker`] over [`Storage`].
///
/// Held messages are released back to `ready` whenever a manual-ack consumer
/// attaches, so run one manual-ack consumer per queue.
#[derive(Clone)]
pub struct DurableBroker {
    storage: Arc<Storage>,
    poll_interval: Duration,
    notify: Arc<Notify>,
}

impl DurableBroker {
    pub fn new(storage: Arc<Storage>, poll_interval: Duration) -> Self {
        Self {
            storage,
            poll_interval,
            notify: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Broker for DurableBroker {
    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()> {
        let id = self
            .storage
            .enqueue_message(queue, &message.body, &message.content_type, message.timestamp)
            .await?;
        debug!(queue, message_id = id, "message enqueued");
        self.notify.notify_waiters();
        Ok(())
    }

    async fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<DeliveryStream> {
        if !options.auto_ack {
            let released = self.storage.requeue_unacked(queue).await?;
            if released > 0 {
                info!(queue, released, "returned unacknowledged messages to the queue");
            }
        }

        let poller = Poller {
            queue: queue.to_string(),
            storage: self.storage.clone(),
            notify: self.notify.clone(),
            poll_interval: self.poll_interval,
            auto_ack: options.auto_ack,
        };

        let stream = futures::stream::unfold(poller, |poller| async move {
            let item = poller.next_message().await.map(|msg| poller.deliver(msg));
            Some((item, poller))
        });
        Ok(stream.boxed())
    }
}

struct Poller {
    queue: String,
    storage: Arc<Storage>,
    notify: Arc<Notify>,
    poll_interval: Duration,
    auto_ack: bool,
}

impl Poller {
    async fn next_message(&self) -> Result<QueuedMessage> {
        loop {
            // Register interest before claiming so a publish in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(msg) = self.storage.claim_message(&self.queue, self.auto_ack).await? {
                return Ok(msg);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    fn deliver(&self, msg: QueuedMessage) -> Delivery {
        let acker: Option<Arc<dyn Acknowledger>> = if self.auto_ack {
            None
        } else {
            Some(Arc::new(StorageAcker {
                storage: self.storage.clone(),
            }))
        };

        Delivery::new(
            msg.id as u64,
            msg.body,
            msg.content_type,
            msg.published_at,
            msg.attempts,
            acker,
        )
    }
}

struct StorageAcker {
    storage: Arc<Storage>,
}

#[async_trait]
impl Acknowledger for StorageAcker {
    async fn ack(&self, tag: u64) -> Result<()> {
        self.storage.ack_message(tag as i64).await
    }

    async fn reject(&self, tag: u64, requeue: bool, reason: Option<&str>) -> Result<()> {
        self.storage.reject_message(tag as i64, requeue, reason).await
    }
}
