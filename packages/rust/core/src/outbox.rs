//! Outbox relay: forwards jobs written alongside records to the broker.

use std::sync::Arc;
use std::time::Duration;

use linkshelf_broker::Broker;
use linkshelf_shared::{Cancellation, EnrichmentJob, PublisherConfig, Result};
use linkshelf_storage::Storage;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::publisher::publish_to;

/// Periodically drains pending outbox rows into the broker.
pub struct OutboxRelay {
    storage: Arc<Storage>,
    broker: Arc<dyn Broker>,
    interval: Duration,
    batch_size: u32,
}

impl OutboxRelay {
    pub fn new(storage: Arc<Storage>, broker: Arc<dyn Broker>, config: &PublisherConfig) -> Self {
        Self {
            storage,
            broker,
            interval: Duration::from_millis(config.relay_interval_ms),
            batch_size: config.relay_batch_size,
        }
    }

    /// Forward one batch. Stops at the first publish failure so rows go out
    /// in order; the failed row stays pending for the next pass.
    ///
    /// Returns the number of rows forwarded.
    pub async fn relay_once(&self) -> Result<usize> {
        let pending = self.storage.pending_outbox(self.batch_size).await?;
        let mut sent = 0;

        for entry in pending {
            let job = EnrichmentJob {
                record_id: entry.record_id.clone(),
            };
            if let Err(e) = publish_to(self.broker.as_ref(), &entry.queue, &job).await {
                warn!(
                    outbox_id = entry.id,
                    record_id = %entry.record_id,
                    error = %e,
                    "outbox publish failed, will retry"
                );
                break;
            }

            self.storage.mark_outbox_sent(entry.id).await?;
            debug!(outbox_id = entry.id, record_id = %entry.record_id, "outbox entry relayed");
            sent += 1;
        }

        Ok(sent)
    }

    /// Relay on a fixed interval until `cancel` fires.
    #[instrument(skip_all, fields(interval_ms = self.interval.as_millis() as u64))]
    pub async fn run(&self, cancel: &Cancellation) -> Result<()> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("outbox relay started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.relay_once().await {
                        Ok(0) => {}
                        Ok(sent) => info!(sent, "outbox entries relayed"),
                        Err(e) => warn!(error = %e, "outbox relay pass failed"),
                    }
                }
            }
        }

        info!("outbox relay stopped");
        Ok(())
    }
}
