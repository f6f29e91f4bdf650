//! Message broker abstraction for enrichment jobs.
//!
//! The pipeline only talks to the [`Broker`] trait:
//! - [`MemoryBroker`] keeps queues in process (tests, single-process runs)
//! - [`DurableBroker`] persists queues in the libSQL store so jobs survive restarts
//!
//! A consumer receives a [`DeliveryStream`]. With auto-ack the broker forgets
//! a message as soon as it is handed out; otherwise each [`Delivery`] must be
//! acked or rejected.

mod durable;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use linkshelf_shared::{CONTENT_TYPE_JSON, Result};

pub use durable::DurableBroker;
pub use memory::MemoryBroker;

/// Stream of deliveries from one consumer. Ends when the broker closes it.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// A message to publish.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub body: Vec<u8>,
    pub content_type: String,
    /// Publication time, carried through to the consumer.
    pub timestamp: DateTime<Utc>,
}

impl OutgoingMessage {
    /// A JSON message stamped with the current time.
    pub fn json(body: Vec<u8>) -> Self {
        Self {
            body,
            content_type: CONTENT_TYPE_JSON.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Consumer registration options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsumeOptions {
    /// Remove each message as soon as it is delivered.
    pub auto_ack: bool,
    /// Refuse other consumers on the same queue while this one is attached.
    pub exclusive: bool,
}

/// Settles a delivery with the broker it came from.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self, tag: u64) -> Result<()>;
    async fn reject(&self, tag: u64, requeue: bool, reason: Option<&str>) -> Result<()>;
}

/// A message handed to a consumer.
pub struct Delivery {
    /// Broker-assigned delivery tag.
    pub tag: u64,
    pub body: Vec<u8>,
    pub content_type: String,
    pub timestamp: DateTime<Utc>,
    /// How many times this message has been delivered, including this one.
    pub attempt: u32,
    acker: Option<Arc<dyn Acknowledger>>,
}

impl Delivery {
    pub(crate) fn new(
        tag: u64,
        body: Vec<u8>,
        content_type: String,
        timestamp: DateTime<Utc>,
        attempt: u32,
        acker: Option<Arc<dyn Acknowledger>>,
    ) -> Self {
        Self {
            tag,
            body,
            content_type,
            timestamp,
            attempt,
            acker,
        }
    }

    /// Whether this delivery still has to be settled.
    pub fn requires_ack(&self) -> bool {
        self.acker.is_some()
    }

    /// Acknowledge the delivery. No-op for auto-acked deliveries.
    pub async fn ack(&self) -> Result<()> {
        match &self.acker {
            Some(acker) => acker.ack(self.tag).await,
            None => Ok(()),
        }
    }

    /// Reject the delivery, either back onto the queue or to dead letters.
    /// No-op for auto-acked deliveries.
    pub async fn reject(&self, requeue: bool, reason: Option<&str>) -> Result<()> {
        match &self.acker {
            Some(acker) => acker.reject(self.tag, requeue, reason).await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("content_type", &self.content_type)
            .field("timestamp", &self.timestamp)
            .field("attempt", &self.attempt)
            .field("requires_ack", &self.requires_ack())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// A named-queue message broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append a message to `queue`.
    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()>;

    /// Attach a consumer to `queue`.
    async fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<DeliveryStream>;
}
