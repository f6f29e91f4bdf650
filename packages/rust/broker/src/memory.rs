//! In-process broker backed by unbounded tokio channels.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use linkshelf_shared::{LinkshelfError, Result};
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::{Acknowledger, Broker, ConsumeOptions, Delivery, DeliveryStream, OutgoingMessage};

#[derive(Debug, Clone)]
struct Envelope {
    body: Vec<u8>,
    content_type: String,
    timestamp: DateTime<Utc>,
    attempt: u32,
}

/// A message rejected without requeue.
#[derive(Debug, Clone)]
pub struct DeadMessage {
    pub body: Vec<u8>,
    pub reason: Option<String>,
}

#[derive(Default)]
struct ConsumerSlots {
    active: AtomicUsize,
    exclusive: AtomicBool,
}

/// Releases a consumer slot when the delivery stream is dropped.
struct SlotGuard {
    slots: Arc<ConsumerSlots>,
    exclusive: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.active.fetch_sub(1, Ordering::SeqCst);
        if self.exclusive {
            self.slots.exclusive.store(false, Ordering::SeqCst);
        }
    }
}

struct QueueState {
    sender: Option<mpsc::UnboundedSender<Envelope>>,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<Envelope>>>,
    slots: Arc<ConsumerSlots>,
    published: usize,
}

impl QueueState {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            sender: Some(tx),
            receiver: Arc::new(AsyncMutex::new(rx)),
            slots: Arc::new(ConsumerSlots::default()),
            published: 0,
        }
    }
}

#[derive(Default)]
struct Shared {
    queues: Mutex<HashMap<String, QueueState>>,
    pending: Mutex<HashMap<u64, (String, Envelope)>>,
    dead: Mutex<HashMap<String, Vec<DeadMessage>>>,
    next_tag: AtomicU64,
}

impl Shared {
    fn send(&self, queue: &str, envelope: Envelope) -> Result<()> {
        let mut queues = lock(&self.queues);
        let state = queues.entry(queue.to_string()).or_insert_with(QueueState::new);
        let sender = state
            .sender
            .as_ref()
            .ok_or_else(|| LinkshelfError::Broker(format!("queue {queue} is closed")))?;
        sender
            .send(envelope)
            .map_err(|_| LinkshelfError::Broker(format!("queue {queue} is closed")))
    }
}

/// In-process [`Broker`].
///
/// Messages published before a consumer attaches are buffered. Several
/// non-exclusive consumers on one queue compete for messages. Dropping all
/// handles loses every buffered message.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop accepting publishes on `queue`. Consumers drain what is buffered,
    /// then their streams end.
    pub fn close(&self, queue: &str) {
        let mut queues = lock(&self.shared.queues);
        let state = queues.entry(queue.to_string()).or_insert_with(QueueState::new);
        state.sender = None;
        tracing::debug!(queue, "memory queue closed");
    }

    /// Messages ever published to `queue`.
    pub fn published(&self, queue: &str) -> usize {
        lock(&self.shared.queues)
            .get(queue)
            .map(|q| q.published)
            .unwrap_or(0)
    }

    /// Delivered messages of `queue` still awaiting ack or reject.
    pub fn unacked(&self, queue: &str) -> usize {
        lock(&self.shared.pending)
            .values()
            .filter(|(q, _)| q == queue)
            .count()
    }

    /// Messages of `queue` rejected without requeue.
    pub fn dead_letters(&self, queue: &str) -> Vec<DeadMessage> {
        lock(&self.shared.dead).get(queue).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, queue: &str, message: OutgoingMessage) -> Result<()> {
        self.shared.send(
            queue,
            Envelope {
                body: message.body,
                content_type: message.content_type,
                timestamp: message.timestamp,
                attempt: 0,
            },
        )?;
        if let Some(state) = lock(&self.shared.queues).get_mut(queue) {
            state.published += 1;
        }
        Ok(())
    }

    async fn consume(&self, queue: &str, options: ConsumeOptions) -> Result<DeliveryStream> {
        let (receiver, guard) = {
            let mut queues = lock(&self.shared.queues);
            let state = queues.entry(queue.to_string()).or_insert_with(QueueState::new);
            let slots = &state.slots;

            let busy = slots.exclusive.load(Ordering::SeqCst)
                || (options.exclusive && slots.active.load(Ordering::SeqCst) > 0);
            if busy {
                return Err(LinkshelfError::Broker(format!(
                    "queue {queue} is held by an exclusive consumer"
                )));
            }
            slots.active.fetch_add(1, Ordering::SeqCst);
            if options.exclusive {
                slots.exclusive.store(true, Ordering::SeqCst);
            }

            (
                state.receiver.clone(),
                SlotGuard {
                    slots: slots.clone(),
                    exclusive: options.exclusive,
                },
            )
        };

        let consumer = Consumer {
            queue: queue.to_string(),
            receiver,
            shared: self.shared.clone(),
            auto_ack: options.auto_ack,
            _guard: guard,
        };

        let stream = futures::stream::unfold(consumer, |consumer| async move {
            let envelope = consumer.receiver.lock().await.recv().await?;
            let delivery = consumer.deliver(envelope);
            Some((Ok(delivery), consumer))
        });
        Ok(stream.boxed())
    }
}

struct Consumer {
    queue: String,
    receiver: Arc<AsyncMutex<mpsc::UnboundedReceiver<Envelope>>>,
    shared: Arc<Shared>,
    auto_ack: bool,
    _guard: SlotGuard,
}

impl Consumer {
    fn deliver(&self, mut envelope: Envelope) -> Delivery {
        envelope.attempt += 1;
        let tag = self.shared.next_tag.fetch_add(1, Ordering::SeqCst) + 1;

        let acker: Option<Arc<dyn Acknowledger>> = if self.auto_ack {
            None
        } else {
            lock(&self.shared.pending).insert(tag, (self.queue.clone(), envelope.clone()));
            Some(Arc::new(MemoryAcker {
                shared: self.shared.clone(),
            }))
        };

        Delivery::new(
            tag,
            envelope.body,
            envelope.content_type,
            envelope.timestamp,
            envelope.attempt,
            acker,
        )
    }
}

struct MemoryAcker {
    shared: Arc<Shared>,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(&self, tag: u64) -> Result<()> {
        lock(&self.shared.pending).remove(&tag);
        Ok(())
    }

    async fn reject(&self, tag: u64, requeue: bool, reason: Option<&str>) -> Result<()> {
        let Some((queue, envelope)) = lock(&self.shared.pending).remove(&tag) else {
            return Ok(());
        };

        if requeue {
            return self.shared.send(&queue, envelope);
        }

        lock(&self.shared.dead)
            .entry(queue)
            .or_default()
            .push(DeadMessage {
                body: envelope.body,
                reason: reason.map(str::to_string),
            });
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const QUEUE: &str = "link_enrichment";

    fn manual() -> ConsumeOptions {
        ConsumeOptions {
            auto_ack: false,
            exclusive: false,
        }
    }

    async fn next(stream: &mut DeliveryStream) -> Delivery {
        tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("delivery within 1s")
            .expect("stream open")
            .expect("delivery ok")
    }

    #[tokio::test]
    async fn buffers_until_consumer_attaches() {
        let broker = MemoryBroker::new();
        broker
            .publish(QUEUE, OutgoingMessage::json(b"one".to_vec()))
            .await
            .unwrap();
        broker
            .publish(QUEUE, OutgoingMessage::json(b"two".to_vec()))
            .await
            .unwrap();
        assert_eq!(broker.published(QUEUE), 2);

        let mut stream = broker
            .consume(QUEUE, ConsumeOptions { auto_ack: true, exclusive: false })
            .await
            .unwrap();
        let first = next(&mut stream).await;
        assert_eq!(first.body, b"one");
        assert_eq!(first.content_type, "application/json");
        assert!(!first.requires_ack());
        assert_eq!(next(&mut stream).await.body, b"two");
    }

    #[tokio::test]
    async fn close_ends_stream_after_drain() {
        let broker = MemoryBroker::new();
        let mut stream = broker.consume(QUEUE, ConsumeOptions::default()).await.unwrap();
        broker
            .publish(QUEUE, OutgoingMessage::json(b"last".to_vec()))
            .await
            .unwrap();
        broker.close(QUEUE);

        assert_eq!(next(&mut stream).await.body, b"last");
        assert!(stream.next().await.is_none());

        let err = broker
            .publish(QUEUE, OutgoingMessage::json(b"late".to_vec()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn manual_ack_and_requeue() {
        let broker = MemoryBroker::new();
        let mut stream = broker.consume(QUEUE, manual()).await.unwrap();
        broker
            .publish(QUEUE, OutgoingMessage::json(b"job".to_vec()))
            .await
            .unwrap();

        let first = next(&mut stream).await;
        assert!(first.requires_ack());
        assert_eq!(first.attempt, 1);
        assert_eq!(broker.unacked(QUEUE), 1);

        first.reject(true, None).await.unwrap();
        let second = next(&mut stream).await;
        assert_eq!(second.body, b"job");
        assert_eq!(second.attempt, 2);

        second.ack().await.unwrap();
        assert_eq!(broker.unacked(QUEUE), 0);
        assert!(broker.dead_letters(QUEUE).is_empty());
    }

    #[tokio::test]
    async fn reject_without_requeue_dead_letters() {
        let broker = MemoryBroker::new();
        let mut stream = broker.consume(QUEUE, manual()).await.unwrap();
        broker
            .publish(QUEUE, OutgoingMessage::json(b"poison".to_vec()))
            .await
            .unwrap();

        let delivery = next(&mut stream).await;
        delivery.reject(false, Some("bad payload")).await.unwrap();

        let dead = broker.dead_letters(QUEUE);
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].body, b"poison");
        assert_eq!(dead[0].reason.as_deref(), Some("bad payload"));
        assert_eq!(broker.unacked(QUEUE), 0);
    }

    #[tokio::test]
    async fn exclusive_consumer_blocks_others_until_dropped() {
        let broker = MemoryBroker::new();
        let exclusive = ConsumeOptions {
            auto_ack: true,
            exclusive: true,
        };
        let stream = broker.consume(QUEUE, exclusive).await.unwrap();
        assert!(broker.consume(QUEUE, ConsumeOptions::default()).await.is_err());

        drop(stream);
        assert!(broker.consume(QUEUE, exclusive).await.is_ok());
    }
}
