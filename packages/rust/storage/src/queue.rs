//! Durable queue, dead-letter, and outbox tables.
//!
//! These back the libSQL broker (`linkshelf-broker`) and the outbox relay.
//! A message is `ready` until a consumer claims it; auto-ack claims delete it
//! immediately, manual-ack claims mark it `unacked` until acked or rejected.

use chrono::{DateTime, Utc};
use libsql::params;
use linkshelf_shared::Result;

use crate::{Storage, parse_timestamp, storage_err};

const STATE_READY: &str = "ready";
const STATE_UNACKED: &str = "unacked";

/// A message claimed from the queue.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: i64,
    pub queue: String,
    pub body: Vec<u8>,
    pub content_type: String,
    pub published_at: DateTime<Utc>,
    /// Number of times this message has been handed to a consumer.
    pub attempts: u32,
}

/// A message that was rejected without requeue.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub id: i64,
    pub message_id: i64,
    pub queue: String,
    pub body: Vec<u8>,
    pub reason: Option<String>,
    pub dead_at: DateTime<Utc>,
}

/// A pending enrichment intent written alongside a record.
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: i64,
    pub record_id: String,
    pub queue: String,
    pub created_at: DateTime<Utc>,
}

/// Counters for `linkshelf queue status`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: u64,
    pub unacked: u64,
    pub dead: u64,
    pub outbox_pending: u64,
}

impl Storage {
    // -----------------------------------------------------------------------
    // Queue operations
    // -----------------------------------------------------------------------

    /// Append a message to `queue`. Returns the message id.
    pub async fn enqueue_message(
        &self,
        queue: &str,
        body: &[u8],
        content_type: &str,
        published_at: DateTime<Utc>,
    ) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "INSERT INTO queue_messages (queue, body, content_type, published_at, state)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 RETURNING id",
                params![
                    queue,
                    body.to_vec(),
                    content_type,
                    published_at.to_rfc3339(),
                    STATE_READY
                ],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => row.get::<i64>(0).map_err(storage_err),
            None => Err(linkshelf_shared::LinkshelfError::Storage(
                "enqueue returned no id".into(),
            )),
        }
    }

    /// Claim the oldest ready message of `queue`.
    ///
    /// With `auto_ack` the message is removed as part of the claim; otherwise
    /// it is held as `unacked` until [`ack_message`](Self::ack_message) or
    /// [`reject_message`](Self::reject_message).
    pub async fn claim_message(&self, queue: &str, auto_ack: bool) -> Result<Option<QueuedMessage>> {
        let sql = if auto_ack {
            "DELETE FROM queue_messages
             WHERE id = (SELECT id FROM queue_messages
                         WHERE queue = ?1 AND state = 'ready'
                         ORDER BY id LIMIT 1)
             RETURNING id, queue, body, content_type, published_at, attempts + 1"
        } else {
            "UPDATE queue_messages
             SET state = 'unacked', attempts = attempts + 1, delivered_at = ?2
             WHERE id = (SELECT id FROM queue_messages
                         WHERE queue = ?1 AND state = 'ready'
                         ORDER BY id LIMIT 1)
             RETURNING id, queue, body, content_type, published_at, attempts"
        };

        let mut rows = if auto_ack {
            self.conn.query(sql, params![queue]).await
        } else {
            self.conn
                .query(sql, params![queue, Utc::now().to_rfc3339()])
                .await
        }
        .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let published_at: String = row.get(4).map_err(storage_err)?;
                Ok(Some(QueuedMessage {
                    id: row.get(0).map_err(storage_err)?,
                    queue: row.get(1).map_err(storage_err)?,
                    body: row.get(2).map_err(storage_err)?,
                    content_type: row.get(3).map_err(storage_err)?,
                    published_at: parse_timestamp(&published_at)?,
                    attempts: row.get(5).map_err(storage_err)?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Acknowledge (remove) a held message.
    pub async fn ack_message(&self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM queue_messages WHERE id = ?1 AND state = ?2",
                params![id, STATE_UNACKED],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Reject a held message: put it back in the queue, or move it to
    /// `dead_letters` with an optional reason.
    pub async fn reject_message(&self, id: i64, requeue: bool, reason: Option<&str>) -> Result<()> {
        if requeue {
            self.conn
                .execute(
                    "UPDATE queue_messages SET state = ?1, delivered_at = NULL
                     WHERE id = ?2 AND state = ?3",
                    params![STATE_READY, id, STATE_UNACKED],
                )
                .await
                .map_err(storage_err)?;
            return Ok(());
        }

        let conn = self.transaction_conn()?;
        let tx = conn.transaction().await.map_err(storage_err)?;
        tx.execute(
            "INSERT INTO dead_letters
                 (message_id, queue, body, content_type, published_at, attempts, reason, dead_at)
             SELECT id, queue, body, content_type, published_at, attempts, ?2, ?3
             FROM queue_messages WHERE id = ?1 AND state = 'unacked'",
            params![id, reason, Utc::now().to_rfc3339()],
        )
        .await
        .map_err(storage_err)?;
        tx.execute(
            "DELETE FROM queue_messages WHERE id = ?1 AND state = 'unacked'",
            params![id],
        )
        .await
        .map_err(storage_err)?;
        tx.commit().await.map_err(storage_err)?;
        tracing::debug!(message_id = id, "message dead-lettered");
        Ok(())
    }

    /// Return every held message of `queue` to the ready state.
    /// Called when a new consumer attaches, since the previous holder is gone.
    pub async fn requeue_unacked(&self, queue: &str) -> Result<u64> {
        self.conn
            .execute(
                "UPDATE queue_messages SET state = ?1, delivered_at = NULL
                 WHERE queue = ?2 AND state = ?3",
                params![STATE_READY, queue, STATE_UNACKED],
            )
            .await
            .map_err(storage_err)
    }

    /// List dead letters for a queue, oldest first.
    pub async fn list_dead_letters(&self, queue: &str) -> Result<Vec<DeadLetter>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, message_id, queue, body, reason, dead_at
                 FROM dead_letters WHERE queue = ?1 ORDER BY id",
                params![queue],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let dead_at: String = row.get(5).map_err(storage_err)?;
            results.push(DeadLetter {
                id: row.get(0).map_err(storage_err)?,
                message_id: row.get(1).map_err(storage_err)?,
                queue: row.get(2).map_err(storage_err)?,
                body: row.get(3).map_err(storage_err)?,
                reason: row.get::<Option<String>>(4).map_err(storage_err)?,
                dead_at: parse_timestamp(&dead_at)?,
            });
        }
        Ok(results)
    }

    /// Message and outbox counters for a queue.
    pub async fn queue_stats(&self, queue: &str) -> Result<QueueStats> {
        let mut rows = self
            .conn
            .query(
                "SELECT
                    (SELECT COUNT(*) FROM queue_messages WHERE queue = ?1 AND state = 'ready'),
                    (SELECT COUNT(*) FROM queue_messages WHERE queue = ?1 AND state = 'unacked'),
                    (SELECT COUNT(*) FROM dead_letters WHERE queue = ?1),
                    (SELECT COUNT(*) FROM outbox WHERE queue = ?1 AND sent_at IS NULL)",
                params![queue],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(QueueStats {
                ready: row.get::<i64>(0).map_err(storage_err)? as u64,
                unacked: row.get::<i64>(1).map_err(storage_err)? as u64,
                dead: row.get::<i64>(2).map_err(storage_err)? as u64,
                outbox_pending: row.get::<i64>(3).map_err(storage_err)? as u64,
            }),
            None => Ok(QueueStats::default()),
        }
    }

    // -----------------------------------------------------------------------
    // Outbox operations
    // -----------------------------------------------------------------------

    /// Oldest unsent outbox entries, at most `limit`.
    pub async fn pending_outbox(&self, limit: u32) -> Result<Vec<OutboxEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, record_id, queue, created_at FROM outbox
                 WHERE sent_at IS NULL ORDER BY id LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let created_at: String = row.get(3).map_err(storage_err)?;
            results.push(OutboxEntry {
                id: row.get(0).map_err(storage_err)?,
                record_id: row.get(1).map_err(storage_err)?,
                queue: row.get(2).map_err(storage_err)?,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(results)
    }

    /// Mark an outbox entry as forwarded to the broker.
    pub async fn mark_outbox_sent(&self, id: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE outbox SET sent_at = ?1 WHERE id = ?2",
                params![Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}
