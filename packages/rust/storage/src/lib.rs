//! Turso Embedded / libSQL storage layer.
//!
//! The [`Storage`] struct wraps a libSQL database holding bookmark records,
//! the durable job queue, dead letters, and the job outbox.
//!
//! The enrichment pipeline only depends on the narrow [`RecordRepository`]
//! contract (read by id, update); the rest of the CRUD surface is used by
//! the CLI.

mod migrations;
mod queue;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use linkshelf_shared::{LinkshelfError, NewRecord, Record, RecordId, Result, UpdateRecord};

pub use queue::{DeadLetter, OutboxEntry, QueueStats, QueuedMessage};

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const RECORD_COLUMNS: &str =
    "id, url, title, tags_json, images_json, user_id, created_at, updated_at";

// ---------------------------------------------------------------------------
// Repository contract
// ---------------------------------------------------------------------------

/// The two record operations the enrichment worker relies on.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Read a record by identifier; `None` when it does not exist.
    async fn get_record(&self, id: &RecordId) -> Result<Option<Record>>;

    /// Replace a record's mutable fields, refreshing `updated_at`.
    /// Fails with [`LinkshelfError::NotFound`] when the record is gone.
    async fn update_record(&self, update: &UpdateRecord) -> Result<Record>;
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    db: Database,
    conn: Connection,
}

impl Storage {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LinkshelfError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;

        let conn = connect(&db)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        LinkshelfError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Open a dedicated connection for a multi-statement transaction so it
    /// does not interleave with statements issued on the shared connection.
    fn transaction_conn(&self) -> Result<Connection> {
        connect(&self.db)
    }

    // -----------------------------------------------------------------------
    // Record operations
    // -----------------------------------------------------------------------

    /// Insert a new record. Generates an id when the request carries none.
    pub async fn insert_record(&self, new: &NewRecord) -> Result<Record> {
        let record = new_record(new);
        insert_record_on(&self.conn, &record).await?;
        tracing::debug!(id = %record.id, url = %record.url, "record inserted");
        Ok(record)
    }

    /// Insert a record and an outbox row for `queue` in one transaction.
    pub async fn insert_record_with_outbox(&self, new: &NewRecord, queue: &str) -> Result<Record> {
        let record = new_record(new);
        let conn = self.transaction_conn()?;
        let tx = conn.transaction().await.map_err(storage_err)?;

        insert_record_on(&tx, &record).await?;
        tx.execute(
            "INSERT INTO outbox (record_id, queue, created_at) VALUES (?1, ?2, ?3)",
            params![
                record.id.to_string(),
                queue,
                record.created_at.to_rfc3339()
            ],
        )
        .await
        .map_err(storage_err)?;

        tx.commit().await.map_err(storage_err)?;
        tracing::debug!(id = %record.id, queue, "record inserted with outbox entry");
        Ok(record)
    }

    /// Find a record by id.
    pub async fn find_record(&self, id: &RecordId) -> Result<Option<Record>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Replace a record's mutable fields. `created_at` is preserved.
    pub async fn replace_record(&self, update: &UpdateRecord) -> Result<Record> {
        let now = Utc::now().to_rfc3339();
        let mut rows = self
            .conn
            .query(
                &format!(
                    "UPDATE records
                     SET url = ?1, title = ?2, tags_json = ?3, images_json = ?4,
                         user_id = ?5, updated_at = ?6
                     WHERE id = ?7
                     RETURNING {RECORD_COLUMNS}"
                ),
                params![
                    update.url.as_str(),
                    update.title.as_str(),
                    to_json(&update.tags)?,
                    to_json(&update.images)?,
                    update.user_id.as_str(),
                    now.as_str(),
                    update.id.to_string()
                ],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await {
            Ok(Some(row)) => row_to_record(&row),
            Ok(None) => Err(LinkshelfError::not_found(update.id)),
            Err(e) => Err(storage_err(e)),
        }
    }

    /// Delete a record. Returns `false` when nothing was deleted.
    pub async fn delete_record(&self, id: &RecordId) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM records WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(storage_err)?;
        Ok(affected > 0)
    }

    /// List records, oldest first, optionally restricted to one user.
    pub async fn list_records(&self, user_id: Option<&str>) -> Result<Vec<Record>> {
        let mut rows = match user_id {
            Some(user) => self
                .conn
                .query(
                    &format!(
                        "SELECT {RECORD_COLUMNS} FROM records WHERE user_id = ?1 ORDER BY created_at, id"
                    ),
                    params![user],
                )
                .await
                .map_err(storage_err)?,
            None => self
                .conn
                .query(
                    &format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY created_at, id"),
                    params![],
                )
                .await
                .map_err(storage_err)?,
        };

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_record(&row)?);
        }
        Ok(results)
    }
}

#[async_trait]
impl RecordRepository for Storage {
    async fn get_record(&self, id: &RecordId) -> Result<Option<Record>> {
        self.find_record(id).await
    }

    async fn update_record(&self, update: &UpdateRecord) -> Result<Record> {
        self.replace_record(update).await
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn connect(db: &Database) -> Result<Connection> {
    let conn = db.connect().map_err(storage_err)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(storage_err)?;
    Ok(conn)
}

pub(crate) fn storage_err(e: libsql::Error) -> LinkshelfError {
    LinkshelfError::Storage(e.to_string())
}

fn new_record(new: &NewRecord) -> Record {
    let now = Utc::now();
    Record {
        id: new.id.unwrap_or_default(),
        url: new.url.clone(),
        title: new.title.clone(),
        tags: new.tags.clone(),
        images: new.images.clone(),
        user_id: new.user_id.clone(),
        created_at: now,
        updated_at: now,
    }
}

async fn insert_record_on(conn: &Connection, record: &Record) -> Result<()> {
    conn.execute(
        "INSERT INTO records (id, url, title, tags_json, images_json, user_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id.to_string(),
            record.url.as_str(),
            record.title.as_str(),
            to_json(&record.tags)?,
            to_json(&record.images)?,
            record.user_id.as_str(),
            record.created_at.to_rfc3339(),
            record.updated_at.to_rfc3339()
        ],
    )
    .await
    .map_err(storage_err)?;
    Ok(())
}

fn to_json(values: &[String]) -> Result<String> {
    serde_json::to_string(values).map_err(|e| LinkshelfError::Storage(e.to_string()))
}

fn from_json(column: &str, raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|e| LinkshelfError::Storage(format!("invalid {column} column: {e}")))
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| LinkshelfError::Storage(format!("invalid date: {e}")))
}

/// Convert a database row to a [`Record`].
fn row_to_record(row: &libsql::Row) -> Result<Record> {
    let id: String = row.get(0).map_err(storage_err)?;
    let tags: String = row.get(3).map_err(storage_err)?;
    let images: String = row.get(4).map_err(storage_err)?;
    let created_at: String = row.get(6).map_err(storage_err)?;
    let updated_at: String = row.get(7).map_err(storage_err)?;

    Ok(Record {
        id: id
            .parse()
            .map_err(|e| LinkshelfError::Storage(format!("invalid record id {id}: {e}")))?,
        url: row.get(1).map_err(storage_err)?,
        title: row.get(2).map_err(storage_err)?,
        tags: from_json("tags_json", &tags)?,
        images: from_json("images_json", &images)?,
        user_id: row.get(5).map_err(storage_err)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}
