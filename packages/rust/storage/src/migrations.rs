//! SQL migration definitions for the linkshelf database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: records",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Bookmark records; tags and images are JSON arrays
CREATE TABLE IF NOT EXISTS records (
    id          TEXT PRIMARY KEY,
    url         TEXT NOT NULL,
    title       TEXT NOT NULL DEFAULT '',
    tags_json   TEXT NOT NULL DEFAULT '[]',
    images_json TEXT NOT NULL DEFAULT '[]',
    user_id     TEXT NOT NULL DEFAULT '',
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_user_id ON records(user_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Durable queue, dead letters, and job outbox",
            sql: r#"
-- Messages waiting for (state = 'ready') or held by (state = 'unacked') a consumer
CREATE TABLE IF NOT EXISTS queue_messages (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    queue        TEXT NOT NULL,
    body         BLOB NOT NULL,
    content_type TEXT NOT NULL,
    published_at TEXT NOT NULL,
    state        TEXT NOT NULL DEFAULT 'ready',
    attempts     INTEGER NOT NULL DEFAULT 0,
    delivered_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_queue_messages_queue_state ON queue_messages(queue, state, id);

-- Messages rejected without requeue
CREATE TABLE IF NOT EXISTS dead_letters (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id   INTEGER NOT NULL,
    queue        TEXT NOT NULL,
    body         BLOB NOT NULL,
    content_type TEXT NOT NULL,
    published_at TEXT NOT NULL,
    attempts     INTEGER NOT NULL,
    reason       TEXT,
    dead_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_dead_letters_queue ON dead_letters(queue);

-- Enrichment intents written in the same transaction as the record
CREATE TABLE IF NOT EXISTS outbox (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id  TEXT NOT NULL,
    queue      TEXT NOT NULL,
    created_at TEXT NOT NULL,
    sent_at    TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox(sent_at, id);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
