//! Core domain types for linkshelf records and enrichment jobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LinkshelfError, Result};

/// Content type attached to every published job.
pub const CONTENT_TYPE_JSON: &str = "application/json";

// ---------------------------------------------------------------------------
// RecordId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for record identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Generate a new time-sortable record identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse an identifier, mapping failures to [`LinkshelfError::InvalidId`].
    pub fn parse(value: &str) -> Result<Self> {
        value.parse().map_err(|e: uuid::Error| LinkshelfError::InvalidId {
            value: value.to_string(),
            reason: e.to_string(),
        })
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A stored bookmark-like record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identifier, assigned at creation.
    pub id: RecordId,
    /// The resource to enrich.
    pub url: String,
    /// Display title; enrichment overwrites it only with a non-empty value.
    #[serde(default)]
    pub title: String,
    /// Ordered tags; enrichment appends to them.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Opaque image references, never touched by enrichment.
    #[serde(default)]
    pub images: Vec<String>,
    /// Owning user, opaque to this system.
    #[serde(default)]
    pub user_id: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// Request to create a record.
#[derive(Debug, Clone, Default)]
pub struct NewRecord {
    /// Caller-chosen identifier; a fresh one is generated when `None`.
    pub id: Option<RecordId>,
    pub url: String,
    pub title: String,
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub user_id: String,
}

/// Full-replacement update of a record's mutable fields.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRecord {
    pub id: RecordId,
    pub url: String,
    pub title: String,
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub user_id: String,
}

impl From<&Record> for UpdateRecord {
    fn from(record: &Record) -> Self {
        Self {
            id: record.id,
            url: record.url.clone(),
            title: record.title.clone(),
            tags: record.tags.clone(),
            images: record.images.clone(),
            user_id: record.user_id.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// EnrichmentJob
// ---------------------------------------------------------------------------

/// Job payload on the wire: `{"id":"<record id>"}`.
///
/// The job only references the record; the worker re-reads the current
/// record when it processes the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentJob {
    /// Record identifier as published.
    #[serde(rename = "id")]
    pub record_id: String,
}

impl EnrichmentJob {
    /// Build a job for a record.
    pub fn new(id: RecordId) -> Self {
        Self {
            record_id: id.to_string(),
        }
    }

    /// Serialize to the JSON wire format.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| LinkshelfError::Decode(e.to_string()))
    }

    /// Deserialize from the JSON wire format.
    pub fn decode(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| LinkshelfError::Decode(e.to_string()))
    }

    /// Parse the referenced identifier.
    pub fn record_id(&self) -> Result<RecordId> {
        RecordId::parse(&self.record_id)
    }
}

// ---------------------------------------------------------------------------
// ExtractedMetadata
// ---------------------------------------------------------------------------

/// Page metadata pulled out of a fetched document. Never persisted on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, rename = "keywords", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ExtractedMetadata {
    /// All three fields are populated; traversal can stop.
    pub fn is_complete(&self) -> bool {
        !self.title.is_empty() && !self.description.is_empty() && !self.tags.is_empty()
    }
}
