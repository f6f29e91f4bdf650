//! Link-enrichment pipeline for linkshelf.
//!
//! This crate ties storage, broker, and scraper together:
//! - [`RecordService`]: record CRUD; creation schedules enrichment
//! - [`JobPublisher`]: publishes enrichment jobs
//! - [`EnrichmentWorker`]: consumes jobs and runs the [`Enricher`]
//! - [`OutboxRelay`]: forwards outbox rows when publishing is transactional
//! - [`merge`]: combines a stored record with extracted page metadata

pub mod enrich;
pub mod merge;
pub mod outbox;
pub mod publisher;
pub mod records;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use enrich::Enricher;
pub use merge::merge;
pub use outbox::OutboxRelay;
pub use publisher::JobPublisher;
pub use records::RecordService;
pub use worker::{EnrichmentWorker, WorkerState};
