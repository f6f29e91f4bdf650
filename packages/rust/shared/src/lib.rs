//! Shared types, error model, and configuration for linkshelf.
//!
//! This crate is the foundation depended on by all other linkshelf crates.
//! It provides:
//! - [`LinkshelfError`]: the unified error type
//! - Domain types ([`Record`], [`RecordId`], [`EnrichmentJob`], [`ExtractedMetadata`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], [`WorkerConfig`], config loading)
//! - [`Cancellation`]: the root cancellation signal shared by long-running tasks

pub mod cancel;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use cancel::Cancellation;
pub use config::{
    AckMode, AppConfig, BrokerConfig, FetchConfig, FetchSettings, PublishMode, PublisherConfig,
    StorageConfig, WorkerConfig, config_dir, config_file_path, init_config, init_config_at,
    load_config, load_config_from,
};
pub use error::{LinkshelfError, Result};
pub use types::{
    CONTENT_TYPE_JSON, EnrichmentJob, ExtractedMetadata, NewRecord, Record, RecordId,
    UpdateRecord,
};
