//! Application configuration for linkshelf.
//!
//! User config lives at `~/.linkshelf/linkshelf.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkshelfError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "linkshelf.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".linkshelf";

/// Default database file name inside the config directory.
const DATABASE_FILE_NAME: &str = "linkshelf.db";

// ---------------------------------------------------------------------------
// Config structs (matching linkshelf.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Record store settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Queue and delivery settings.
    #[serde(default)]
    pub broker: BrokerConfig,

    /// How record creation hands jobs to the broker.
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Remote fetch settings.
    #[serde(default)]
    pub fetch: FetchSettings,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database file. Defaults to `~/.linkshelf/linkshelf.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Deadline for a single repository call, in milliseconds.
    #[serde(default = "default_storage_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            timeout_ms: default_storage_timeout_ms(),
        }
    }
}

fn default_storage_timeout_ms() -> u64 {
    5_000
}

/// When the consumer acknowledges a delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AckMode {
    /// Acknowledged by the broker on receipt (at-most-once, lossy on crash).
    #[default]
    Auto,
    /// Acknowledged by the worker once the merged record is persisted.
    AfterPersist,
}

/// `[broker]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Name of the enrichment queue.
    #[serde(default = "default_queue")]
    pub queue: String,

    /// Acknowledgement policy for the enrichment worker.
    #[serde(default)]
    pub ack_mode: AckMode,

    /// How often the durable consumer polls an empty queue.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue: default_queue(),
            ack_mode: AckMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_queue() -> String {
    "link_enrichment".into()
}
fn default_poll_interval_ms() -> u64 {
    250
}

/// How a created record's job reaches the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishMode {
    /// Publish synchronously right after the insert.
    #[default]
    Direct,
    /// Write an outbox row in the insert transaction; a relay publishes it.
    Outbox,
}

/// `[publisher]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    /// Direct publish or transactional outbox.
    #[serde(default)]
    pub mode: PublishMode,

    /// Delay between outbox relay passes.
    #[serde(default = "default_relay_interval_ms")]
    pub relay_interval_ms: u64,

    /// Maximum outbox rows forwarded per pass.
    #[serde(default = "default_relay_batch_size")]
    pub relay_batch_size: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            mode: PublishMode::default(),
            relay_interval_ms: default_relay_interval_ms(),
            relay_batch_size: default_relay_batch_size(),
        }
    }
}

fn default_relay_interval_ms() -> u64 {
    1_000
}
fn default_relay_batch_size() -> u32 {
    32
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSettings {
    /// Per-request deadline in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// TCP/TLS connect deadline in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// How long idle pooled connections are kept.
    #[serde(default = "default_pool_idle_timeout_secs")]
    pub pool_idle_timeout_secs: u64,

    /// Idle connections kept per host.
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,

    /// Redirects followed before giving up.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Largest body accepted, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: u64,

    /// User-Agent header override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,

    /// Refuse loopback/private/link-local targets.
    #[serde(default)]
    pub block_private_hosts: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_idle_timeout_secs: default_pool_idle_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            max_redirects: default_max_redirects(),
            max_body_bytes: default_max_body_bytes(),
            user_agent: None,
            block_private_hosts: false,
        }
    }
}

fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_pool_idle_timeout_secs() -> u64 {
    90
}
fn default_pool_max_idle_per_host() -> usize {
    4
}
fn default_max_redirects() -> usize {
    10
}
fn default_max_body_bytes() -> u64 {
    5 * 1024 * 1024
}

impl AppConfig {
    /// Resolved database path (config value or `~/.linkshelf/linkshelf.db`).
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join(DATABASE_FILE_NAME)),
        }
    }
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from the file config)
// ---------------------------------------------------------------------------

/// Runtime HTTP client configuration for the fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Default per-request deadline.
    pub timeout: Duration,
    /// Connect deadline.
    pub connect_timeout: Duration,
    /// Idle pooled connection lifetime.
    pub pool_idle_timeout: Duration,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    /// Redirect limit.
    pub max_redirects: usize,
    /// Body size cap in bytes.
    pub max_body_bytes: u64,
    /// User-Agent header; `None` uses the crate default.
    pub user_agent: Option<String>,
    /// Refuse loopback/private targets.
    pub block_private_hosts: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        let fetch = &config.fetch;
        Self {
            timeout: Duration::from_secs(fetch.timeout_secs),
            connect_timeout: Duration::from_secs(fetch.connect_timeout_secs),
            pool_idle_timeout: Duration::from_secs(fetch.pool_idle_timeout_secs),
            pool_max_idle_per_host: fetch.pool_max_idle_per_host,
            max_redirects: fetch.max_redirects,
            max_body_bytes: fetch.max_body_bytes,
            user_agent: fetch.user_agent.clone(),
            block_private_hosts: fetch.block_private_hosts,
        }
    }
}

/// Runtime configuration for the enrichment worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Queue the worker consumes.
    pub queue: String,
    /// Acknowledgement policy.
    pub ack_mode: AckMode,
    /// Deadline applied to each repository call.
    pub repository_timeout: Duration,
    /// Deadline applied to each page fetch.
    pub fetch_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            queue: config.broker.queue.clone(),
            ack_mode: config.broker.ack_mode,
            repository_timeout: Duration::from_millis(config.storage.timeout_ms),
            fetch_timeout: Duration::from_secs(config.fetch.timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.linkshelf/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LinkshelfError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.linkshelf/linkshelf.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LinkshelfError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        LinkshelfError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    if config.broker.queue.trim().is_empty() {
        return Err(LinkshelfError::config("broker.queue must not be empty"));
    }
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    init_config_at(&config_file_path()?)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config_at(path: &Path) -> Result<PathBuf> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| LinkshelfError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LinkshelfError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| LinkshelfError::io(path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path.to_path_buf())
}
