//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use linkshelf_broker::{Broker, DurableBroker};
use linkshelf_core::{EnrichmentWorker, Enricher, JobPublisher, OutboxRelay, RecordService};
use linkshelf_scraper::{Fetcher, MetadataSource};
use linkshelf_shared::{
    AppConfig, Cancellation, FetchConfig, NewRecord, PublishMode, Record, RecordId, UpdateRecord,
    WorkerConfig, init_config, init_config_at, load_config, load_config_from,
};
use linkshelf_storage::Storage;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// linkshelf: bookmarks that fill in their own titles and tags.
#[derive(Parser)]
#[command(
    name = "linkshelf",
    version,
    about = "Store links and enrich them with page metadata in the background.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.linkshelf/linkshelf.toml).
    #[arg(long, env = "LINKSHELF_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Store a new link and queue it for enrichment.
    Add {
        /// URL to store.
        url: String,

        /// Initial title.
        #[arg(short, long, default_value = "")]
        title: String,

        /// Tag (repeatable).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Image reference (repeatable).
        #[arg(long = "image")]
        images: Vec<String>,

        /// Owning user.
        #[arg(short, long, default_value = "")]
        user: String,
    },

    /// Print one record as JSON.
    Show {
        /// Record id.
        id: String,
    },

    /// List stored records.
    List {
        /// Only records owned by this user.
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Replace fields of an existing record.
    Update {
        /// Record id.
        id: String,

        #[arg(long)]
        url: Option<String>,

        #[arg(short, long)]
        title: Option<String>,

        /// Replacement tag list (repeatable).
        #[arg(long = "tag")]
        tags: Option<Vec<String>>,

        /// Replacement image list (repeatable).
        #[arg(long = "image")]
        images: Option<Vec<String>>,

        #[arg(short, long)]
        user: Option<String>,
    },

    /// Delete a record.
    Delete {
        /// Record id.
        id: String,
    },

    /// Enrich one record now, without going through the queue.
    Enrich {
        /// Record id.
        id: String,
    },

    /// Fetch a URL and print the metadata that enrichment would extract.
    Extract {
        /// Page URL.
        url: String,
    },

    /// Run the enrichment worker (and the outbox relay in outbox mode).
    Serve,

    /// Queue inspection.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Queue subcommands.
#[derive(Subcommand)]
pub(crate) enum QueueAction {
    /// Show message, dead-letter, and outbox counts.
    Status,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "linkshelf=info",
        1 => "linkshelf=debug",
        _ => "linkshelf=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Add {
            url,
            title,
            tags,
            images,
            user,
        } => {
            let new = NewRecord {
                id: None,
                url,
                title,
                tags,
                images,
                user_id: user,
            };
            cmd_add(config_path, new).await
        }
        Command::Show { id } => cmd_show(config_path, &id).await,
        Command::List { user } => cmd_list(config_path, user.as_deref()).await,
        Command::Update {
            id,
            url,
            title,
            tags,
            images,
            user,
        } => {
            let changes = RecordChanges {
                url,
                title,
                tags,
                images,
                user_id: user,
            };
            cmd_update(config_path, &id, changes).await
        }
        Command::Delete { id } => cmd_delete(config_path, &id).await,
        Command::Enrich { id } => cmd_enrich(config_path, &id).await,
        Command::Extract { url } => cmd_extract(config_path, &url).await,
        Command::Serve => cmd_serve(config_path).await,
        Command::Queue { action } => match action {
            QueueAction::Status => cmd_queue_status(config_path).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

// ---------------------------------------------------------------------------
// Runtime wiring
// ---------------------------------------------------------------------------

/// Everything a command needs, built from the resolved config.
struct Runtime {
    config: AppConfig,
    storage: Arc<Storage>,
    broker: Arc<dyn Broker>,
}

impl Runtime {
    async fn open(config_path: Option<&Path>) -> Result<Self> {
        let config = resolve_config(config_path)?;
        let db_path = config.database_path()?;
        let storage = Arc::new(Storage::open(&db_path).await?);
        let broker = Arc::new(DurableBroker::new(
            storage.clone(),
            Duration::from_millis(config.broker.poll_interval_ms),
        ));
        Ok(Self {
            config,
            storage,
            broker,
        })
    }

    fn records(&self) -> RecordService {
        let publisher = JobPublisher::new(self.broker.clone(), self.config.broker.queue.clone());
        RecordService::new(self.storage.clone(), publisher, self.config.publisher.mode)
    }

    fn enricher(&self) -> Result<Enricher> {
        let fetcher = Fetcher::new(&FetchConfig::from(&self.config))?;
        Ok(Enricher::new(
            self.storage.clone(),
            Arc::new(fetcher),
            &WorkerConfig::from(&self.config),
        ))
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

fn parse_id(raw: &str) -> Result<RecordId> {
    Ok(RecordId::parse(raw)?)
}

/// Cancellation that fires on Ctrl-C.
fn ctrl_c_cancellation() -> Cancellation {
    cancel_on_signal(tokio::signal::ctrl_c())
}

/// Cancellation that fires once `signal` resolves successfully. A listener
/// that fails to register leaves the cancellation untouched.
fn cancel_on_signal<F>(signal: F) -> Cancellation
where
    F: Future<Output = std::io::Result<()>> + Send + 'static,
{
    let cancel = Cancellation::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                trigger.cancel();
            }
            Err(e) => warn!(error = %e, "failed to listen for Ctrl-C"),
        }
    });
    cancel
}

// ---------------------------------------------------------------------------
// Record commands
// ---------------------------------------------------------------------------

async fn cmd_add(config_path: Option<&Path>, new: NewRecord) -> Result<()> {
    let rt = Runtime::open(config_path).await?;
    let record = rt.records().create(&new).await?;

    println!("Added {}", record.id);
    println!("  URL:   {}", record.url);
    println!(
        "  Queue: {} ({:?} publish)",
        rt.config.broker.queue, rt.config.publisher.mode
    );
    Ok(())
}

async fn cmd_show(config_path: Option<&Path>, id: &str) -> Result<()> {
    let rt = Runtime::open(config_path).await?;
    let record = rt.records().get(&parse_id(id)?).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cmd_list(config_path: Option<&Path>, user: Option<&str>) -> Result<()> {
    let rt = Runtime::open(config_path).await?;
    let records = rt.records().list(user).await?;

    if records.is_empty() {
        println!("No records.");
        return Ok(());
    }
    for record in &records {
        print_summary(record);
    }
    println!();
    println!("  {} record(s)", records.len());
    Ok(())
}

/// Optional replacements for `linkshelf update`.
struct RecordChanges {
    url: Option<String>,
    title: Option<String>,
    tags: Option<Vec<String>>,
    images: Option<Vec<String>>,
    user_id: Option<String>,
}

impl RecordChanges {
    fn apply(self, record: &Record) -> UpdateRecord {
        let mut update = UpdateRecord::from(record);
        if let Some(url) = self.url {
            update.url = url;
        }
        if let Some(title) = self.title {
            update.title = title;
        }
        if let Some(tags) = self.tags {
            update.tags = tags;
        }
        if let Some(images) = self.images {
            update.images = images;
        }
        if let Some(user_id) = self.user_id {
            update.user_id = user_id;
        }
        update
    }
}

async fn cmd_update(config_path: Option<&Path>, id: &str, changes: RecordChanges) -> Result<()> {
    let rt = Runtime::open(config_path).await?;
    let records = rt.records();
    let current = records.get(&parse_id(id)?).await?;
    let updated = records.update(&changes.apply(&current)).await?;

    println!("Updated {}", updated.id);
    print_summary(&updated);
    Ok(())
}

async fn cmd_delete(config_path: Option<&Path>, id: &str) -> Result<()> {
    let rt = Runtime::open(config_path).await?;
    rt.records().delete(&parse_id(id)?).await?;
    println!("Deleted {id}");
    Ok(())
}

fn print_summary(record: &Record) {
    let title = if record.title.is_empty() {
        "(untitled)"
    } else {
        record.title.as_str()
    };
    println!("{}  {}", record.id, title);
    println!("    {}", record.url);
    if !record.tags.is_empty() {
        println!("    tags: {}", record.tags.join(", "));
    }
}

// ---------------------------------------------------------------------------
// Enrichment commands
// ---------------------------------------------------------------------------

async fn cmd_enrich(config_path: Option<&Path>, id: &str) -> Result<()> {
    let rt = Runtime::open(config_path).await?;
    let cancel = ctrl_c_cancellation();
    let record = rt.enricher()?.enrich(&parse_id(id)?, &cancel).await?;

    println!("Enriched {}", record.id);
    print_summary(&record);
    Ok(())
}

async fn cmd_extract(config_path: Option<&Path>, url: &str) -> Result<()> {
    let config = resolve_config(config_path)?;
    let fetch = FetchConfig::from(&config);
    let fetcher = Fetcher::new(&fetch)?;
    let cancel = ctrl_c_cancellation();

    let meta = fetcher.fetch_metadata(url, fetch.timeout, &cancel).await?;
    println!("{}", serde_json::to_string_pretty(&meta)?);
    Ok(())
}

async fn cmd_serve(config_path: Option<&Path>) -> Result<()> {
    let rt = Runtime::open(config_path).await?;
    let worker_config = WorkerConfig::from(&rt.config);
    let worker = EnrichmentWorker::new(rt.broker.clone(), rt.enricher()?, &worker_config);
    let cancel = ctrl_c_cancellation();

    info!(
        queue = %worker_config.queue,
        ack_mode = ?worker_config.ack_mode,
        publish_mode = ?rt.config.publisher.mode,
        "serving"
    );

    let relay = match rt.config.publisher.mode {
        PublishMode::Outbox => {
            let relay = OutboxRelay::new(rt.storage.clone(), rt.broker.clone(), &rt.config.publisher);
            let relay_cancel = cancel.clone();
            Some(tokio::spawn(async move { relay.run(&relay_cancel).await }))
        }
        PublishMode::Direct => None,
    };

    let outcome = worker.run(&cancel).await;

    // A fatal worker error also stops the relay
    cancel.cancel();
    if let Some(handle) = relay {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "outbox relay failed"),
            Err(e) => warn!(error = %e, "outbox relay task panicked"),
        }
    }

    outcome.map_err(|e| eyre!("enrichment worker stopped: {e}"))
}

// ---------------------------------------------------------------------------
// Queue & config commands
// ---------------------------------------------------------------------------

async fn cmd_queue_status(config_path: Option<&Path>) -> Result<()> {
    let rt = Runtime::open(config_path).await?;
    let queue = &rt.config.broker.queue;
    let stats = rt.storage.queue_stats(queue).await?;

    println!("Queue: {queue}");
    println!("  Ready:          {}", stats.ready);
    println!("  Unacked:        {}", stats.unacked);
    println!("  Dead letters:   {}", stats.dead);
    println!("  Outbox pending: {}", stats.outbox_pending);

    let dead = rt.storage.list_dead_letters(queue).await?;
    for letter in dead.iter().rev().take(5) {
        println!(
            "  ✗ #{} at {}: {}",
            letter.message_id,
            letter.dead_at.to_rfc3339(),
            letter.reason.as_deref().unwrap_or("(no reason)")
        );
    }
    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(path) => init_config_at(path)?,
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    println!("# database: {}", config.database_path()?.display());
    Ok(())
}
