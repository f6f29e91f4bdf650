//! linkshelf CLI: bookmark records with asynchronous link enrichment.
//!
//! Records are stored locally; creating one queues a job that the `serve`
//! worker picks up to fill in the page title and keywords.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
