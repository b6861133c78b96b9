//! ContentForge CLI: feed-to-article content pipeline.
//!
//! Ingests syndication feeds, scores and fact-checks items, clusters them
//! by topic, and publishes generated articles to WordPress.

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
