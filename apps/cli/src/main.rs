//! VaultZero CLI: Zero Trust maturity assessment.
//!
//! Runs the questionnaire and document pipelines, manages the peer
//! benchmark corpus, and queries the CISA KEV feed.

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