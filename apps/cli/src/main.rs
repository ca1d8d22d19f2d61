//! iatigen CLI: merge tagged CSV components into published IATI documents.
//!
//! Tags source resources with file types, provisions destinations, and runs
//! the stage → convert → publish pipeline per namespace and domain.

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
