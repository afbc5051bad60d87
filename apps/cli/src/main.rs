//! buyergroup CLI: discover and classify the purchasing committee of
//! target companies.
//!
//! Resolves companies, walks their current employees, assigns buyer-group
//! roles and keeps a deduplicated contacts database up to date.

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
