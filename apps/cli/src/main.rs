//! Coursesmith CLI: on-demand course outlines and topic lessons.
//!
//! Requests are served from the local store when possible and otherwise
//! queued for generation, with live progress on the terminal.

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
