//! Quarry CLI: retrieval-augmented answering from the terminal.
//!
//! Plans searches for a question, gathers and trims the matching pages,
//! distils them into facts, and prints the answer prompt (or the answer).

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
