//! stacksift CLI: keyword search over Substack posts.
//!
//! Drives a headless Chrome through the platform's search page and writes
//! the posts it finds as JSON.

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
