use anyhow::Result;
use clap::Parser;
use instancer::cli::Cli;
use instancer::utils;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    utils::logger::init()?;

    // Parse CLI arguments and execute
    let cli = Cli::parse();
    cli.execute().await
}
