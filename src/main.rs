use clap::Parser;
use color_eyre::Result;
use tracing::*;
use tracing_subscriber::EnvFilter;

use mkci::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("MKCI_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
    debug!("starting mkci");

    Cli::parse().execute().await?;

    Ok(())
}
