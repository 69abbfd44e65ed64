//! chunkup command-line uploader entry point.

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    let path = cli.config.clone().unwrap_or_else(config::config_path);
    let mut config = config::Config::load_from(&path)?;
    config.apply_overrides(&cli);
    if cli.save_config {
        config.save_to(&path)?;
        tracing::info!(path = %path.display(), "configuration saved");
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, &cli.file))
}
