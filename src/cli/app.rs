use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::env::{CliArgs, Commands};
use super::render::cmd_render;
use super::runtime::{init_logging, load_config, LoadedConfig};
use super::serve::cmd_serve;
use crate::metrics;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    init_logging(&cli.log_level, cli.debug, cli.log_json)?;
    let _metrics_server = metrics::spawn_metrics_server(cli.metrics_port);

    info!("Starting prerender v{}", env!("CARGO_PKG_VERSION"));

    let LoadedConfig { config, path } = load_config(cli.config.as_ref()).await?;
    tracing::debug!(config = %path.display(), "configuration resolved");

    let outcome = match cli.command {
        Commands::Serve(args) => cmd_serve(args, config).await,
        Commands::Render(args) => cmd_render(args, config).await,
    };

    match outcome {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
