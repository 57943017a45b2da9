use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::render::RenderArgs;
use super::serve::ServeArgs;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Enable debug mode
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Metrics server port (0 disables it)
    #[arg(long, default_value_t = 0, global = true)]
    pub metrics_port: u16,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Serve a built application, optionally prerendering pages
    Serve(ServeArgs),

    /// Render a single route and print the document
    Render(RenderArgs),
}
