pub mod config_cmd;
pub mod health;
pub mod plan;

use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ember")]
#[command(version, about = "Knowledge-grounded emergency response planning")]
pub struct Cli {
    /// Path to ember.toml
    #[arg(long, global = true, env = "EMBER_CONFIG", default_value = "ember.toml")]
    pub config: PathBuf,

    /// HTTP listen address (overrides config file)
    #[arg(long, global = true, env = "EMBER_HTTP_ADDR")]
    pub http_addr: Option<SocketAddr>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server
    Serve,
    /// Coordinate a single request read from a JSON file
    Plan(PlanArgs),
    /// Probe every dependency once
    Health,
    /// Configuration commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Request file (`-` for stdin)
    pub request: PathBuf,
    /// Print the full resolution as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    Validate,
    Show,
}
