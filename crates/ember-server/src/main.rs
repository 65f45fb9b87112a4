#![allow(dead_code)]
mod adapters;
mod bootstrap;
mod cli;
mod config;
mod health;
mod http;
mod serve;

use clap::Parser;
use cli::{Cli, Commands};
use config::EmberConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = EmberConfig::load_or_default(&cli.config);
    config.apply_env();
    if let Some(addr) = cli.http_addr {
        config.server.http_addr = addr;
    }

    match cli.command {
        Commands::Serve => serve::run(config).await,
        Commands::Plan(args) => cli::plan::run(args, config).await,
        Commands::Health => cli::health::run(config).await,
        Commands::Config(cmd) => cli::config_cmd::run(cmd, &cli.config).await,
    }
}
