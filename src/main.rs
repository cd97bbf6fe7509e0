//! Swarm CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use swarm_dispatch::cli::{commands, handle_error, Cli, Commands};
use swarm_dispatch::domain::models::Config;
use swarm_dispatch::infrastructure::config::ConfigLoader;
use swarm_dispatch::infrastructure::logging::{LogConfig, LoggerImpl};

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    if let Some(ref level) = cli.log_level {
        config.logging.level.clone_from(level);
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let log_config = LogConfig::from_settings(&config.logging)?;
    let _logger = LoggerImpl::init(&log_config).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Dispatch(args) => commands::dispatch::execute(args, &config, cli.json).await,
        Commands::Status(args) => commands::status::execute(args, &config, cli.json).await,
        Commands::Worktree(args) => commands::worktree::execute(args, &config, cli.json).await,
        Commands::Sandbox(args) => commands::sandbox::execute(args, &config, cli.json).await,
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = run(cli).await {
        handle_error(err, json);
    }
}
