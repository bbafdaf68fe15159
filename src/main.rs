//! refresh-cache CLI entry point.

use clap::Parser;

use refresh_cache::cli::context::load_config;
use refresh_cache::cli::{commands, handle_error, Cli, Commands};
use refresh_cache::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    let _logger = match LogConfig::from_settings(&config.logging).and_then(|c| LoggerImpl::init(&c)) {
        Ok(logger) => logger,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Get(args) => commands::get::execute(args, &config, cli.json).await,
        Commands::Watch(args) => commands::watch::execute(args, &config, cli.json).await,
        Commands::Collections => commands::collections::execute(&config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
