//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::commands::get::GetArgs;
use super::commands::watch::WatchArgs;

#[derive(Parser, Debug)]
#[command(name = "refresh-cache")]
#[command(about = "Self-refreshing TTL cache over HTTP collections", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file to load instead of the .refresh-cache directory
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch items of a configured collection
    Get(GetArgs),

    /// Fetch items and keep refreshing them on their lifespan
    Watch(WatchArgs),

    /// List configured collections
    Collections,
}
