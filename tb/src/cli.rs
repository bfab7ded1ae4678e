//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// topicbridge - pub/sub bus to network client bridge
#[derive(Parser)]
#[command(
    name = "tb",
    about = "Expose a pub/sub message bus to remote clients, on demand",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Log to this file under the data directory instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the bridge and its client socket until interrupted
    Serve {
        /// Socket path override
        #[arg(short, long)]
        socket: Option<PathBuf>,

        /// Robot model override (transform target frame is `<model>/base_link`)
        #[arg(short, long)]
        robot_model: Option<String>,

        /// Warn about topics that cannot be served
        #[arg(long)]
        strict: bool,
    },

    /// Print the effective configuration
    Config {
        /// Output format
        #[arg(short, long, default_value = "yaml")]
        format: ConfigFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
}
