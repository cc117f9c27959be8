//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tax Agent Gateway - AI tax assistance with fingerprint response caching
#[derive(Parser, Debug)]
#[command(name = "tax-agent-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "TAX_AGENT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "TAX_AGENT_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "TAX_AGENT_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "TAX_AGENT_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TAX_AGENT_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Disable response caching
    #[arg(long)]
    pub no_cache: bool,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// List configured providers and whether they would register
    Providers,
}
