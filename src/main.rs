//! Tax Agent Gateway - AI tax assistance service
//!
//! Routes tax queries to generative backends with fingerprint response
//! caching and refund-status enrichment.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use tax_agent_gateway::{
    cli::{Cli, Command},
    config::Config,
    server::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::Providers) => run_providers(&cli),
        Some(Command::Serve) | None => run_server(cli).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            if cli.no_cache {
                config.cache.enabled = false;
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// List configured providers
fn run_providers(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    if config.providers.is_empty() {
        println!("No providers configured.");
        return ExitCode::SUCCESS;
    }

    let mut ids: Vec<&String> = config.providers.keys().collect();
    ids.sort();

    println!("Configured providers:\n");
    for id in ids {
        let provider = &config.providers[id];
        let state = if !provider.enabled {
            "disabled"
        } else if provider.api_key.is_some() && provider.resolve_api_key().is_none() {
            "skipped (API key not set)"
        } else {
            "active"
        };
        println!("  {} - {} ({}) [{}]", id, provider.kind, provider.model, state);
    }

    ExitCode::SUCCESS
}

/// Run the gateway server
async fn run_server(cli: Cli) -> ExitCode {
    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        providers = config.providers.len(),
        cache_enabled = config.cache.enabled,
        "Starting Tax Agent Gateway"
    );

    if let Err(e) = Gateway::new(config).run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
