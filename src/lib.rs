//! Tax Agent Gateway Library
//!
//! AI tax assistance service with a fingerprint response cache and
//! category-aware query routing.
//!
//! # Features
//!
//! - **Fingerprint Cache**: bounded, TTL-aware response cache keyed by an
//!   order-independent digest of request attributes
//! - **Query Routing**: status inquiries are enriched with live refund data,
//!   general inquiries go straight to a generator; answers are cached per
//!   category policy
//! - **Streaming**: chunked delivery over SSE with deterministic `[DONE]`
//!   termination; streamed answers are never cached
//! - **Providers**: Ollama and OpenAI-compatible backends behind one
//!   `Generator` trait, selected per request by provider id

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod error;
pub mod generator;
pub mod relay;
pub mod router;
pub mod server;
pub mod status;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Service name reported by the banner and health endpoints
pub const SERVICE_NAME: &str = "tax-agent-gateway";

/// Setup tracing/logging
///
/// # Errors
///
/// Currently infallible; returns `Result` so callers treat logging setup
/// like the rest of startup.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
