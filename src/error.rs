//! Error types for the tax agent gateway

use std::io;

use thiserror::Error;

/// Result type alias for the tax agent gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Tax agent gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested provider is not registered
    #[error("Unknown provider: {0}")]
    ProviderNotFound(String),

    /// Generative backend fault
    #[error("Generator error ({provider}): {message}")]
    Generator {
        /// Provider id the fault originated from
        provider: String,
        /// Provider-specific message
        message: String,
    },

    /// Refund status lookup fault
    #[error("Status lookup failed: {message}")]
    StatusLookup {
        /// Human-readable description
        message: String,
        /// Upstream HTTP status, when the upstream answered at all
        status: Option<u16>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a generator error tagged with its provider
    pub fn generator(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generator {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a status lookup error, with the upstream HTTP status when known
    pub fn status_lookup(message: impl Into<String>, status: Option<u16>) -> Self {
        Self::StatusLookup {
            message: message.into(),
            status,
        }
    }

    /// Whether the router may resolve this failure into a fallback response
    /// instead of surfacing it.
    ///
    /// Backend faults (generator, status lookup, plain HTTP) are recoverable;
    /// everything else crosses the boundary typed.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Generator { .. } | Self::StatusLookup { .. } | Self::Http(_)
        )
    }
}
