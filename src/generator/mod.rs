//! Generative backends
//!
//! A [`Generator`] produces text for a prompt, either as one buffered answer
//! or as a lazy, finite chunk sequence. Concrete providers are registered by
//! id in a [`GeneratorRegistry`] built from configuration and injected into
//! the router at construction; there is no ambient provider state.

mod ollama;
mod openai;

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::Stream;
use serde_json::Value;
use tracing::{info, warn};

pub use ollama::OllamaGenerator;
pub use openai::OpenAiGenerator;

use crate::config::{ProviderConfig, ProviderKind};
use crate::{Error, Result};

/// Opaque request context forwarded to providers.
///
/// A `BTreeMap` keeps serialization deterministic, which the cache relies on
/// when the context becomes part of a fingerprint.
pub type Context = BTreeMap<String, Value>;

/// Lazy, finite sequence of response chunks. Not restartable.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Shared system preamble for all providers
pub(crate) const SYSTEM_PREAMBLE: &str = "You are an expert tax assistant. \
    Provide helpful, accurate, and professional advice on tax-related \
    questions. Keep responses focused on tax implications and next steps.";

/// A generative backend
#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider id used for routing, confidence lookup, and logging
    fn id(&self) -> &str;

    /// Generate a complete response for the query
    ///
    /// # Errors
    ///
    /// Returns a generator error carrying a provider-specific message on any
    /// backend fault, including timeouts.
    async fn generate(&self, query: &str, context: Option<&Context>) -> Result<String>;

    /// Generate a response as a lazy chunk sequence
    ///
    /// # Errors
    ///
    /// Returns a generator error if the stream cannot be started; faults
    /// mid-stream surface as `Err` items on the stream itself.
    async fn generate_stream(
        &self,
        query: &str,
        context: Option<&Context>,
    ) -> Result<ChunkStream>;
}

/// Render the context map for inclusion in a prompt
pub(crate) fn render_context(context: Option<&Context>) -> Option<String> {
    let context = context?;
    if context.is_empty() {
        return None;
    }
    serde_json::to_string(context).ok()
}

/// Provider registry - holds all constructed generators by id
pub struct GeneratorRegistry {
    /// Generators by provider id
    generators: DashMap<String, Arc<dyn Generator>>,
}

impl GeneratorRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            generators: DashMap::new(),
        }
    }

    /// Build a registry from the configured provider table
    ///
    /// Disabled providers are skipped. A provider whose API key cannot be
    /// resolved is skipped with a log line rather than failing startup, so a
    /// partially configured gateway still serves the providers it has.
    #[must_use]
    pub fn from_config(providers: &std::collections::HashMap<String, ProviderConfig>) -> Self {
        let registry = Self::new();

        for (id, config) in providers.iter().filter(|(_, c)| c.enabled) {
            match Self::build(id, config) {
                Ok(Some(generator)) => {
                    registry.register(generator);
                    info!(provider = %id, kind = %config.kind, "Registered provider");
                }
                Ok(None) => {
                    info!(provider = %id, "API key not set, skipping provider");
                }
                Err(e) => {
                    warn!(provider = %id, error = %e, "Could not initialize provider");
                }
            }
        }

        registry
    }

    fn build(id: &str, config: &ProviderConfig) -> Result<Option<Arc<dyn Generator>>> {
        match config.kind {
            ProviderKind::Ollama => Ok(Some(Arc::new(OllamaGenerator::new(id, config)?))),
            ProviderKind::OpenAi => match config.resolve_api_key() {
                Some(api_key) => Ok(Some(Arc::new(OpenAiGenerator::new(id, config, api_key)?))),
                None => Ok(None),
            },
        }
    }

    /// Register a generator under its id
    pub fn register(&self, generator: Arc<dyn Generator>) {
        self.generators
            .insert(generator.id().to_string(), generator);
    }

    /// Look up a generator by provider id
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderNotFound`] when no generator is registered
    /// under the id.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Generator>> {
        self.generators
            .get(id)
            .map(|g| Arc::clone(&*g))
            .ok_or_else(|| Error::ProviderNotFound(id.to_string()))
    }

    /// Ids of all registered providers
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.generators.iter().map(|g| g.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of registered providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.generators.len()
    }

    /// Whether no provider is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
