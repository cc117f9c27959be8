//! Query routing
//!
//! Per request: classify, consult the fingerprint cache, and dispatch to the
//! status lookup and/or a generator on a miss. Streamed requests bypass the
//! cache entirely, in both directions. Backend faults resolve into the
//! configured fallback response with degraded confidence; the only typed
//! failure callers see is an unknown provider id.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::cache::FingerprintCache;
use crate::classifier::{QueryCategory, QueryClassifier};
use crate::config::{Config, ResponsesConfig};
use crate::generator::{Context, GeneratorRegistry};
use crate::relay::StreamRelay;
use crate::status::StatusLookup;
use crate::Result;

/// An incoming query, immutable once received
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Unique user identifier
    pub user_id: String,
    /// The tax-related query text
    pub query: String,
    /// Additional context for the query
    #[serde(default)]
    pub context: Option<Context>,
    /// Whether to stream the response
    #[serde(default)]
    pub stream: bool,
    /// Provider id to generate with
    #[serde(default = "default_provider")]
    pub provider: String,
}

fn default_provider() -> String {
    "ollama".to_string()
}

/// A buffered answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// The generated response text
    pub response: String,
    /// Confidence score (0.0-1.0), assigned per provider from configuration
    pub confidence: f64,
    /// Suggested actions, fixed by configuration
    pub suggestions: Vec<String>,
    /// Recommended next steps, fixed by configuration
    pub next_steps: Vec<String>,
}

/// What the router decided to do with a request
pub enum Routed {
    /// Complete answer, returned as one unit
    Buffered(QueryResponse),
    /// Incremental answer, delivered frame by frame
    Streaming(StreamRelay),
}

/// Routes queries between the cache, the status lookup, and the generators
///
/// All collaborators are injected at construction; the router holds no
/// cross-request state of its own.
pub struct QueryRouter {
    classifier: QueryClassifier,
    cache: Arc<FingerprintCache<QueryResponse>>,
    generators: Arc<GeneratorRegistry>,
    status: Arc<dyn StatusLookup>,
    responses: ResponsesConfig,
    cache_enabled: bool,
    /// Short TTL for status answers; refund data is volatile
    status_ttl: Duration,
    stream_buffer: usize,
}

impl QueryRouter {
    /// Create a router over the given collaborators
    #[must_use]
    pub fn new(
        config: &Config,
        cache: Arc<FingerprintCache<QueryResponse>>,
        generators: Arc<GeneratorRegistry>,
        status: Arc<dyn StatusLookup>,
    ) -> Self {
        Self {
            classifier: QueryClassifier::new(&config.classifier.status_subject),
            cache,
            generators,
            status,
            responses: config.responses.clone(),
            cache_enabled: config.cache.enabled,
            status_ttl: config.cache.status_ttl,
            stream_buffer: config.streaming.buffer_size,
        }
    }

    /// Route one request to a buffered response or a stream
    ///
    /// Identical concurrent misses are not serialized: both may dispatch and
    /// both may write the cache, last write winning. Responses are
    /// idempotent-enough text, so the duplicate backend call is accepted
    /// rather than paid for with a per-key lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderNotFound`] for an unknown provider id. All
    /// other backend faults resolve into the fallback response.
    #[tracing::instrument(
        skip(self, request),
        fields(
            user_id = %request.user_id,
            provider = %request.provider,
            request_id = %uuid::Uuid::new_v4()
        )
    )]
    pub async fn route(&self, request: QueryRequest) -> Result<Routed> {
        let category = self.classifier.classify(&request.query);
        info!(category = ?category, stream = request.stream, "Routing query");

        if request.stream {
            return Ok(Routed::Streaming(self.dispatch_stream(&request).await?));
        }

        let components = request_key(category, &request);

        if self.cache_enabled {
            if let Some(cached) = self.cache.get(&components) {
                debug!("Serving cached response");
                return Ok(Routed::Buffered(cached));
            }
        }

        let outcome = match category {
            QueryCategory::StatusInquiry => self.dispatch_status(&request).await,
            QueryCategory::GeneralInquiry => self.dispatch_general(&request).await,
        };

        match outcome {
            Ok((response, ttl_override)) => {
                if self.cache_enabled {
                    self.cache.set(&components, response.clone(), ttl_override);
                }
                Ok(Routed::Buffered(response))
            }
            Err(e) if e.is_recoverable() => {
                error!(error = %e, "Backend dispatch failed, serving fallback");
                Ok(Routed::Buffered(self.fallback_response()))
            }
            Err(e) => Err(e),
        }
    }

    /// Streamed requests never touch the cache
    async fn dispatch_stream(&self, request: &QueryRequest) -> Result<StreamRelay> {
        let generator = self.generators.get(&request.provider)?;

        match generator
            .generate_stream(&request.query, request.context.as_ref())
            .await
        {
            Ok(chunks) => Ok(StreamRelay::spawn(
                generator.id(),
                chunks,
                self.stream_buffer,
            )),
            Err(e) => {
                error!(error = %e, "Could not start generator stream");
                Ok(StreamRelay::failed(e.to_string()))
            }
        }
    }

    async fn dispatch_status(
        &self,
        request: &QueryRequest,
    ) -> Result<(QueryResponse, Option<Duration>)> {
        let report = self.status.status_report(&request.user_id).await?;
        let prompt = enhanced_prompt(&request.query, &report.to_prompt_block());

        let generator = self.generators.get(&request.provider)?;
        let text = generator
            .generate(&prompt, request.context.as_ref())
            .await?;

        Ok((
            self.response_for(&request.provider, text),
            Some(self.status_ttl),
        ))
    }

    async fn dispatch_general(
        &self,
        request: &QueryRequest,
    ) -> Result<(QueryResponse, Option<Duration>)> {
        let generator = self.generators.get(&request.provider)?;
        let text = generator
            .generate(&request.query, request.context.as_ref())
            .await?;

        Ok((self.response_for(&request.provider, text), None))
    }

    fn response_for(&self, provider: &str, text: String) -> QueryResponse {
        let confidence = self
            .responses
            .confidence
            .get(provider)
            .copied()
            .unwrap_or(self.responses.default_confidence);

        QueryResponse {
            response: text,
            confidence,
            suggestions: self.responses.suggestions.clone(),
            next_steps: self.responses.next_steps.clone(),
        }
    }

    fn fallback_response(&self) -> QueryResponse {
        QueryResponse {
            response: self.responses.fallback_message.clone(),
            confidence: self.responses.degraded_confidence,
            suggestions: self.responses.suggestions.clone(),
            next_steps: self.responses.next_steps.clone(),
        }
    }
}

/// Fingerprint components for a buffered request.
///
/// Status inquiries also carry the user id: their answers embed that user's
/// refund data and must never be served to anyone else.
fn request_key(category: QueryCategory, request: &QueryRequest) -> Vec<String> {
    let mut components = vec![
        category.tag().to_string(),
        request.query.clone(),
        request.provider.clone(),
        serialize_context(request.context.as_ref()),
    ];
    if category == QueryCategory::StatusInquiry {
        components.push(request.user_id.clone());
    }
    components
}

/// Prompt for status inquiries: the raw question plus the formatted records
fn enhanced_prompt(query: &str, status_block: &str) -> String {
    format!(
        "The user asked: '{query}'\n\n\
         Here is their current refund status information:\n{status_block}\n\n\
         Provide a concise, natural response that explains their refund status clearly."
    )
}

/// Serialize the context deterministically for fingerprinting
///
/// Falls back to the debug rendering rather than erroring; a cache key that
/// is merely ugly is better than a failed request.
fn serialize_context(context: Option<&Context>) -> String {
    match context {
        None => String::new(),
        Some(map) => serde_json::to_string(map).unwrap_or_else(|_| format!("{map:?}")),
    }
}
