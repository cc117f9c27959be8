//! Router integration tests with mock collaborators

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use tax_agent_gateway::cache::FingerprintCache;
use tax_agent_gateway::config::Config;
use tax_agent_gateway::generator::{ChunkStream, Context, Generator, GeneratorRegistry};
use tax_agent_gateway::relay::Frame;
use tax_agent_gateway::router::{QueryRequest, QueryResponse, QueryRouter, Routed};
use tax_agent_gateway::status::{RefundRecord, StatusLookup, StatusReport};
use tax_agent_gateway::{Error, Result};

/// Scripted generator that records prompts and counts invocations
struct MockGenerator {
    id: String,
    reply: String,
    chunks: Vec<String>,
    fail: bool,
    calls: AtomicUsize,
    stream_calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockGenerator {
    fn new(id: &str, reply: &str) -> Self {
        Self {
            id: id.to_string(),
            reply: reply.to_string(),
            chunks: vec!["chunk-0".to_string(), "chunk-1".to_string()],
            fail: false,
            calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing(id: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(id, "")
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().last().cloned()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    fn id(&self) -> &str {
        &self.id
    }

    async fn generate(&self, query: &str, _context: Option<&Context>) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(query.to_string());
        if self.fail {
            return Err(Error::generator(&self.id, "backend down"));
        }
        Ok(self.reply.clone())
    }

    async fn generate_stream(
        &self,
        _query: &str,
        _context: Option<&Context>,
    ) -> Result<ChunkStream> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::generator(&self.id, "backend down"));
        }
        let chunks: Vec<Result<String>> = self.chunks.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }
}

/// Status lookup that answers from a fixed script
struct MockStatusLookup {
    outcome: std::result::Result<Vec<RefundRecord>, ()>,
}

impl MockStatusLookup {
    fn with_record(status: &str) -> Self {
        let record = RefundRecord {
            filing_id: Some("F-1".to_string()),
            status: Some(status.to_string()),
            amount: Some(1200.0),
            ..RefundRecord::default()
        };
        Self {
            outcome: Ok(vec![record]),
        }
    }

    fn unavailable() -> Self {
        Self { outcome: Err(()) }
    }
}

#[async_trait]
impl StatusLookup for MockStatusLookup {
    async fn status_report(&self, _user_id: &str) -> Result<StatusReport> {
        match &self.outcome {
            Ok(records) if records.is_empty() => Ok(StatusReport::NoData),
            Ok(records) => Ok(StatusReport::Records(records.clone())),
            Err(()) => Err(Error::status_lookup("upstream status 503", Some(503))),
        }
    }
}

struct Harness {
    router: QueryRouter,
    cache: Arc<FingerprintCache<QueryResponse>>,
    generator: Arc<MockGenerator>,
}

fn harness(generator: MockGenerator, status: MockStatusLookup, config: Config) -> Harness {
    let generator = Arc::new(generator);
    let registry = GeneratorRegistry::new();
    registry.register(Arc::clone(&generator) as Arc<dyn Generator>);

    let cache = Arc::new(FingerprintCache::new(
        config.cache.max_entries,
        config.cache.default_ttl,
    ));
    let router = QueryRouter::new(
        &config,
        Arc::clone(&cache),
        Arc::new(registry),
        Arc::new(status),
    );

    Harness {
        router,
        cache,
        generator,
    }
}

fn request(query: &str, provider: &str, stream: bool) -> QueryRequest {
    QueryRequest {
        user_id: "user-1".to_string(),
        query: query.to_string(),
        context: None,
        stream,
        provider: provider.to_string(),
    }
}

fn buffered(routed: Routed) -> QueryResponse {
    match routed {
        Routed::Buffered(response) => response,
        Routed::Streaming(_) => panic!("expected a buffered response"),
    }
}

#[tokio::test]
async fn general_query_cached_after_first_dispatch() {
    let h = harness(
        MockGenerator::new("ollama", "deduct away"),
        MockStatusLookup::unavailable(),
        Config::default(),
    );

    let first = buffered(
        h.router
            .route(request("What deductions can I claim?", "ollama", false))
            .await
            .unwrap(),
    );
    let second = buffered(
        h.router
            .route(request("What deductions can I claim?", "ollama", false))
            .await
            .unwrap(),
    );

    // Identical second request is a cache hit; the generator ran exactly once
    assert_eq!(h.generator.calls(), 1);
    assert_eq!(first, second);
    assert_eq!(first.response, "deduct away");
    assert!((first.confidence - 0.85).abs() < f64::EPSILON);

    let stats = h.cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn status_lookup_failure_serves_fallback_and_caches_nothing() {
    let config = Config::default();
    let fallback = config.responses.fallback_message.clone();
    let h = harness(
        MockGenerator::new("ollama", "unused"),
        MockStatusLookup::unavailable(),
        config,
    );

    let response = buffered(
        h.router
            .route(request("What is my refund status?", "ollama", false))
            .await
            .unwrap(),
    );

    assert_eq!(response.response, fallback);
    assert!((response.confidence - 0.30).abs() < f64::EPSILON);
    // The generator never ran and the failure was not cached
    assert_eq!(h.generator.calls(), 0);
    assert_eq!(h.cache.stats().size, 0);
}

#[tokio::test]
async fn status_query_embeds_refund_data_in_prompt() {
    let h = harness(
        MockGenerator::new("ollama", "your refund is on the way"),
        MockStatusLookup::with_record("APPROVED"),
        Config::default(),
    );

    let response = buffered(
        h.router
            .route(request("Where is my refund?", "ollama", false))
            .await
            .unwrap(),
    );

    assert_eq!(response.response, "your refund is on the way");

    let prompt = h.generator.last_prompt().unwrap();
    assert!(prompt.contains("Where is my refund?"));
    assert!(prompt.contains("APPROVED"));
    assert!(prompt.contains("$1200.00"));
}

#[tokio::test]
async fn status_answers_expire_on_the_short_ttl() {
    let mut config = Config::default();
    config.cache.status_ttl = Duration::from_millis(30);
    let h = harness(
        MockGenerator::new("ollama", "approved"),
        MockStatusLookup::with_record("APPROVED"),
        config,
    );

    let req = request("check my refund", "ollama", false);
    h.router.route(req.clone()).await.unwrap();
    h.router.route(req.clone()).await.unwrap();
    assert_eq!(h.generator.calls(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    h.router.route(req).await.unwrap();
    // Short TTL elapsed, so the backend was consulted again
    assert_eq!(h.generator.calls(), 2);
}

#[tokio::test]
async fn generator_failure_serves_fallback_and_caches_nothing() {
    let config = Config::default();
    let fallback = config.responses.fallback_message.clone();
    let h = harness(
        MockGenerator::failing("ollama"),
        MockStatusLookup::unavailable(),
        config,
    );

    let response = buffered(
        h.router
            .route(request("How do I file taxes?", "ollama", false))
            .await
            .unwrap(),
    );

    assert_eq!(response.response, fallback);
    assert_eq!(h.cache.stats().size, 0);
}

#[tokio::test]
async fn streaming_bypasses_cache_in_both_directions() {
    let h = harness(
        MockGenerator::new("ollama", "unused"),
        MockStatusLookup::unavailable(),
        Config::default(),
    );

    let routed = h
        .router
        .route(request("What deductions can I claim?", "ollama", true))
        .await
        .unwrap();

    let mut relay = match routed {
        Routed::Streaming(relay) => relay,
        Routed::Buffered(_) => panic!("expected a stream"),
    };

    let mut frames = Vec::new();
    while let Some(frame) = relay.recv().await {
        frames.push(frame);
    }

    assert_eq!(
        frames,
        vec![
            Frame::Chunk { seq: 0, text: "chunk-0".to_string() },
            Frame::Chunk { seq: 1, text: "chunk-1".to_string() },
            Frame::Done,
        ]
    );

    // Neither a cache read nor a cache write happened
    let stats = h.cache.stats();
    assert_eq!(stats.size, 0);
    assert_eq!(stats.hits + stats.misses, 0);

    // A followup buffered request still misses
    h.router
        .route(request("What deductions can I claim?", "ollama", false))
        .await
        .unwrap();
    assert_eq!(h.generator.calls(), 1);
}

#[tokio::test]
async fn stream_start_failure_terminates_with_error_then_done() {
    let h = harness(
        MockGenerator::failing("ollama"),
        MockStatusLookup::unavailable(),
        Config::default(),
    );

    let routed = h
        .router
        .route(request("anything", "ollama", true))
        .await
        .unwrap();

    let mut relay = match routed {
        Routed::Streaming(relay) => relay,
        Routed::Buffered(_) => panic!("expected a stream"),
    };

    let mut frames = Vec::new();
    while let Some(frame) = relay.recv().await {
        frames.push(frame);
    }

    assert_eq!(frames.len(), 2);
    assert!(matches!(&frames[0], Frame::Error(msg) if msg.contains("backend down")));
    assert_eq!(frames[1], Frame::Done);
}

#[tokio::test]
async fn unknown_provider_is_a_typed_error() {
    let h = harness(
        MockGenerator::new("ollama", "unused"),
        MockStatusLookup::unavailable(),
        Config::default(),
    );

    let result = h
        .router
        .route(request("How do I file taxes?", "nope", false))
        .await;

    assert!(matches!(result, Err(Error::ProviderNotFound(id)) if id == "nope"));
}

#[tokio::test]
async fn confidence_follows_the_provider_table() {
    let h = harness(
        MockGenerator::new("openai", "precise answer"),
        MockStatusLookup::unavailable(),
        Config::default(),
    );

    let response = buffered(
        h.router
            .route(request("How do I file taxes?", "openai", false))
            .await
            .unwrap(),
    );

    assert!((response.confidence - 0.90).abs() < f64::EPSILON);
}

#[tokio::test]
async fn disabled_cache_dispatches_every_time() {
    let mut config = Config::default();
    config.cache.enabled = false;
    let h = harness(
        MockGenerator::new("ollama", "fresh"),
        MockStatusLookup::unavailable(),
        config,
    );

    let req = request("How do I file taxes?", "ollama", false);
    h.router.route(req.clone()).await.unwrap();
    h.router.route(req).await.unwrap();

    assert_eq!(h.generator.calls(), 2);
    assert_eq!(h.cache.stats().size, 0);
}
