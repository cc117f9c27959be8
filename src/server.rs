//! HTTP server and handlers
//!
//! Thin transport over the router: one assist endpoint that answers with
//! JSON or an SSE stream, plus health and cache introspection. Buffered and
//! streamed delivery share the routing path; only the response rendering
//! differs.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::Stream;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer, compression::CompressionLayer, cors::CorsLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::cache::FingerprintCache;
use crate::config::Config;
use crate::generator::GeneratorRegistry;
use crate::relay::{DONE_MARKER, Frame, StreamRelay};
use crate::router::{QueryRequest, QueryResponse, QueryRouter, Routed};
use crate::status::HttpStatusLookup;
use crate::{Error, Result, SERVICE_NAME};

/// Shared application state
pub struct AppState {
    /// Query router
    pub router: Arc<QueryRouter>,
    /// Response cache (for the introspection endpoints)
    pub cache: Arc<FingerprintCache<QueryResponse>>,
    /// Provider registry (for the health endpoint)
    pub generators: Arc<GeneratorRegistry>,
    /// Keep-alive interval for SSE responses
    pub keep_alive_interval: Duration,
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/assist", post(assist_handler))
        .route("/cache/stats", get(cache_stats_handler))
        .route("/cache/clear", post(cache_clear_handler))
        .layer(CatchPanicLayer::new())
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET / - service banner
async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "message": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /health - service status and registered providers
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "providers": state.generators.ids(),
    }))
}

/// POST /api/assist - answer a query, buffered or streamed
async fn assist_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<QueryRequest>,
) -> axum::response::Response {
    match state.router.route(request).await {
        Ok(Routed::Buffered(response)) => Json(response).into_response(),
        Ok(Routed::Streaming(relay)) => {
            sse_response(relay, state.keep_alive_interval).into_response()
        }
        Err(e) => error_response(&e),
    }
}

/// GET /cache/stats - cache counters snapshot
async fn cache_stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.cache.stats())
}

/// POST /cache/clear - drop all cached responses
async fn cache_clear_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.cache.clear();
    info!("Response cache cleared");
    Json(json!({"cleared": true}))
}

/// Render relay frames as an SSE stream
///
/// Chunks become data events carrying their sequence as the event id, an
/// upstream failure becomes one `error` event, and the terminal frame is the
/// `[DONE]` data marker.
fn sse_response(
    mut relay: StreamRelay,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        while let Some(frame) = relay.recv().await {
            match frame {
                Frame::Chunk { seq, text } => {
                    yield Ok(Event::default().id(seq.to_string()).data(text));
                }
                Frame::Error(message) => {
                    yield Ok(Event::default().event("error").data(message));
                }
                Frame::Done => {
                    yield Ok(Event::default().data(DONE_MARKER));
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(keep_alive))
}

/// Map a router error to a well-formed JSON error body
fn error_response(error: &Error) -> axum::response::Response {
    let status = match error {
        Error::ProviderNotFound(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    (status, Json(json!({"error": error.to_string()}))).into_response()
}

/// Tax agent gateway server
pub struct Gateway {
    config: Config,
}

impl Gateway {
    /// Create a new gateway
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the gateway until shutdown
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address is invalid, the listener
    /// cannot bind, or a collaborator cannot be constructed.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let generators = Arc::new(GeneratorRegistry::from_config(&self.config.providers));
        if generators.is_empty() {
            warn!("No providers registered - every query will fail");
        }

        let cache = Arc::new(FingerprintCache::new(
            self.config.cache.max_entries,
            self.config.cache.default_ttl,
        ));
        let status = Arc::new(HttpStatusLookup::new(&self.config.refund)?);
        let router = Arc::new(QueryRouter::new(
            &self.config,
            Arc::clone(&cache),
            Arc::clone(&generators),
            status,
        ));

        let state = Arc::new(AppState {
            router,
            cache,
            generators: Arc::clone(&generators),
            keep_alive_interval: self.config.streaming.keep_alive_interval,
        });

        let app = create_router(state);
        let listener = TcpListener::bind(addr).await?;

        info!(host = %self.config.server.host, port = self.config.server.port, "Listening");
        info!(providers = ?generators.ids(), "Providers registered");
        info!(
            cache_enabled = self.config.cache.enabled,
            capacity = self.config.cache.max_entries,
            "Response cache ready"
        );

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Gateway shutdown complete");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
