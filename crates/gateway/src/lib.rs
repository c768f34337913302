//! HTTP API gateway for Mentor.
//!
//! Exposes the health check and the full v1 API with buffered chat,
//! streaming chat over SSE, confirmation resolution, tool listing, and
//! session transcripts.
//!
//! Built on Axum for high performance async HTTP.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    http::StatusCode,
    middleware::Next,
    response::Json,
    routing::get,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use mentor_core::store::{KnowledgeStore, TaskStore, TranscriptStore};
use mentor_orchestrator::ChatOrchestrator;
use mentor_storage::{InMemoryStore, SqliteStore};

/// Build the full router with the v1 API nested under /v1.
///
/// Layers applied:
/// - CORS (configurable origins would go here; defaults are permissive
///   enough for local frontends)
/// - Request body size limit (1 MB)
/// - In-memory rate limiting (60 req/min per user)
/// - HTTP trace logging
pub fn build_router(state: api_v1::SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static("x-user-id"),
        ]);

    let rate_limiter = Arc::new(RateLimiter::new(60, std::time::Duration::from_secs(60)));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(axum::middleware::from_fn(move |req, next| {
            let limiter = rate_limiter.clone();
            rate_limit_middleware(limiter, req, next)
        }))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
///
/// Builds the provider, stores, tool registry, and orchestrator once and
/// shares them behind the API state.
pub async fn start(config: mentor_config::AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let provider = mentor_providers::build_provider(&config.provider)?;

    let (transcripts, tasks, knowledge): (
        Arc<dyn TranscriptStore>,
        Arc<dyn TaskStore>,
        Arc<dyn KnowledgeStore>,
    ) = if config.storage.backend == "memory" {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), store.clone(), store)
    } else {
        let path = config.database_path();
        let store = Arc::new(SqliteStore::new(&path.to_string_lossy()).await?);
        info!(path = %path.display(), "SQLite store opened");
        (store.clone(), store.clone(), store)
    };

    let registry = Arc::new(mentor_tools::default_registry(tasks, knowledge));
    let orchestrator = ChatOrchestrator::new(provider, registry, transcripts.clone(), &config);

    let state = Arc::new(api_v1::ApiState {
        orchestrator,
        transcripts,
        provider_kind: config.provider.kind.clone(),
        model: config.provider.model.clone(),
        start_time: chrono::Utc::now(),
    });

    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Rate Limiter ---

/// Simple in-memory sliding-window rate limiter keyed by user.
///
/// Thread-safe via `std::sync::Mutex` (non-async, held briefly).
struct RateLimiter {
    max_requests: usize,
    window: std::time::Duration,
    clients: std::sync::Mutex<HashMap<String, Vec<std::time::Instant>>>,
}

impl RateLimiter {
    fn new(max_requests: usize, window: std::time::Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Check if the client is within rate limits. Returns `true` if allowed.
    fn check(&self, client_key: &str) -> bool {
        let now = std::time::Instant::now();
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());

        // Evict stale entries if the map grows too large
        if clients.len() > 10_000 {
            clients.retain(|_, timestamps| {
                timestamps
                    .last()
                    .is_some_and(|t| now.duration_since(*t) < self.window)
            });
        }

        let timestamps = clients.entry(client_key.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if timestamps.len() >= self.max_requests {
            return false;
        }

        timestamps.push(now);
        true
    }
}

/// Extracts the client key from the x-user-id header or falls back to
/// "anonymous". Returns 429 when the window is exhausted. The /health
/// endpoint is exempt so monitoring can poll it freely.
async fn rate_limit_middleware(
    limiter: Arc<RateLimiter>,
    req: axum::extract::Request,
    next: Next,
) -> Result<axum::response::Response, StatusCode> {
    if req.uri().path() == "/health" {
        return Ok(next.run(req).await);
    }

    let client_key = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "anonymous".to_string());

    if !limiter.check(&client_key) {
        warn!(client = %client_key, "Rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(req).await)
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
