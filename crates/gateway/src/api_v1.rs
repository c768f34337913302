//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST /v1/chat`                    — Send a message, get a buffered reply
//! - `POST /v1/chat/stream`             — Send a message, get an SSE stream
//! - `POST /v1/chat/confirm`            — Resolve a pending confirmation
//! - `GET  /v1/tools`                   — List available tools
//! - `GET  /v1/sessions/{id}/messages`  — Session transcript
//! - `GET  /v1/status`                  — Runtime status
//!
//! Every route is user-scoped: callers identify themselves with an
//! `x-user-id` header carrying a UUID. Requests without it are rejected.

use axum::{
    Router,
    extract::{FromRequestParts, Path, State},
    http::{StatusCode, request::Parts},
    response::sse::{Event as SseEvent, Sse},
    response::Json,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info};
use uuid::Uuid;

use mentor_core::message::SessionId;
use mentor_core::store::TranscriptStore;
use mentor_orchestrator::{ChatOrchestrator, ChatRequest, ChatResponse, ConfirmResolution};

/// How many transcript messages a single page returns at most.
const MAX_TRANSCRIPT_MESSAGES: usize = 200;

/// Shared state for the v1 API.
pub struct ApiState {
    pub orchestrator: ChatOrchestrator,
    pub transcripts: Arc<dyn TranscriptStore>,
    pub provider_kind: String,
    pub model: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
}

pub type SharedState = Arc<ApiState>;

/// Build the v1 API router. Nest this under "/v1" in the main router.
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/chat/confirm", post(confirm_handler))
        .route("/tools", get(list_tools_handler))
        .route("/sessions/{id}/messages", get(session_messages_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

// ── Authentication ────────────────────────────────────────────────────────

/// The authenticated user, read from the `x-user-id` header.
pub struct UserId(pub Uuid);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Missing x-user-id header"))?;
        let id = Uuid::parse_str(raw).map_err(|_| unauthorized("x-user-id must be a UUID"))?;
        Ok(UserId(id))
    }
}

fn unauthorized(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatBody {
    /// Existing session ID (omit to start a new session).
    #[serde(default)]
    session_id: Option<SessionId>,
    /// The user's message.
    message: String,
}

#[derive(Deserialize)]
struct ConfirmBody {
    action_id: String,
    confirmed: bool,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolDto>,
    count: usize,
}

#[derive(Serialize)]
struct ToolDto {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct SessionMessagesResponse {
    session_id: String,
    messages: Vec<MessageDto>,
}

#[derive(Serialize)]
struct MessageDto {
    id: String,
    role: &'static str,
    content: String,
    timestamp: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
    version: &'static str,
    provider: String,
    model: String,
    tools: usize,
    uptime_secs: i64,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<SharedState>,
    UserId(user_id): UserId,
    Json(body): Json<ChatBody>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ErrorResponse>)> {
    info!(user = %user_id, "v1/chat request");

    let response = state
        .orchestrator
        .chat(ChatRequest {
            user_id,
            session_id: body.session_id,
            message: body.message,
        })
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })?;

    Ok(Json(response))
}

/// `POST /v1/chat/stream` — Send a message, receive an SSE stream of events.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    UserId(user_id): UserId,
    Json(body): Json<ChatBody>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    info!(user = %user_id, "v1/chat/stream SSE request");

    let rx = state
        .orchestrator
        .chat_stream(ChatRequest {
            user_id,
            session_id: body.session_id,
            message: body.message,
        })
        .await;

    let stream = ReceiverStream::new(rx).filter_map(|event| {
        let event_type = event.event_type();
        match serde_json::to_string(&event) {
            Ok(data) => Some(Ok(SseEvent::default().event(event_type).data(data))),
            Err(e) => {
                error!(error = %e, event_type, "Failed to serialize stream event");
                None
            }
        }
    });

    Sse::new(stream)
}

/// `POST /v1/chat/confirm` — Approve or cancel a pending gated tool call.
async fn confirm_handler(
    State(state): State<SharedState>,
    UserId(user_id): UserId,
    Json(body): Json<ConfirmBody>,
) -> Result<Json<ConfirmResolution>, (StatusCode, Json<ConfirmResolution>)> {
    let resolution = state
        .orchestrator
        .confirm(user_id, &body.action_id, body.confirmed)
        .await;

    if resolution.status == "not_found" {
        return Err((StatusCode::NOT_FOUND, Json(resolution)));
    }
    Ok(Json(resolution))
}

async fn list_tools_handler(
    State(state): State<SharedState>,
    UserId(_user_id): UserId,
) -> Json<ToolListResponse> {
    let defs = state.orchestrator.registry().definitions();
    let count = defs.len();

    Json(ToolListResponse {
        tools: defs
            .into_iter()
            .map(|d| ToolDto {
                name: d.name,
                description: d.description,
                parameters: d.parameters,
            })
            .collect(),
        count,
    })
}

async fn session_messages_handler(
    State(state): State<SharedState>,
    UserId(user_id): UserId,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionMessagesResponse>, (StatusCode, Json<ErrorResponse>)> {
    let session_id = SessionId(id);
    let messages = state
        .transcripts
        .recent_turns(user_id, session_id, MAX_TRANSCRIPT_MESSAGES)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
        })?;

    Ok(Json(SessionMessagesResponse {
        session_id: session_id.to_string(),
        messages: messages
            .iter()
            .map(|m| MessageDto {
                id: m.id.clone(),
                role: m.role.as_str(),
                content: m.content.clone(),
                timestamp: m.timestamp.to_rfc3339(),
            })
            .collect(),
    }))
}

async fn status_handler(
    State(state): State<SharedState>,
    UserId(_user_id): UserId,
) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.provider_kind.clone(),
        model: state.model.clone(),
        tools: state.orchestrator.registry().len(),
        uptime_secs: (chrono::Utc::now() - state.start_time).num_seconds(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use mentor_config::AppConfig;
    use mentor_core::message::Message;
    use mentor_providers::MockProvider;
    use mentor_storage::InMemoryStore;
    use tower::ServiceExt;

    pub(crate) fn test_state() -> SharedState {
        test_state_with_provider(Arc::new(MockProvider::new()))
    }

    pub(crate) fn test_state_with_provider(provider: Arc<MockProvider>) -> SharedState {
        let mut config = AppConfig::default();
        config.provider.kind = "mock".into();
        config.provider.model = "mock-model".into();

        let store = Arc::new(InMemoryStore::new());
        let registry = Arc::new(mentor_tools::default_registry(store.clone(), store.clone()));
        let transcripts: Arc<dyn TranscriptStore> = store;
        let orchestrator =
            ChatOrchestrator::new(provider, registry, transcripts.clone(), &config);

        Arc::new(ApiState {
            orchestrator,
            transcripts,
            provider_kind: config.provider.kind.clone(),
            model: config.provider.model.clone(),
            start_time: chrono::Utc::now(),
        })
    }

    fn post_json(uri: &str, user: Option<Uuid>, body: serde_json::Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header("x-user-id", user.to_string());
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn chat_requires_user_header() {
        let app = v1_router(test_state());
        let req = post_json("/chat", None, serde_json::json!({"message": "hi"}));
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn chat_rejects_non_uuid_user() {
        let app = v1_router(test_state());
        let req = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .header("x-user-id", "not-a-uuid")
            .body(Body::from(r#"{"message":"hi"}"#))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn chat_returns_reply() {
        let provider = Arc::new(MockProvider::new());
        provider.push_response(Message::assistant("先从极限的定义开始。"));
        let app = v1_router(test_state_with_provider(provider));

        let req = post_json(
            "/chat",
            Some(Uuid::new_v4()),
            serde_json::json!({"message": "我该怎么学微积分？"}),
        );
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["content"], "先从极限的定义开始。");
        assert!(json["session_id"].as_str().is_some());
        assert_eq!(json["has_errors"], false);
        assert_eq!(json["requires_confirmation"], false);
    }

    #[tokio::test]
    async fn chat_stream_emits_sse_events() {
        let provider = Arc::new(MockProvider::new());
        provider.push_stream(vec![
            mentor_core::ProviderEvent::TextDelta {
                content: "先复习极限。".into(),
            },
            mentor_core::ProviderEvent::Done { usage: None },
        ]);
        let app = v1_router(test_state_with_provider(provider));

        let req = post_json(
            "/chat/stream",
            Some(Uuid::new_v4()),
            serde_json::json!({"message": "我该怎么学微积分？"}),
        );
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = String::from_utf8_lossy(&bytes);
        assert!(body.contains("event: text"));
        assert!(body.contains("先复习极限。"));
        assert!(body.contains("event: done"));
    }

    #[tokio::test]
    async fn tools_listing() {
        let app = v1_router(test_state());
        let req = Request::builder()
            .uri("/tools")
            .header("x-user-id", Uuid::new_v4().to_string())
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["count"], 6);
    }

    #[tokio::test]
    async fn confirm_unknown_action_is_404() {
        let app = v1_router(test_state());
        let req = post_json(
            "/chat/confirm",
            Some(Uuid::new_v4()),
            serde_json::json!({"action_id": "act_missing", "confirmed": true}),
        );
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let json = body_json(response).await;
        assert_eq!(json["status"], "not_found");
    }

    #[tokio::test]
    async fn session_messages_empty_session() {
        let app = v1_router(test_state());
        let session = Uuid::new_v4();
        let req = Request::builder()
            .uri(format!("/sessions/{session}/messages"))
            .header("x-user-id", Uuid::new_v4().to_string())
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["messages"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn status_reports_runtime_info() {
        let app = v1_router(test_state());
        let req = Request::builder()
            .uri("/status")
            .header("x-user-id", Uuid::new_v4().to_string())
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["provider"], "mock");
        assert_eq!(json["tools"], 6);
    }
}
