//! HTTP surface: health, model info, a streaming run and a blocking run.
//!
//! Every request builds its own [`Orchestrator`]; nothing mutable is shared
//! between requests apart from the store.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::llm::{LlmProvider, TierModels};
use crate::pipeline::{Orchestrator, PipelineConfig, RunReport, MAX_ATTEMPTS, MIN_ATTEMPTS};
use crate::storage::RunStore;
use crate::stream::StreamAdapter;

/// Shortest topic accepted.
pub const MIN_TOPIC_CHARS: usize = 3;

/// Shared per-process state.
pub struct AppState {
    pub provider: Arc<dyn LlmProvider>,
    pub store: Arc<dyn RunStore>,
    pub config: PipelineConfig,
}

impl AppState {
    pub fn new(provider: Arc<dyn LlmProvider>, store: Arc<dyn RunStore>, config: PipelineConfig) -> Self {
        Self { provider, store, config }
    }

    fn orchestrator(&self, max_attempts: Option<u32>) -> Orchestrator {
        let mut config = self.config.clone();
        if let Some(attempts) = max_attempts {
            config = config.with_max_attempts(attempts);
        }
        Orchestrator::new(self.provider.clone(), self.store.clone(), config)
    }
}

/// Request rejected before a run started.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("topic must be at least 3 characters")]
    TopicTooShort,

    #[error("max_attempts must be between 1 and 5, got {0}")]
    AttemptsOutOfRange(u32),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Query string of `/api/generate-stream` and body of `/api/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateRequest {
    pub topic: String,
    pub max_attempts: Option<u32>,
}

impl GenerateRequest {
    fn check(&self) -> Result<(), ApiError> {
        if self.topic.trim().chars().count() < MIN_TOPIC_CHARS {
            return Err(ApiError::TopicTooShort);
        }
        match self.max_attempts {
            Some(n) if !(MIN_ATTEMPTS..=MAX_ATTEMPTS).contains(&n) => Err(ApiError::AttemptsOutOfRange(n)),
            _ => Ok(()),
        }
    }
}

#[derive(Serialize)]
struct HealthOut {
    ok: bool,
}

#[derive(Serialize)]
struct ModelsOut {
    models: TierModels,
    max_attempts: u32,
}

async fn health() -> impl IntoResponse {
    Json(HealthOut { ok: true })
}

async fn models(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ModelsOut {
        models: state.config.models.clone(),
        max_attempts: state.config.max_attempts,
    })
}

async fn generate_stream(
    State(state): State<Arc<AppState>>,
    Query(request): Query<GenerateRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    request.check()?;
    tracing::info!(topic = %request.topic, max_attempts = ?request.max_attempts, "Stream request");

    let adapter = StreamAdapter::new(Arc::new(state.orchestrator(request.max_attempts)));
    let events = adapter
        .events(request.topic.trim().to_string())
        .map(|event| Event::default().event(event.event_name()).json_data(&event));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Blocking run. A run that produced no assessment answers 422 with its report.
async fn generate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<RunReport>), ApiError> {
    request.check()?;
    tracing::info!(topic = %request.topic, max_attempts = ?request.max_attempts, "Generate request");

    let report = state
        .orchestrator(request.max_attempts)
        .run(request.topic.trim(), None)
        .await;
    let status = if report.final_success() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    Ok((status, Json(report)))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/models", get(models))
        .route("/api/generate-stream", get(generate_stream))
        .route("/api/generate", post(generate))
        .with_state(state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

/// Bind and serve until the process stops.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "HTTP server listening");
    axum::serve(listener, build_router(state)).await
}
