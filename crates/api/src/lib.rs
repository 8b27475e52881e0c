mod rate_limit;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::extract::{Json, State};
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{body::Body, Router};
use compass_agents::{AgentStatus, GovernanceAgent, GovernanceSettings};
use compass_core::{organize_override, ChatInput, Classification};
use compass_llm::Backend;
use compass_observability::{GovernanceMetrics, MetricsSnapshot};
use compass_storage::Store;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

pub use crate::rate_limit::ClientRateLimiter;

const MAX_MESSAGE_CHARS: usize = 4_000;
const BODY_LIMIT_BYTES: usize = 64 * 1024;

pub type ServiceAgent = GovernanceAgent<Backend, Store>;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: String,
    pub rate_limit_window: Duration,
    pub rate_limit_max: usize,
    pub allowed_origins: Vec<String>,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let api_key = env::var("COMPASS_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "dev-compass-key".to_string());
        let rate_limit_window = Duration::from_secs(
            env::var("COMPASS_RATE_LIMIT_WINDOW_SECONDS")
                .ok()
                .and_then(|value| value.parse::<u64>().ok())
                .unwrap_or(60),
        );
        let rate_limit_max = env::var("COMPASS_RATE_LIMIT_MAX")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(60);
        let allowed_origins = env::var("COMPASS_ALLOWED_ORIGINS")
            .ok()
            .map(|value| {
                value
                    .split(',')
                    .map(|origin| origin.trim().trim_end_matches('/').to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            api_key,
            rate_limit_window,
            rate_limit_max,
            allowed_origins,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: "dev-compass-key".to_string(),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_max: 60,
            allowed_origins: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<ServiceAgent>,
    pub metrics: Arc<GovernanceMetrics>,
    pub api_key: String,
    pub limiter: ClientRateLimiter,
    pub allowed_origins: Arc<Vec<String>>,
    pub store_backend: &'static str,
}

impl ApiState {
    pub fn new(
        generator: Backend,
        store: Store,
        settings: GovernanceSettings,
        config: ApiConfig,
    ) -> Self {
        let metrics = GovernanceMetrics::shared();
        let store_backend = store.backend_name();
        let agent = Arc::new(GovernanceAgent::new(
            Arc::new(generator),
            Arc::new(store),
            metrics.clone(),
            settings,
        ));

        Self {
            agent,
            metrics,
            api_key: config.api_key,
            limiter: ClientRateLimiter::new(config.rate_limit_window, config.rate_limit_max),
            allowed_origins: Arc::new(config.allowed_origins),
            store_backend,
        }
    }
}

pub async fn build_app() -> Result<Router> {
    let generator = Backend::from_env().context("failed to initialise generation backend")?;
    let store = if let Ok(database_url) = env::var("COMPASS_DATABASE_URL") {
        Store::sqlite(&database_url).await?
    } else {
        Store::memory()
    };

    let state = ApiState::new(
        generator,
        store,
        GovernanceSettings::from_env(),
        ApiConfig::from_env(),
    );
    tracing::info!(
        generator = state.agent.status().generator,
        store = state.store_backend,
        "governance agent ready"
    );

    Ok(build_router(state))
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/chat", post(chat))
        .route("/v1/classify", post(classify))
        .layer(build_cors_layer(&state.allowed_origins))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            api_key_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp_utc: String,
    metrics: MetricsSnapshot,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    #[serde(flatten)]
    agent: AgentStatus,
    store: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    text: String,
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClassifyRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct ClassifyResponse {
    #[serde(flatten)]
    classification: Classification,
    organize_override: Option<&'static str>,
}

async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let payload = HealthResponse {
        status: "ok",
        timestamp_utc: chrono::Utc::now().to_rfc3339(),
        metrics: state.metrics.snapshot(),
    };
    (StatusCode::OK, Json(payload))
}

async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    Json(StatusResponse {
        agent: state.agent.status(),
        store: state.store_backend,
    })
}

async fn chat(State(state): State<ApiState>, Json(request): Json<ChatRequest>) -> Response {
    if let Err(response) = validate_text(&request.text) {
        return response;
    }

    let user_id = request
        .user_id
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let reply = state
        .agent
        .respond(ChatInput {
            text: request.text,
            user_id,
        })
        .await;

    (StatusCode::OK, Json(reply)).into_response()
}

async fn classify(State(state): State<ApiState>, Json(request): Json<ClassifyRequest>) -> Response {
    if let Err(response) = validate_text(&request.text) {
        return response;
    }

    let payload = ClassifyResponse {
        classification: state.agent.classify(&request.text),
        organize_override: organize_override(&request.text),
    };
    (StatusCode::OK, Json(payload)).into_response()
}

fn validate_text(text: &str) -> Result<(), Response> {
    if text.trim().is_empty() {
        return Err(bad_request("empty_text", "text must not be empty"));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err(bad_request(
            "text_too_long",
            "text exceeds the maximum message length",
        ));
    }
    Ok(())
}

fn bad_request(error: &'static str, message: &'static str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": error,
            "message": message
        })),
    )
        .into_response()
}

fn is_public_endpoint(path: &str) -> bool {
    matches!(path, "/health")
}

async fn api_key_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if request.method() == Method::OPTIONS || is_public_endpoint(path.as_str()) {
        return next.run(request).await;
    }

    let header_key = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    if header_key != state.api_key {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "error": "unauthorized",
                "message": "missing or invalid x-api-key"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

async fn rate_limit_middleware(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() == Method::OPTIONS || is_public_endpoint(request.uri().path()) {
        return next.run(request).await;
    }

    let client = request_ip(&request);
    if !state.limiter.allow(&client) {
        tracing::warn!(client = %client, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "rate_limited",
                "message": "rate limit exceeded for this client"
            })),
        )
            .into_response();
    }

    next.run(request).await
}

fn request_ip(request: &Request<Body>) -> String {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            value
                .split(',')
                .next()
                .unwrap_or("unknown")
                .trim()
                .to_string()
        })
        .unwrap_or_else(|| "local".to_string())
}

fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect::<Vec<_>>();
    let origins = if origins.is_empty() {
        vec![HeaderValue::from_static("http://localhost:5500")]
    } else {
        origins
    };

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static("x-api-key"),
        ])
}
