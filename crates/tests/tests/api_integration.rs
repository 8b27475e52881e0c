use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use compass_agents::GovernanceSettings;
use compass_api::{build_router, ApiConfig, ApiState};
use compass_core::{emergency_fallback, Intent};
use compass_llm::Backend;
use compass_storage::Store;
use serde_json::{json, Value};
use tower::ServiceExt;

const API_KEY: &str = "test-key";

fn app_with(generator: Backend, rate_limit_max: usize) -> Router {
    let config = ApiConfig {
        api_key: API_KEY.to_string(),
        rate_limit_window: Duration::from_secs(60),
        rate_limit_max,
        allowed_origins: Vec::new(),
    };
    build_router(ApiState::new(
        generator,
        Store::memory(),
        GovernanceSettings::default(),
        config,
    ))
}

fn app() -> Router {
    app_with(Backend::fixed("unused"), 100)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", API_KEY)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let response = app()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let parsed = json_body(response).await;
    assert_eq!(parsed["status"], "ok");
    assert!(parsed.get("metrics").is_some());
}

#[tokio::test]
async fn chat_requires_api_key() {
    let request = Request::builder()
        .method("POST")
        .uri("/v1/chat")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "text": "hi" }).to_string()))
        .unwrap();

    let response = app().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn chat_greeting_is_answered_without_generation() {
    let response = app()
        .oneshot(post_json("/v1/chat", json!({ "text": "hi" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let parsed = json_body(response).await;
    assert_eq!(parsed["intent"], "CHAT");
    assert_eq!(parsed["resolution"]["kind"], "chat_bypass");
    assert!(parsed["content"].as_str().unwrap().contains("Do this today"));
}

#[tokio::test]
async fn chat_decision_with_banned_completion_returns_fallback() {
    let app = app_with(
        Backend::fixed("It depends, but you might want to consider meditation."),
        100,
    );
    let response = app
        .oneshot(post_json(
            "/v1/chat",
            json!({ "text": "Should I learn Rust or Go?", "user_id": "s-42" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let parsed = json_body(response).await;
    assert_eq!(parsed["intent"], "DECIDE");
    assert_eq!(parsed["content"], emergency_fallback(Intent::Decide));
    assert_eq!(parsed["resolution"]["kind"], "fallback");
    assert_eq!(parsed["resolution"]["reason"], "lexicon");
}

#[tokio::test]
async fn empty_text_is_rejected() {
    let response = app()
        .oneshot(post_json("/v1/chat", json!({ "text": "   " })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn classify_reports_scores_and_override() {
    let response = app()
        .oneshot(post_json(
            "/v1/classify",
            json!({ "text": "I'm overwhelmed with college, side hustle, and family" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let parsed = json_body(response).await;
    assert_eq!(parsed["intent"], "ORGANIZE");
    assert!(parsed["scores"]["organize"].as_u64().unwrap() >= 1);
    assert_eq!(parsed["organize_override"], "overwhelm");
}

#[tokio::test]
async fn status_reports_generator_and_limits() {
    let request = Request::builder()
        .uri("/v1/status")
        .header("x-api-key", API_KEY)
        .body(Body::empty())
        .unwrap();
    let response = app().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let parsed = json_body(response).await;
    assert_eq!(parsed["generator"], "static");
    assert_eq!(parsed["store"], "memory");
    assert_eq!(parsed["limits"]["max_words"], 80);
    assert_eq!(parsed["limits"]["max_bullets"], 3);
}

#[tokio::test]
async fn rate_limit_rejects_excess_requests() {
    let app = app_with(Backend::fixed("unused"), 1);

    let first = app
        .clone()
        .oneshot(post_json("/v1/chat", json!({ "text": "hi" })))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = app
        .oneshot(post_json("/v1/chat", json!({ "text": "hi" })))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}
