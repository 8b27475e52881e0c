use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use compass_agents::{GovernanceAgent, GovernanceSettings};
use compass_core::{
    emergency_fallback, ChatInput, FallbackReason, GovernedMessage, Intent, Resolution,
    ACTION_ANCHOR,
};
use compass_llm::{ChatCompletionsClient, GenerationError, Generator, LlmConfig, StaticGenerator};
use compass_observability::GovernanceMetrics;
use compass_storage::{MemoryStore, TurnLog};
use serde_json::json;

fn agent(completion: &str) -> GovernanceAgent<StaticGenerator, MemoryStore> {
    GovernanceAgent::new(
        Arc::new(StaticGenerator::new(completion)),
        Arc::new(MemoryStore::new()),
        GovernanceMetrics::shared(),
        GovernanceSettings::default(),
    )
}

fn ask(text: &str) -> ChatInput {
    ChatInput {
        text: text.to_string(),
        user_id: None,
    }
}

fn assert_directive(content: &str) {
    assert!(!content.trim().is_empty());
    assert!(!content.contains('?'));
    assert!(content.to_lowercase().contains(ACTION_ANCHOR));
    assert!(content.split_whitespace().count() <= 80);
}

#[tokio::test]
async fn greeting_gets_fixed_reply() {
    let agent = agent("should never be used");
    let reply = agent.respond(ask("hi")).await;

    assert_eq!(reply.intent, Intent::Chat);
    assert_eq!(reply.resolution, Resolution::ChatBypass);
    assert_directive(&reply.content);
    assert_eq!(agent.status().metrics.chat_bypass_total, 1);
}

#[tokio::test]
async fn overwhelmed_student_gets_prioritised_tasks() {
    let reply = agent("unused")
        .respond(ask("I'm overwhelmed with college, side hustle, and family"))
        .await;

    assert_eq!(reply.intent, Intent::Organize);
    assert!(reply.content.contains("**Tasks:**"));
    assert!(reply.content.contains("**Priority:**"));
    assert!(reply.content.contains("• High: College work"));
    assert!(reply.content.contains("• Medium: Side hustle"));
    assert!(reply.content.contains("**Do this today:** Focus on College work."));
    assert_directive(&reply.content);
}

#[tokio::test]
async fn hedged_decision_becomes_fallback_literal() {
    let reply = agent("It depends, but you might want to consider meditation.")
        .respond(ask("Should I take the internship or the campus job?"))
        .await;

    assert_eq!(reply.intent, Intent::Decide);
    assert_eq!(reply.content, emergency_fallback(Intent::Decide));
    assert_eq!(reply.resolution, Resolution::Fallback(FallbackReason::Lexicon));
}

#[tokio::test]
async fn options_block_is_removed_and_sections_survive() {
    let completion = "**Decision:** Internship over campus job

**Options:**
• Internship
• Campus job

**Recommendation:** Take the internship

**Reason:**
• Higher pay per hour
• Direct industry experience

**Do this today:** Reply to the recruiter with acceptance.";

    let reply = agent(completion)
        .respond(ask("Should I take the internship or the campus job?"))
        .await;

    assert_eq!(reply.resolution, Resolution::Governed);
    assert!(!reply.content.contains("Options"));
    assert!(reply.content.contains("**Decision:** Internship over campus job"));
    assert!(reply.content.contains("**Recommendation:** Take the internship"));
    assert!(reply.content.contains("• Higher pay per hour"));
    assert!(reply.content.contains("• Direct industry experience"));
    assert!(reply
        .content
        .ends_with("**Do this today:** Reply to the recruiter with acceptance."));
}

#[tokio::test]
async fn rambling_plan_is_cut_to_the_word_cap() {
    let filler = "study the material carefully every single day ".repeat(20);
    let completion = format!(
        "**Goal:** Pass finals\n\n**Steps:**\n1. {filler}\n2. Review notes\n3. Sit mock exam"
    );

    let reply = agent(&completion).respond(ask("Help me plan for finals")).await;

    assert_eq!(reply.intent, Intent::Plan);
    assert_directive(&reply.content);
    assert_eq!(reply.resolution, Resolution::Governed);
    assert!(reply.content.ends_with("**Do this today:** Complete first task."));
}

#[tokio::test]
async fn every_reply_is_logged_for_the_user() {
    let agent = agent("unused");
    agent
        .respond(ChatInput {
            text: "thanks".to_string(),
            user_id: Some("s-7".to_string()),
        })
        .await;

    let history = agent.store().history("s-7", 10).await.expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "thanks");
}

#[derive(Clone)]
struct MockState {
    calls: Arc<AtomicUsize>,
    fail_first: usize,
    failure_status: StatusCode,
}

async fn mock_completions(State(state): State<MockState>) -> Response {
    let call = state.calls.fetch_add(1, Ordering::SeqCst);
    if call < state.fail_first {
        return (state.failure_status, "upstream unavailable").into_response();
    }

    Json(json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": "**Goal:** Ship the app\n\n**Steps:**\n1. Freeze scope\n\n**Do this today:** Freeze scope."
            }
        }]
    }))
    .into_response()
}

async fn spawn_mock(fail_first: usize, failure_status: StatusCode) -> (String, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let state = MockState {
        calls: calls.clone(),
        fail_first,
        failure_status,
    };
    let app = Router::new()
        .route("/v1/chat/completions", post(mock_completions))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock server");
    });

    (format!("http://{addr}/v1"), calls)
}

fn client_for(base_url: String) -> ChatCompletionsClient {
    let mut config = LlmConfig::new("test-key");
    config.base_url = base_url;
    config.timeout = Duration::from_secs(5);
    config.max_retries = 2;
    ChatCompletionsClient::new(config).expect("client")
}

#[tokio::test]
async fn client_retries_server_errors_then_caches() {
    let (base_url, calls) = spawn_mock(1, StatusCode::SERVICE_UNAVAILABLE).await;
    let client = client_for(base_url);
    let messages = [
        GovernedMessage::system("Fill this template EXACTLY"),
        GovernedMessage::user("Help me plan the launch"),
    ];

    let first = client.complete(&messages).await.expect("completion after retry");
    assert!(first.content.starts_with("**Goal:** Ship the app"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let second = client.complete(&messages).await.expect("cached completion");
    assert_eq!(second, first);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn client_does_not_retry_client_errors() {
    let (base_url, calls) = spawn_mock(usize::MAX, StatusCode::UNAUTHORIZED).await;
    let client = client_for(base_url);

    let result = client.complete(&[GovernedMessage::user("plan")]).await;
    assert!(matches!(
        result,
        Err(GenerationError::Status { status: 401, .. })
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn default_client_retries_finish_before_the_agent_deadline() {
    let config = LlmConfig::new("test-key");
    let deadline = GovernanceSettings::default().generation_timeout;
    assert!(config.max_retries > 0);
    assert!(config.worst_case_latency() < deadline);
}
