mod cache;
mod client;
mod offline;

use std::time::Duration;

use compass_core::GovernedMessage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::ResponseCache;
pub use client::{backoff_delay, parse_completion, ChatCompletionsClient, LlmConfig};
pub use offline::{OfflineGenerator, StaticGenerator};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation backend is not configured")]
    NotConfigured,
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed completion payload: {0}")]
    Malformed(String),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::NotConfigured | Self::Malformed(_) => false,
        }
    }
}

/// Text-generation collaborator. Implementations must be safe to share across requests.
pub trait Generator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, messages: &[GovernedMessage]) -> Result<Completion, GenerationError>;
}

#[derive(Clone)]
pub enum Backend {
    ChatCompletions(ChatCompletionsClient),
    Offline(OfflineGenerator),
    Static(StaticGenerator),
}

impl Backend {
    /// Remote client when `COMPASS_LLM_API_KEY` is set, offline otherwise.
    pub fn from_env() -> Result<Self, GenerationError> {
        match LlmConfig::from_env() {
            Some(config) => Ok(Self::ChatCompletions(ChatCompletionsClient::new(config)?)),
            None => Ok(Self::Offline(OfflineGenerator)),
        }
    }

    pub fn fixed(content: impl Into<String>) -> Self {
        Self::Static(StaticGenerator::new(content))
    }
}

impl Generator for Backend {
    fn name(&self) -> &'static str {
        match self {
            Backend::ChatCompletions(client) => client.name(),
            Backend::Offline(generator) => generator.name(),
            Backend::Static(generator) => generator.name(),
        }
    }

    async fn complete(&self, messages: &[GovernedMessage]) -> Result<Completion, GenerationError> {
        match self {
            Backend::ChatCompletions(client) => client.complete(messages).await,
            Backend::Offline(generator) => generator.complete(messages).await,
            Backend::Static(generator) => generator.complete(messages).await,
        }
    }
}
