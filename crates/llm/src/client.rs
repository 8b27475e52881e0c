use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use compass_core::GovernedMessage;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{ResponseCache, DEFAULT_CACHE_CAPACITY};
use crate::{Completion, GenerationError, Generator, ToolCall};

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
const DEFAULT_TEMPERATURE: f32 = 0.1;
const DEFAULT_MAX_TOKENS: u32 = 1024;
/// Per attempt. Three attempts plus backoff fit inside the agent's 30s deadline.
const DEFAULT_TIMEOUT_SECONDS: u64 = 8;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_CACHE_TTL_SECONDS: u64 = 3600;
const MAX_BACKOFF_SECONDS: u64 = 4;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
    pub max_retries: u32,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
            max_retries: DEFAULT_MAX_RETRIES,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }

    /// `None` when `COMPASS_LLM_API_KEY` is unset or blank.
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("COMPASS_LLM_API_KEY")
            .ok()
            .filter(|value| !value.trim().is_empty())?;
        let base_url = env::var("COMPASS_LLM_BASE_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model = env::var("COMPASS_LLM_MODEL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Some(Self {
            api_key,
            base_url,
            model,
            temperature: env_or("COMPASS_LLM_TEMPERATURE", DEFAULT_TEMPERATURE).clamp(0.0, 2.0),
            max_tokens: env_or("COMPASS_LLM_MAX_TOKENS", DEFAULT_MAX_TOKENS).max(1),
            timeout: Duration::from_secs(
                env_or("COMPASS_LLM_TIMEOUT_SECONDS", DEFAULT_TIMEOUT_SECONDS).clamp(1, 300),
            ),
            max_retries: env_or("COMPASS_LLM_MAX_RETRIES", DEFAULT_MAX_RETRIES).min(5),
            cache_ttl: Duration::from_secs(env_or(
                "COMPASS_LLM_CACHE_TTL_SECONDS",
                DEFAULT_CACHE_TTL_SECONDS,
            )),
            cache_capacity: env_or("COMPASS_LLM_CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY).max(1),
        })
    }

    /// Longest time `complete` can take: every attempt timing out plus the backoff between them.
    pub fn worst_case_latency(&self) -> Duration {
        let attempts = self.timeout * (self.max_retries + 1);
        (0..self.max_retries).map(backoff_delay).fold(attempts, |total, delay| total + delay)
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Delay before retry number `attempt + 1`: 1s, 2s, then 4s.
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs((1_u64 << attempt.min(2)).min(MAX_BACKOFF_SECONDS))
}

/// OpenAI-compatible `/chat/completions` client.
#[derive(Clone)]
pub struct ChatCompletionsClient {
    http: Client,
    config: Arc<LlmConfig>,
    endpoint: String,
    cache: Arc<ResponseCache>,
}

impl ChatCompletionsClient {
    pub fn new(config: LlmConfig) -> Result<Self, GenerationError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| GenerationError::Transport(err.to_string()))?;
        let cache = Arc::new(ResponseCache::with_capacity(
            config.cache_ttl,
            config.cache_capacity,
        ));

        debug!(
            model = %config.model,
            worst_case_ms = config.worst_case_latency().as_millis() as u64,
            "chat completions client ready"
        );

        Ok(Self {
            http,
            endpoint: config.endpoint(),
            config: Arc::new(config),
            cache,
        })
    }

    fn payload(&self, messages: &[GovernedMessage]) -> Value {
        serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
        })
    }

    async fn send_once(&self, payload: &Value) -> Result<Completion, GenerationError> {
        let response = self
            .http
            .post(self.endpoint.as_str())
            .bearer_auth(self.config.api_key.as_str())
            .json(payload)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    GenerationError::Timeout(self.config.timeout)
                } else {
                    GenerationError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| GenerationError::Malformed(err.to_string()))?;
        parse_completion(&body)
    }
}

impl Generator for ChatCompletionsClient {
    fn name(&self) -> &'static str {
        "chat-completions"
    }

    async fn complete(&self, messages: &[GovernedMessage]) -> Result<Completion, GenerationError> {
        let key = ResponseCache::key_for(&self.config.model, self.config.temperature, messages);
        if let Some(cached) = self.cache.get(&key) {
            debug!(cache_key = %key, "completion served from cache");
            return Ok(cached);
        }

        let payload = self.payload(messages);
        let mut attempt = 0_u32;
        loop {
            match self.send_once(&payload).await {
                Ok(completion) => {
                    if !completion.content.trim().is_empty() {
                        self.cache.insert(key, completion.clone());
                    }
                    return Ok(completion);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "chat completion failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Extracts `choices[0].message` from a chat-completions response body.
pub fn parse_completion(body: &Value) -> Result<Completion, GenerationError> {
    let message = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| GenerationError::Malformed("missing choices[0].message".to_string()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let tool_calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let function = call.get("function")?;
                    Some(ToolCall {
                        id: call
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: function.get("name")?.as_str()?.to_string(),
                        arguments: function
                            .get("arguments")
                            .and_then(Value::as_str)
                            .unwrap_or("{}")
                            .to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Completion {
        content,
        tool_calls,
    })
}
