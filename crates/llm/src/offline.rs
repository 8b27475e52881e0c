use compass_core::GovernedMessage;

use crate::{Completion, GenerationError, Generator};

/// Used when no API key is configured; every call fails fast.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineGenerator;

impl Generator for OfflineGenerator {
    fn name(&self) -> &'static str {
        "offline"
    }

    async fn complete(&self, _messages: &[GovernedMessage]) -> Result<Completion, GenerationError> {
        Err(GenerationError::NotConfigured)
    }
}

#[derive(Debug, Clone)]
pub struct StaticGenerator {
    content: String,
}

impl StaticGenerator {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl Generator for StaticGenerator {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn complete(&self, _messages: &[GovernedMessage]) -> Result<Completion, GenerationError> {
        Ok(Completion::text(self.content.clone()))
    }
}
