use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Decide,
    Plan,
    Organize,
    Chat,
}

impl Intent {
    pub const ALL: [Intent; 4] = [Self::Decide, Self::Plan, Self::Organize, Self::Chat];

    pub fn as_label(self) -> &'static str {
        match self {
            Self::Decide => "DECIDE",
            Self::Plan => "PLAN",
            Self::Organize => "ORGANIZE",
            Self::Chat => "CHAT",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown intent label: {0}")]
pub struct UnknownIntent(pub String);

impl FromStr for Intent {
    type Err = UnknownIntent;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "decide" | "decision" => Ok(Self::Decide),
            "plan" | "planning" => Ok(Self::Plan),
            "organize" | "organise" => Ok(Self::Organize),
            "chat" => Ok(Self::Chat),
            _ => Err(UnknownIntent(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "system" => Some(Self::System),
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// One message handed to the generation collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernedMessage {
    pub role: Role,
    pub content: String,
}

impl GovernedMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Per-intent pattern match counts for a single message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationScore {
    pub decide: u32,
    pub plan: u32,
    pub organize: u32,
}

impl ClassificationScore {
    pub fn get(&self, intent: Intent) -> u32 {
        match intent {
            Intent::Decide => self.decide,
            Intent::Plan => self.plan,
            Intent::Organize => self.organize,
            Intent::Chat => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub passed: bool,
    pub candidate: String,
    pub failures: Vec<ValidationFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationFailure {
    Empty,
    QuestionMark,
    LexiconHit,
    MissingActionAnchor,
    MissingSection,
    TooManyWords,
    TooManyBullets,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    Lexicon,
    Structure,
    Generation,
    Timeout,
    EmptyCompletion,
}

/// How the final content of a request was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Resolution {
    ChatBypass,
    OrganizeBypass,
    Governed,
    Fallback(FallbackReason),
}

impl Resolution {
    pub fn is_fallback(self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatInput {
    pub text: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernedReply {
    pub content: String,
    pub intent: Intent,
    pub resolution: Resolution,
}
