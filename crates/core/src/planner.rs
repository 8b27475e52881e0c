use crate::intent::{contains_any, normalize_text};
use crate::models::Intent;

const DECIDE_FALLBACK: &str = "**Decision:** Need specific options

**Recommendation:** Provide clear choices

**Reason:**
• Cannot decide without alternatives
• Need specific options

**Do this today:** List exact options to choose between.";

const PLAN_FALLBACK: &str = "**Goal:** Unclear objective

**Steps:**
1. Define specific goal
2. Set deadline
3. Start first task

**Do this today:** State exactly what you want to achieve.";

const ORGANIZE_FALLBACK: &str = "**Tasks:** Task A, Task B, Task C

**Priority:**
• High: Most urgent deadline
• Medium: Important but flexible
• Low: Optional items

**Do this today:** Focus on highest priority task.";

const CHAT_FALLBACK: &str = "Be specific about what you need.

**Do this today:** Name one decision, goal, or task list.";

pub const GREETING_REPLY: &str = "Hi 👋 I help you decide, plan, or organize.

**Do this today:** Send one choice, goal, or task list.";

pub const ACKNOWLEDGEMENT_REPLY: &str = "Noted. Send the next decision, plan, or task list.

**Do this today:** Share your next request.";

pub const HELP_REPLY: &str = "I help you:

• **Decide** - pick one option with a clear recommendation
• **Plan** - break a goal into short steps
• **Organize** - rank tasks by priority

**Do this today:** Tell me what you need.";

pub const UNCLEAR_REPLY: &str =
    "Pick one: deciding between options, planning a goal, or organizing tasks.

**Do this today:** Describe the situation in one sentence.";

pub const DEFAULT_CHAT_REPLY: &str = "I handle decisions, plans, and task lists.

**Do this today:** State what you want to decide, plan, or organize.";

/// The fixed, pre-validated text returned when nothing better can be produced.
pub fn emergency_fallback(intent: Intent) -> &'static str {
    match intent {
        Intent::Decide => DECIDE_FALLBACK,
        Intent::Plan => PLAN_FALLBACK,
        Intent::Organize => ORGANIZE_FALLBACK,
        Intent::Chat => CHAT_FALLBACK,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatReplyKind {
    Greeting,
    Acknowledgement,
    Help,
    Unclear,
    Default,
}

impl ChatReplyKind {
    pub fn text(self) -> &'static str {
        match self {
            Self::Greeting => GREETING_REPLY,
            Self::Acknowledgement => ACKNOWLEDGEMENT_REPLY,
            Self::Help => HELP_REPLY,
            Self::Unclear => UNCLEAR_REPLY,
            Self::Default => DEFAULT_CHAT_REPLY,
        }
    }
}

struct ChatRule {
    kind: ChatReplyKind,
    words: &'static [&'static str],
    phrases: &'static [&'static str],
}

const CHAT_RULES: &[ChatRule] = &[
    ChatRule {
        kind: ChatReplyKind::Greeting,
        words: &["hi", "hello", "hey", "hii"],
        phrases: &[],
    },
    ChatRule {
        kind: ChatReplyKind::Acknowledgement,
        words: &["ok", "okay", "alright", "thanks"],
        phrases: &["thank you"],
    },
    ChatRule {
        kind: ChatReplyKind::Help,
        words: &["help", "capabilities"],
        phrases: &["what can you do"],
    },
    ChatRule {
        kind: ChatReplyKind::Unclear,
        words: &["unclear", "confused"],
        phrases: &["don't know", "not sure"],
    },
];

pub fn select_chat_reply(user_text: &str) -> ChatReplyKind {
    let lower = normalize_text(user_text).to_lowercase();
    let tokens = lower
        .split(|ch: char| !(ch.is_alphanumeric() || ch == '\''))
        .filter(|token| !token.is_empty())
        .collect::<Vec<_>>();

    CHAT_RULES
        .iter()
        .find(|rule| {
            rule.words.iter().any(|word| tokens.contains(word))
                || contains_any(&lower, rule.phrases)
        })
        .map(|rule| rule.kind)
        .unwrap_or(ChatReplyKind::Default)
}

pub fn compose_chat_reply(user_text: &str) -> &'static str {
    select_chat_reply(user_text).text()
}

/// Canonical task labels in detection order.
pub fn derive_tasks(user_text: &str) -> Vec<&'static str> {
    let lower = user_text.to_lowercase();
    let mut tasks = Vec::new();

    if lower.contains("college") {
        tasks.push("College work");
    }
    if contains_any(&lower, &["side hustle", "business"]) {
        tasks.push("Side hustle");
    }
    if lower.contains("family") {
        tasks.push("Family responsibilities");
    }
    if lower.contains("work") && !lower.contains("side") {
        tasks.push("Work tasks");
    }
    if contains_any(&lower, &["gym", "fitness"]) {
        tasks.push("Gym/fitness");
    }
    if lower.contains("health") {
        tasks.push("Health appointments");
    }

    tasks
}

/// Keyword-derived ORGANIZE response. Never echoes the user's wording.
pub fn build_organize_reply(user_text: &str) -> String {
    let tasks = derive_tasks(user_text);
    let (high, medium, low) = if tasks.is_empty() {
        ("Task 1", "Task 2", "Task 3")
    } else {
        (
            tasks[0],
            tasks.get(1).copied().unwrap_or("Secondary task"),
            tasks.get(2).copied().unwrap_or("Optional task"),
        )
    };

    format!(
        "**Tasks:** {high}, {medium}, {low}\n\n**Priority:**\n• High: {high}\n• Medium: {medium}\n• Low: {low}\n\n**Do this today:** Focus on {high}."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn organize_reply_ranks_detected_tasks() {
        let reply = build_organize_reply("I'm overwhelmed with college, side hustle, and family");
        assert!(reply.starts_with("**Tasks:** College work, Side hustle, Family responsibilities"));
        assert!(reply.contains("• High: College work"));
        assert!(reply.contains("• Medium: Side hustle"));
        assert!(reply.contains("• Low: Family responsibilities"));
        assert!(reply.ends_with("**Do this today:** Focus on College work."));
    }

    #[test]
    fn organize_reply_uses_placeholders_without_keywords() {
        let reply = build_organize_reply("too many things going on");
        assert!(reply.contains("**Tasks:** Task 1, Task 2, Task 3"));
        assert!(reply.contains("Focus on Task 1."));
    }

    #[test]
    fn organize_reply_fills_missing_ranks() {
        let reply = build_organize_reply("gym every morning");
        assert!(reply.contains("• High: Gym/fitness"));
        assert!(reply.contains("• Medium: Secondary task"));
        assert!(reply.contains("• Low: Optional task"));
    }

    #[test]
    fn work_is_skipped_when_side_hustle_mentioned() {
        assert_eq!(
            derive_tasks("side hustle work and family"),
            vec!["Side hustle", "Family responsibilities"]
        );
    }

    #[test]
    fn chat_rules_match_whole_words() {
        assert_eq!(select_chat_reply("hi"), ChatReplyKind::Greeting);
        assert_eq!(select_chat_reply("Thank you!"), ChatReplyKind::Acknowledgement);
        assert_eq!(select_chat_reply("what can you do?"), ChatReplyKind::Help);
        assert_eq!(select_chat_reply("this is weird"), ChatReplyKind::Default);
        assert_eq!(select_chat_reply("I'm not sure"), ChatReplyKind::Unclear);
    }

    #[test]
    fn fallbacks_never_ask_questions() {
        for intent in Intent::ALL {
            let text = emergency_fallback(intent);
            assert!(!text.contains('?'));
            assert!(text.to_lowercase().contains("do this today"));
        }
    }
}
