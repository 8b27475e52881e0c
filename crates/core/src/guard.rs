use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::models::{FallbackReason, Intent, ValidationFailure, ValidationVerdict};
use crate::planner::emergency_fallback;
use crate::policy::{GuardLimits, Lexicon};
use crate::templates::{TemplateRegistry, ACTION_ANCHOR};

/// Appended when the word cap forces truncation.
pub const GENERIC_ACTION_LINE: &str = "**Do this today:** Complete first task.";

static LIST_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[•\-\*]\s+|\d+\.\s+)").expect("list marker regex"));

pub fn default_action_line(intent: Intent) -> &'static str {
    match intent {
        Intent::Decide => "**Do this today:** Choose recommended option immediately.",
        Intent::Plan => "**Do this today:** Start step 1 now.",
        Intent::Organize => "**Do this today:** Focus on highest priority.",
        Intent::Chat => "**Do this today:** Be specific about what you need.",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardStage {
    LexiconScan,
    QuestionStrip,
    WordLimit,
    BulletLimit,
    ActionEnding,
    StructuralValidation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GuardOutcome {
    Passed,
    Fallback {
        stage: GuardStage,
        reason: FallbackReason,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enforcement {
    pub content: String,
    pub outcome: GuardOutcome,
    pub lexicon_hit: Option<String>,
    pub failures: Vec<ValidationFailure>,
}

impl Enforcement {
    pub fn passed(&self) -> bool {
        self.outcome == GuardOutcome::Passed
    }

    fn fallback(
        intent: Intent,
        stage: GuardStage,
        reason: FallbackReason,
        lexicon_hit: Option<String>,
        failures: Vec<ValidationFailure>,
    ) -> Self {
        Self {
            content: emergency_fallback(intent).to_string(),
            outcome: GuardOutcome::Fallback { stage, reason },
            lexicon_hit,
            failures,
        }
    }
}

/// Ordered rewrite and validation pipeline for candidate responses.
///
/// Holds only shared read-only configuration, so one guard can serve any
/// number of concurrent requests.
#[derive(Debug, Clone)]
pub struct ContentGuard {
    lexicon: Arc<Lexicon>,
    templates: Arc<TemplateRegistry>,
    limits: GuardLimits,
}

impl ContentGuard {
    pub fn new(
        lexicon: Arc<Lexicon>,
        templates: Arc<TemplateRegistry>,
        limits: GuardLimits,
    ) -> Self {
        Self {
            lexicon,
            templates,
            limits,
        }
    }

    pub fn standard() -> Self {
        Self::new(
            Arc::new(Lexicon::standard()),
            Arc::new(TemplateRegistry::standard()),
            GuardLimits::default(),
        )
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn enforce(&self, raw: &str, intent: Intent) -> String {
        self.enforce_detailed(raw, intent).content
    }

    pub fn enforce_detailed(&self, raw: &str, intent: Intent) -> Enforcement {
        if let Some(hit) = self.lexicon.first_hit(raw) {
            return Enforcement::fallback(
                intent,
                GuardStage::LexiconScan,
                FallbackReason::Lexicon,
                Some(hit.to_string()),
                Vec::new(),
            );
        }

        let text = strip_questions(raw);
        let text = truncate_to_word_limit(&text, self.limits);
        let text = limit_bullets(&text, self.limits.max_bullets);
        let text = self.force_action_ending(&text, intent);

        let verdict = self.validate(&text, intent);
        if !verdict.passed {
            let reason = if verdict.failures.contains(&ValidationFailure::LexiconHit) {
                FallbackReason::Lexicon
            } else {
                FallbackReason::Structure
            };
            return Enforcement::fallback(
                intent,
                GuardStage::StructuralValidation,
                reason,
                self.lexicon.first_hit(&verdict.candidate).map(str::to_string),
                verdict.failures,
            );
        }

        Enforcement {
            content: verdict.candidate,
            outcome: GuardOutcome::Passed,
            lexicon_hit: None,
            failures: Vec::new(),
        }
    }

    /// Checks every response invariant plus the intent's section markers.
    pub fn validate(&self, text: &str, intent: Intent) -> ValidationVerdict {
        let candidate = text.trim().to_string();
        let mut failures = Vec::new();

        if candidate.is_empty() {
            failures.push(ValidationFailure::Empty);
        }
        if candidate.contains('?') {
            failures.push(ValidationFailure::QuestionMark);
        }
        if !self.lexicon.is_clean(&candidate) {
            failures.push(ValidationFailure::LexiconHit);
        }
        if !candidate.to_lowercase().contains(ACTION_ANCHOR) {
            failures.push(ValidationFailure::MissingActionAnchor);
        }
        if !self
            .templates
            .template_for(intent)
            .has_required_markers(&candidate)
        {
            failures.push(ValidationFailure::MissingSection);
        }
        if count_words(&candidate) > self.limits.max_words {
            failures.push(ValidationFailure::TooManyWords);
        }
        if count_list_lines(&candidate) > self.limits.max_bullets {
            failures.push(ValidationFailure::TooManyBullets);
        }

        ValidationVerdict {
            passed: failures.is_empty(),
            candidate,
            failures,
        }
    }

    fn force_action_ending(&self, text: &str, intent: Intent) -> String {
        if text.to_lowercase().contains(ACTION_ANCHOR) {
            return text.to_string();
        }
        append_within_limit(
            text,
            default_action_line(intent),
            self.limits.max_words,
        )
    }
}

impl Default for ContentGuard {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Debug, Clone, Copy)]
struct Sentence<'a> {
    body: &'a str,
    terminated: bool,
    question: bool,
}

/// Drops every sentence that ends in a question mark, line by line.
///
/// Surviving sentences are rejoined with `". "`. A line whose sentences were
/// all questions disappears; the output never contains `?`.
pub fn strip_questions(text: &str) -> String {
    text.split('\n')
        .filter_map(strip_line_questions)
        .collect::<Vec<_>>()
        .join("\n")
}

fn strip_line_questions(line: &str) -> Option<String> {
    let body = line.trim_start();
    if body.trim().is_empty() {
        return Some(String::new());
    }
    let indent = &line[..line.len() - body.len()];

    let mut kept = Vec::new();
    let mut dropped = false;
    for sentence in split_sentences(body) {
        if sentence.question {
            dropped = true;
            continue;
        }
        let text = sentence.body.trim();
        if text.is_empty() {
            continue;
        }
        if sentence.terminated {
            kept.push(format!("{text}."));
        } else {
            kept.push(text.to_string());
        }
    }

    if kept.is_empty() {
        return if dropped { None } else { Some(String::new()) };
    }
    Some(format!("{indent}{}", kept.join(" ")))
}

fn is_terminator(ch: char) -> bool {
    matches!(ch, '.' | '!' | '?')
}

// A run of terminators closes a sentence when it contains `?` or is followed
// by whitespace or the end of the line; `3.5` and `v1.2` stay intact.
fn split_sentences(line: &str) -> Vec<Sentence<'_>> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = line.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if !is_terminator(ch) {
            continue;
        }

        let mut end = idx + ch.len_utf8();
        let mut question = ch == '?';
        while let Some(&(next_idx, next)) = chars.peek() {
            if !is_terminator(next) {
                break;
            }
            question |= next == '?';
            end = next_idx + next.len_utf8();
            chars.next();
        }

        let at_boundary = line[end..].chars().next().map_or(true, char::is_whitespace);
        if question || at_boundary {
            sentences.push(Sentence {
                body: &line[start..idx],
                terminated: true,
                question,
            });
            start = end;
        }
    }

    if start < line.len() {
        sentences.push(Sentence {
            body: &line[start..],
            terminated: false,
            question: false,
        });
    }

    sentences
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// The leading slice of `text` holding its first `keep` words, original spacing intact.
fn prefix_words(text: &str, keep: usize) -> &str {
    if keep == 0 {
        return "";
    }

    let mut seen = 0;
    let mut in_word = false;
    for (idx, ch) in text.char_indices() {
        if ch.is_whitespace() {
            if in_word {
                seen += 1;
                if seen == keep {
                    return &text[..idx];
                }
            }
            in_word = false;
        } else {
            in_word = true;
        }
    }

    text
}

/// Appends `line` after a blank line, shortening `body` so the total stays
/// within `max_words`.
pub fn append_within_limit(body: &str, line: &str, max_words: usize) -> String {
    let room = max_words.saturating_sub(count_words(line));
    let body = if count_words(body) > room {
        prefix_words(body, room)
    } else {
        body
    };
    let body = body.trim_end();

    if body.is_empty() {
        line.to_string()
    } else {
        format!("{body}\n\n{line}")
    }
}

/// Keeps the first `max_words - buffer` words and appends the generic action line.
pub fn truncate_to_word_limit(text: &str, limits: GuardLimits) -> String {
    if count_words(text) <= limits.max_words {
        return text.to_string();
    }

    let reserved = limits
        .truncation_buffer
        .max(count_words(GENERIC_ACTION_LINE));
    let keep = limits.max_words.saturating_sub(reserved);
    let prefix = prefix_words(text, keep).trim_end();

    if prefix.is_empty() {
        GENERIC_ACTION_LINE.to_string()
    } else {
        format!("{prefix}\n\n{GENERIC_ACTION_LINE}")
    }
}

pub fn is_list_line(line: &str) -> bool {
    LIST_LINE.is_match(line)
}

pub fn count_list_lines(text: &str) -> usize {
    text.lines().filter(|line| is_list_line(line)).count()
}

/// Drops bullet and numbered lines beyond `max_bullets`; prose lines pass through.
pub fn limit_bullets(text: &str, max_bullets: usize) -> String {
    let mut seen = 0;
    text.split('\n')
        .filter(|line| {
            if !is_list_line(line) {
                return true;
            }
            seen += 1;
            seen <= max_bullets
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn opens_options_block(line: &str) -> bool {
    let label = line
        .trim_start_matches(|ch: char| ch == '*' || ch == '#' || ch.is_whitespace())
        .to_lowercase();
    let bare = label.trim_end_matches(|ch: char| ch == '*' || ch == ':' || ch.is_whitespace());
    bare == "options" || label.starts_with("options:") || label.starts_with("options**:")
}

/// Removes a labelled `Options:` block up to the next `**` or `#` header.
/// Returns `None` when the text has no such block.
pub fn strip_options_block(text: &str) -> Option<String> {
    let mut kept = Vec::new();
    let mut skipping = false;
    let mut removed = false;

    for line in text.split('\n') {
        let trimmed = line.trim_start();
        if opens_options_block(trimmed) {
            skipping = true;
            removed = true;
            continue;
        }
        if skipping && (trimmed.starts_with("**") || trimmed.starts_with('#')) {
            skipping = false;
        }
        if !skipping {
            kept.push(line);
        }
    }

    removed.then(|| kept.join("\n"))
}
