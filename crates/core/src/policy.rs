use serde::{Deserialize, Serialize};

/// Advisory and therapeutic vocabulary. Any occurrence disqualifies a candidate.
const BANNED_PHRASES: &[&str] = &[
    "it depends",
    "remember",
    "stay motivated",
    "take a moment",
    "questions to ask yourself",
    "consider",
    "you might want to",
    "it's important to",
    "keep in mind",
    "don't forget",
    "ultimately",
    "at the end of the day",
    "think about",
    "reflect on",
    "ask yourself",
    "take time to",
    "it's worth",
    "you may want",
    "consider whether",
    "self care",
    "mental health",
    "meditation",
    "breathe",
    "relax",
    "wellness",
    "balance",
    "emotional",
    "feelings",
    "therapy",
    "mindfulness",
    "peace",
];

const BANNED_HEALTH_WORDS: &[&str] = &[
    "meditation",
    "exercise",
    "mental health",
    "self care",
    "stay motivated",
    "take care",
    "mindfulness",
    "breathe",
    "relax",
    "stress",
    "anxiety",
    "wellness",
    "balance",
    "emotional",
    "feelings",
    "therapy",
    "counseling",
    "support",
    "journey",
    "growth",
    "healing",
    "peace",
];

pub const DEFAULT_MAX_WORDS: usize = 80;
pub const DEFAULT_MAX_BULLETS: usize = 3;
pub const DEFAULT_TRUNCATION_BUFFER: usize = 5;

/// Smallest word cap that still leaves room for a forced action line.
pub const MIN_MAX_WORDS: usize = 20;

/// The ORGANIZE priority list and the help reply each carry three bullets.
pub const MIN_MAX_BULLETS: usize = 3;

/// Banned substrings, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexicon {
    entries: Vec<String>,
}

impl Lexicon {
    pub fn standard() -> Self {
        Self::new(BANNED_PHRASES.iter().chain(BANNED_HEALTH_WORDS.iter()).copied())
    }

    pub fn new<'a>(entries: impl IntoIterator<Item = &'a str>) -> Self {
        let mut normalized: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.trim().to_lowercase();
            if !entry.is_empty() && !normalized.contains(&entry) {
                normalized.push(entry);
            }
        }
        Self {
            entries: normalized,
        }
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry occurring in `text`, in lexicon order.
    pub fn first_hit(&self, text: &str) -> Option<&str> {
        let lower = text.to_lowercase();
        self.entries
            .iter()
            .find(|entry| lower.contains(entry.as_str()))
            .map(String::as_str)
    }

    pub fn is_clean(&self, text: &str) -> bool {
        self.first_hit(text).is_none()
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::standard()
    }
}

/// Product thresholds applied by the content guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardLimits {
    pub max_words: usize,
    pub max_bullets: usize,
    pub truncation_buffer: usize,
}

impl GuardLimits {
    pub fn new(max_words: usize, max_bullets: usize, truncation_buffer: usize) -> Self {
        let max_words = max_words.max(MIN_MAX_WORDS);
        Self {
            max_words,
            max_bullets: max_bullets.max(MIN_MAX_BULLETS),
            truncation_buffer: truncation_buffer.min(max_words / 2),
        }
    }
}

impl Default for GuardLimits {
    fn default() -> Self {
        Self {
            max_words: DEFAULT_MAX_WORDS,
            max_bullets: DEFAULT_MAX_BULLETS,
            truncation_buffer: DEFAULT_TRUNCATION_BUFFER,
        }
    }
}
