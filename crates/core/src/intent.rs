use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::models::{ClassificationScore, Intent};

const DECIDE_PATTERNS: &[&str] = &[
    r"should\s+i",
    r"which\s+is\s+better",
    r"which\s+should\s+i",
    r"confused\s+between",
    r"help\s+me\s+choose",
    r"decide\s+between",
    r"what\s+should\s+i\s+pick",
    r"recommend",
    r"better\s+option",
    r"\bvs\.?\s+",
    r"\bor\s+.*\?",
    r"pick\s+between",
    r"choose\s+between",
];

const PLAN_PATTERNS: &[&str] = &[
    r"i\s+want\s+to\s+achieve",
    r"i\s+want\s+to\s+build",
    r"i\s+want\s+to\s+create",
    r"i\s+want\s+to\s+improve",
    r"i\s+want\s+to\s+prepare",
    r"help\s+me\s+plan",
    r"i\s+need\s+a\s+roadmap",
    r"how\s+do\s+i\s+prepare",
    r"how\s+do\s+i\s+build",
    r"how\s+do\s+i\s+create",
    r"how\s+do\s+i\s+improve",
    r"step\s+by\s+step",
    r"roadmap",
    r"strategy\s+for",
    r"approach\s+to",
    r"how\s+to\s+get",
    r"build\s+a\s+startup",
    r"start\s+a\s+business",
    r"learn\s+.*\s+plan",
    r"prepare\s+for\s+exams",
    r"improve.*resume",
    r"get\s+ready\s+for",
    r"study\s+plan",
    r"preparation\s+for",
];

const ORGANIZE_PATTERNS: &[&str] = &[
    r"i\s+have\s+too\s+many",
    r"help\s+me\s+manage",
    r"i'm\s+overwhelmed",
    r"organize\s+my\s+tasks",
    r"prioritize",
    r"schedule",
    r"time\s+management",
    r"juggling",
    r"balance",
    r"work.*gym.*family",
    r"manage.*time",
    r"too\s+much\s+to\s+do",
    r"organize\s+my",
    r"manage\s+my",
    r"overwhelmed\s+with",
    r"too\s+many\s+tasks",
    r"help.*prioritize",
    r"college.*side.*hustle",
    r"college.*family.*work",
    r"multiple\s+responsibilities",
];

const CHAT_EXEMPLARS: &[&str] = &[
    r"^hi[!.]*$",
    r"^hello[!.]*$",
    r"^hey[!.]*$",
    r"^what.*do$",
    r"^how.*you$",
    r"^ok[!.]*$",
    r"^okay[!.]*$",
    r"^thanks[!.]*$",
    r"^thank you[!.]*$",
];

const DECIDE_KEYWORDS: &[&str] = &[
    "choose", "pick", "better", "decide", "which", "should i", "vs", "or",
];

const PLAN_KEYWORDS: &[&str] = &[
    "plan", "how to", "steps", "build", "create", "achieve", "improve", "prepare", "study",
    "ready",
];

const ORGANIZE_KEYWORDS: &[&str] = &[
    "organize",
    "manage",
    "priority",
    "tasks",
    "schedule",
    "time management",
];

/// Terms that route a message to the ORGANIZE builder whatever the classifier says.
pub const ORGANIZE_OVERRIDE_KEYWORDS: &[&str] = &[
    "stress",
    "overwhelm",
    "overload",
    "burnout",
    "burned out",
    "burnt out",
    "exhausted",
    "anxiety",
    "anxious",
    "health",
    "too much",
];

static STANDARD: Lazy<IntentClassifier> = Lazy::new(IntentClassifier::standard);

pub fn normalize_text(input: &str) -> String {
    input
        .replace(['\u{2019}', '\u{2018}'], "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Classifies with the process-wide standard rule book.
pub fn classify_intent_rules(text: &str) -> Intent {
    STANDARD.classify(text)
}

pub fn standard_classifier() -> &'static IntentClassifier {
    &STANDARD
}

/// Returns the override keyword found in `text`, if any.
pub fn organize_override(text: &str) -> Option<&'static str> {
    let lower = normalize_text(text).to_lowercase();
    ORGANIZE_OVERRIDE_KEYWORDS
        .iter()
        .copied()
        .find(|keyword| lower.contains(keyword))
}

#[derive(Debug, Clone)]
struct NamedPattern {
    source: &'static str,
    regex: Regex,
}

/// Ordered trigger patterns for one intent.
#[derive(Debug, Clone)]
pub struct PatternSet {
    intent: Intent,
    patterns: Vec<NamedPattern>,
}

impl PatternSet {
    pub fn new(intent: Intent, sources: &[&'static str]) -> Result<Self, regex::Error> {
        let patterns = sources
            .iter()
            .map(|source| {
                Ok(NamedPattern {
                    source: *source,
                    regex: Regex::new(source)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self { intent, patterns })
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    /// Number of patterns occurring anywhere in `lower`. Every pattern is checked.
    pub fn count_matches(&self, lower: &str) -> u32 {
        self.patterns
            .iter()
            .filter(|pattern| pattern.regex.is_match(lower))
            .count() as u32
    }

    pub fn matched_sources(&self, lower: &str) -> Vec<&'static str> {
        self.patterns
            .iter()
            .filter(|pattern| pattern.regex.is_match(lower))
            .map(|pattern| pattern.source)
            .collect()
    }
}

/// One step of the selection order. Rules are evaluated top to bottom and the
/// first one that yields an intent wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SelectionRule {
    /// `intent` scored above zero and at least as high as every intent in `over`.
    Dominant {
        intent: Intent,
        over: &'static [Intent],
    },
    ChatExemplar,
    KeywordSweep {
        intent: Intent,
    },
    Default,
}

pub const SELECTION_ORDER: &[SelectionRule] = &[
    SelectionRule::Dominant {
        intent: Intent::Decide,
        over: &[Intent::Plan, Intent::Organize],
    },
    SelectionRule::Dominant {
        intent: Intent::Plan,
        over: &[Intent::Organize],
    },
    SelectionRule::Dominant {
        intent: Intent::Organize,
        over: &[],
    },
    SelectionRule::ChatExemplar,
    SelectionRule::KeywordSweep {
        intent: Intent::Decide,
    },
    SelectionRule::KeywordSweep {
        intent: Intent::Plan,
    },
    SelectionRule::KeywordSweep {
        intent: Intent::Organize,
    },
    SelectionRule::Default,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatternHit {
    pub intent: Intent,
    pub pattern: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub intent: Intent,
    pub scores: ClassificationScore,
    pub rule: SelectionRule,
    pub matched_patterns: Vec<PatternHit>,
}

#[derive(Debug, Clone)]
pub struct IntentClassifier {
    decide: PatternSet,
    plan: PatternSet,
    organize: PatternSet,
    chat_exemplars: Vec<Regex>,
    sweep: Vec<(Intent, Regex)>,
}

impl IntentClassifier {
    pub fn standard() -> Self {
        Self::from_sources(
            DECIDE_PATTERNS,
            PLAN_PATTERNS,
            ORGANIZE_PATTERNS,
            CHAT_EXEMPLARS,
            &[
                (Intent::Decide, DECIDE_KEYWORDS),
                (Intent::Plan, PLAN_KEYWORDS),
                (Intent::Organize, ORGANIZE_KEYWORDS),
            ],
        )
        .expect("built-in intent patterns compile")
    }

    pub fn from_sources(
        decide: &[&'static str],
        plan: &[&'static str],
        organize: &[&'static str],
        chat_exemplars: &[&str],
        sweep: &[(Intent, &[&str])],
    ) -> Result<Self, regex::Error> {
        let chat_exemplars = chat_exemplars
            .iter()
            .map(|source| Regex::new(source))
            .collect::<Result<Vec<_>, _>>()?;

        let sweep = sweep
            .iter()
            .map(|(intent, keywords)| Ok((*intent, keyword_regex(keywords)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            decide: PatternSet::new(Intent::Decide, decide)?,
            plan: PatternSet::new(Intent::Plan, plan)?,
            organize: PatternSet::new(Intent::Organize, organize)?,
            chat_exemplars,
            sweep,
        })
    }

    pub fn classify(&self, message: &str) -> Intent {
        self.explain(message).intent
    }

    pub fn score(&self, message: &str) -> ClassificationScore {
        self.score_lowered(&lowered(message))
    }

    /// Classifies `message` and reports which selection rule decided it.
    pub fn explain(&self, message: &str) -> Classification {
        let lower = lowered(message);
        let scores = self.score_lowered(&lower);
        let matched_patterns = [&self.decide, &self.plan, &self.organize]
            .into_iter()
            .flat_map(|set| {
                set.matched_sources(&lower)
                    .into_iter()
                    .map(move |pattern| PatternHit {
                        intent: set.intent(),
                        pattern,
                    })
            })
            .collect();

        let intent_rule = SELECTION_ORDER
            .iter()
            .find_map(|rule| self.apply(*rule, &scores, &lower).map(|intent| (intent, *rule)));
        let (intent, rule) = intent_rule.unwrap_or((Intent::Chat, SelectionRule::Default));

        Classification {
            intent,
            scores,
            rule,
            matched_patterns,
        }
    }

    fn score_lowered(&self, lower: &str) -> ClassificationScore {
        ClassificationScore {
            decide: self.decide.count_matches(lower),
            plan: self.plan.count_matches(lower),
            organize: self.organize.count_matches(lower),
        }
    }

    fn apply(
        &self,
        rule: SelectionRule,
        scores: &ClassificationScore,
        lower: &str,
    ) -> Option<Intent> {
        match rule {
            SelectionRule::Dominant { intent, over } => {
                let own = scores.get(intent);
                (own > 0 && over.iter().all(|other| own >= scores.get(*other))).then_some(intent)
            }
            SelectionRule::ChatExemplar => self
                .chat_exemplars
                .iter()
                .any(|exemplar| exemplar.is_match(lower))
                .then_some(Intent::Chat),
            SelectionRule::KeywordSweep { intent } => self
                .sweep
                .iter()
                .find(|(candidate, _)| *candidate == intent)
                .filter(|(_, keywords)| keywords.is_match(lower))
                .map(|(candidate, _)| *candidate),
            SelectionRule::Default => Some(Intent::Chat),
        }
    }
}

fn lowered(message: &str) -> String {
    normalize_text(message).to_lowercase()
}

/// Sweep keywords that only count as whole words. Everything else matches as a
/// word prefix, so "plan" also catches "planning".
const WHOLE_WORD_KEYWORDS: &[&str] = &["or", "vs", "which"];

fn keyword_regex(keywords: &[&str]) -> Result<Regex, regex::Error> {
    let (whole, prefixed): (Vec<&str>, Vec<&str>) = keywords
        .iter()
        .copied()
        .partition(|keyword| WHOLE_WORD_KEYWORDS.contains(keyword));

    let alternation = |words: &[&str]| {
        words
            .iter()
            .map(|keyword| regex::escape(keyword).replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|")
    };

    let mut branches = Vec::new();
    if !prefixed.is_empty() {
        branches.push(format!(r"\b(?:{})", alternation(prefixed.as_slice())));
    }
    if !whole.is_empty() {
        branches.push(format!(r"\b(?:{})\b", alternation(whole.as_slice())));
    }
    if branches.is_empty() {
        // Never matches.
        return Regex::new(r"\b\B");
    }
    Regex::new(&branches.join("|"))
}

pub(crate) fn contains_any(input: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| input.contains(needle))
}
