pub mod guard;
pub mod intent;
pub mod models;
pub mod planner;
pub mod policy;
pub mod templates;

pub use guard::{
    default_action_line, strip_options_block, ContentGuard, Enforcement, GuardOutcome, GuardStage,
};
pub use intent::{
    classify_intent_rules, normalize_text, organize_override, Classification, IntentClassifier,
};
pub use models::*;
pub use planner::{build_organize_reply, compose_chat_reply, emergency_fallback};
pub use policy::{GuardLimits, Lexicon};
pub use templates::{Template, TemplateRegistry, ACTION_ANCHOR};
