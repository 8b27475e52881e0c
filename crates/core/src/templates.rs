use serde::Serialize;

use crate::models::Intent;

/// The marker every governed response must contain, compared case-insensitively.
pub const ACTION_ANCHOR: &str = "do this today";

const PRACTICAL_CONSTRAINTS: &str =
    "User is a college student. Deadlines matter. Time limited. Practical outcomes only.";

const DIRECTNESS_RULES: &str =
    "Be decisive. Pick ONE option. No advice. No motivation. No health tips. Never ask questions.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SectionSpec {
    pub label: &'static str,
    pub max_items: Option<usize>,
    pub max_words_per_item: Option<usize>,
    pub note: &'static str,
}

const fn section(
    label: &'static str,
    max_items: Option<usize>,
    max_words_per_item: Option<usize>,
    note: &'static str,
) -> SectionSpec {
    SectionSpec {
        label,
        max_items,
        max_words_per_item,
        note,
    }
}

/// Structural contract for one intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Template {
    pub intent: Intent,
    pub sections: &'static [SectionSpec],
    pub forbidden_sections: &'static [&'static str],
    /// Every group must have at least one marker present (lowercase comparison).
    pub required_markers: &'static [&'static [&'static str]],
    pub skeleton: &'static str,
    pub closing_rules: &'static str,
    pub uses_preamble: bool,
}

impl Template {
    /// Marker groups with no member present in `text`.
    pub fn missing_markers(&self, text: &str) -> Vec<&'static [&'static str]> {
        let lower = text.to_lowercase();
        self.required_markers
            .iter()
            .copied()
            .filter(|group| !group.iter().any(|marker| lower.contains(marker)))
            .collect()
    }

    pub fn has_required_markers(&self, text: &str) -> bool {
        self.missing_markers(text).is_empty()
    }
}

static DECIDE_TEMPLATE: Template = Template {
    intent: Intent::Decide,
    sections: &[
        section("Decision", Some(1), Some(5), "state the decision"),
        section(
            "Recommendation",
            Some(1),
            None,
            "exactly one option, never both, never conditional",
        ),
        section("Reason", Some(2), Some(8), "bullets"),
        section("Do this today", Some(1), Some(12), "one actionable line"),
    ],
    forbidden_sections: &["Options"],
    required_markers: &[&["recommendation"], &["decision"]],
    skeleton: "**Decision:** [state decision in 5 words max]

**Recommendation:** [Pick EXACTLY ONE option - no \"both\" or \"depends\"]

**Reason:**
• [Reason 1 - max 8 words]
• [Reason 2 - max 8 words]

**Do this today:** [ONE specific action - max 12 words]",
    closing_rules: "MUST pick ONE recommendation. NO neutral answers. NO Options section.",
    uses_preamble: true,
};

static PLAN_TEMPLATE: Template = Template {
    intent: Intent::Plan,
    sections: &[
        section("Goal", Some(1), Some(5), "restate the goal"),
        section("Steps", Some(5), Some(8), "numbered"),
        section("Do this today", Some(1), Some(12), "first concrete action"),
    ],
    forbidden_sections: &[],
    required_markers: &[&["goal"], &["step", "1."]],
    skeleton: "**Goal:** [restate goal in 5 words max]

**Steps:**
1. [Step 1 - max 8 words]
2. [Step 2 - max 8 words]
3. [Step 3 - max 8 words]

**Do this today:** [First concrete action - max 12 words]",
    closing_rules: "Max 3 steps. Be specific. No generic advice.",
    uses_preamble: true,
};

static ORGANIZE_TEMPLATE: Template = Template {
    intent: Intent::Organize,
    sections: &[
        section("Tasks", Some(3), None, "inline list"),
        section("Priority", Some(3), None, "High, Medium, Low; one task each"),
        section("Do this today", Some(1), Some(12), "highest priority task"),
    ],
    forbidden_sections: &[],
    required_markers: &[&["task"], &["priority", "high"]],
    skeleton: "**Tasks:** [Task 1], [Task 2], [Task 3]

**Priority:**
• High: [Deadline-driven task]
• Medium: [Important but flexible]
• Low: [Optional/deferrable]

**Do this today:** [ONE highest priority task - max 12 words]",
    closing_rules: "Priorities only. NO health advice. NO self-care. NO meditation.",
    uses_preamble: false,
};

static CHAT_TEMPLATE: Template = Template {
    intent: Intent::Chat,
    sections: &[section("Do this today", Some(1), Some(12), "one directive")],
    forbidden_sections: &[],
    required_markers: &[],
    skeleton: "[One short directive sentence]

**Do this today:** [ONE action - max 12 words]",
    closing_rules: "One sentence only. No planning. No advice.",
    uses_preamble: false,
};

/// Read-only lookup of the per-intent templates.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    preamble: &'static str,
    rules: &'static str,
    templates: [&'static Template; 4],
}

impl TemplateRegistry {
    pub fn standard() -> Self {
        Self {
            preamble: PRACTICAL_CONSTRAINTS,
            rules: DIRECTNESS_RULES,
            templates: [
                &DECIDE_TEMPLATE,
                &PLAN_TEMPLATE,
                &ORGANIZE_TEMPLATE,
                &CHAT_TEMPLATE,
            ],
        }
    }

    pub fn template_for(&self, intent: Intent) -> &'static Template {
        match intent {
            Intent::Decide => self.templates[0],
            Intent::Plan => self.templates[1],
            Intent::Organize => self.templates[2],
            Intent::Chat => self.templates[3],
        }
    }

    pub fn preamble(&self) -> &'static str {
        self.preamble
    }

    pub fn system_prompt_for(&self, intent: Intent) -> String {
        let template = self.template_for(intent);
        let mut prompt = String::new();

        if template.uses_preamble {
            prompt.push_str(self.preamble);
            prompt.push_str("\n\n");
        }
        prompt.push_str(self.rules);
        prompt.push_str("\n\nFill this template EXACTLY:\n");
        prompt.push_str(template.skeleton);
        prompt.push_str("\n\n");
        prompt.push_str(template.closing_rules);
        prompt
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
