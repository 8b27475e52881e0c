use std::env;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use compass_core::policy::{DEFAULT_MAX_BULLETS, DEFAULT_MAX_WORDS, DEFAULT_TRUNCATION_BUFFER};
use compass_core::{
    build_organize_reply, compose_chat_reply, emergency_fallback, organize_override,
    strip_options_block, ChatInput, Classification, ContentGuard, FallbackReason,
    GovernedMessage, GovernedReply, GuardLimits, GuardOutcome, Intent, IntentClassifier, Lexicon,
    Resolution, Role, TemplateRegistry,
};
use compass_llm::Generator;
use compass_observability::{GovernanceMetrics, MetricsSnapshot};
use compass_storage::TurnLog;
use serde::Serialize;
use tracing::{info, instrument, warn};

const DEFAULT_GENERATION_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_PERSIST_TIMEOUT_MILLIS: u64 = 2_000;
const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernanceSettings {
    pub limits: GuardLimits,
    pub generation_timeout: Duration,
    /// Upper bound on the turn-log writes made before a reply is returned.
    pub persist_timeout: Duration,
}

impl GovernanceSettings {
    pub fn from_env() -> Self {
        let limits = GuardLimits::new(
            env_or("COMPASS_MAX_WORDS", DEFAULT_MAX_WORDS),
            env_or("COMPASS_MAX_BULLETS", DEFAULT_MAX_BULLETS),
            env_or("COMPASS_TRUNCATION_BUFFER", DEFAULT_TRUNCATION_BUFFER),
        );
        let timeout_seconds = env_or(
            "COMPASS_GENERATION_TIMEOUT_SECONDS",
            DEFAULT_GENERATION_TIMEOUT_SECONDS,
        )
        .clamp(1, 300);
        let persist_millis = env_or(
            "COMPASS_PERSIST_TIMEOUT_MILLIS",
            DEFAULT_PERSIST_TIMEOUT_MILLIS,
        )
        .clamp(10, 10_000);

        Self {
            limits,
            generation_timeout: Duration::from_secs(timeout_seconds),
            persist_timeout: Duration::from_millis(persist_millis),
        }
    }
}

impl Default for GovernanceSettings {
    fn default() -> Self {
        Self {
            limits: GuardLimits::default(),
            generation_timeout: Duration::from_secs(DEFAULT_GENERATION_TIMEOUT_SECONDS),
            persist_timeout: Duration::from_millis(DEFAULT_PERSIST_TIMEOUT_MILLIS),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub generator: &'static str,
    pub limits: GuardLimits,
    pub lexicon_entries: usize,
    pub generation_timeout_seconds: u64,
    pub metrics: MetricsSnapshot,
}

/// Routes each message to a bypass builder or the generator, and guarantees
/// the returned text has passed the content guard.
#[derive(Clone)]
pub struct GovernanceAgent<G, S>
where
    G: Generator,
    S: TurnLog,
{
    classifier: Arc<IntentClassifier>,
    guard: ContentGuard,
    generator: Arc<G>,
    store: Arc<S>,
    metrics: Arc<GovernanceMetrics>,
    settings: GovernanceSettings,
}

impl<G, S> GovernanceAgent<G, S>
where
    G: Generator,
    S: TurnLog,
{
    pub fn new(
        generator: Arc<G>,
        store: Arc<S>,
        metrics: Arc<GovernanceMetrics>,
        settings: GovernanceSettings,
    ) -> Self {
        let guard = ContentGuard::new(
            Arc::new(Lexicon::standard()),
            Arc::new(TemplateRegistry::standard()),
            settings.limits,
        );

        Self {
            classifier: Arc::new(IntentClassifier::standard()),
            guard,
            generator,
            store,
            metrics,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn classify(&self, text: &str) -> Classification {
        self.classifier.explain(text)
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            generator: self.generator.name(),
            limits: self.settings.limits,
            lexicon_entries: self.guard.lexicon().len(),
            generation_timeout_seconds: self.settings.generation_timeout.as_secs(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// Never fails: collaborator errors resolve to the intent's fallback text.
    #[instrument(skip(self, input))]
    pub async fn respond(&self, input: ChatInput) -> GovernedReply {
        let started = Instant::now();
        self.metrics.inc_request();

        let message = input.text.as_str();
        let classified = self.classifier.classify(message);
        let intent = match organize_override(message) {
            Some(keyword) if classified != Intent::Organize => {
                info!(keyword, classified = %classified, "organize override applied");
                Intent::Organize
            }
            _ => classified,
        };

        let (content, resolution) = match intent {
            Intent::Chat => self.seal(
                compose_chat_reply(message).to_string(),
                intent,
                Resolution::ChatBypass,
            ),
            Intent::Organize => self.seal(
                build_organize_reply(message),
                intent,
                Resolution::OrganizeBypass,
            ),
            Intent::Decide | Intent::Plan => self.governed_reply(message, intent).await,
        };

        let user_id = input.user_id.as_deref().unwrap_or(ANONYMOUS_USER);
        self.persist_turns(user_id, message, &content).await;

        self.metrics.record_resolution(resolution);
        self.metrics.observe_latency(started.elapsed());
        info!(
            user_id,
            intent = %intent,
            resolution = ?resolution,
            fallback = resolution.is_fallback(),
            words = content.split_whitespace().count(),
            "message governed"
        );

        GovernedReply {
            content,
            intent,
            resolution,
        }
    }

    async fn governed_reply(&self, message: &str, intent: Intent) -> (String, Resolution) {
        let messages = [
            GovernedMessage::system(self.guard.templates().system_prompt_for(intent)),
            GovernedMessage::user(message),
        ];

        let generation = tokio::time::timeout(
            self.settings.generation_timeout,
            self.generator.complete(&messages),
        )
        .await;
        let raw = match generation {
            Ok(Ok(completion)) if !completion.content.trim().is_empty() => completion.content,
            Ok(Ok(_)) => {
                warn!(generator = self.generator.name(), "empty completion");
                return self.collaborator_fallback(intent, FallbackReason::EmptyCompletion);
            }
            Ok(Err(err)) => {
                warn!(generator = self.generator.name(), error = %err, "generation failed");
                return self.collaborator_fallback(intent, FallbackReason::Generation);
            }
            Err(_) => {
                warn!(
                    generator = self.generator.name(),
                    timeout_ms = self.settings.generation_timeout.as_millis() as u64,
                    "generation timed out"
                );
                return self.collaborator_fallback(intent, FallbackReason::Timeout);
            }
        };

        // Options bullets would otherwise count against the bullet cap.
        let raw = match intent {
            Intent::Decide => match strip_options_block(&raw) {
                Some(stripped) => {
                    info!("options block removed before enforcement");
                    stripped
                }
                None => raw,
            },
            _ => raw,
        };

        let enforced = self.guard.enforce_detailed(&raw, intent);
        if let GuardOutcome::Fallback { stage, reason } = enforced.outcome {
            if reason == FallbackReason::Lexicon {
                self.metrics.inc_lexicon_rejection();
                warn!(
                    stage = ?stage,
                    entry = enforced.lexicon_hit.as_deref().unwrap_or_default(),
                    "candidate rejected by lexicon"
                );
            } else {
                warn!(stage = ?stage, failures = ?enforced.failures, "candidate failed validation");
            }
            return (enforced.content, Resolution::Fallback(reason));
        }

        let mut content = enforced.content;
        if intent == Intent::Decide {
            if let Some(stripped) = strip_options_block(&content) {
                info!("options block removed");
                let verdict = self.guard.validate(&stripped, intent);
                if !verdict.passed {
                    warn!(failures = ?verdict.failures, "decision invalid after options removal");
                    return (
                        emergency_fallback(intent).to_string(),
                        Resolution::Fallback(FallbackReason::Structure),
                    );
                }
                content = verdict.candidate;
            }
        }

        self.seal(content, intent, Resolution::Governed)
    }

    /// Final check before text leaves the agent.
    fn seal(
        &self,
        content: String,
        intent: Intent,
        resolution: Resolution,
    ) -> (String, Resolution) {
        let verdict = self.guard.validate(&content, intent);
        if verdict.passed {
            return (verdict.candidate, resolution);
        }

        let reason = if self.guard.lexicon().is_clean(&content) {
            FallbackReason::Structure
        } else {
            self.metrics.inc_lexicon_rejection();
            FallbackReason::Lexicon
        };
        warn!(failures = ?verdict.failures, intent = %intent, "sealed text failed validation");
        (
            emergency_fallback(intent).to_string(),
            Resolution::Fallback(reason),
        )
    }

    fn collaborator_fallback(
        &self,
        intent: Intent,
        reason: FallbackReason,
    ) -> (String, Resolution) {
        self.metrics.inc_generation_failure();
        (
            emergency_fallback(intent).to_string(),
            Resolution::Fallback(reason),
        )
    }

    async fn persist_turns(&self, user_id: &str, message: &str, reply: &str) {
        let writes = async {
            self.store.append(user_id, Role::User, message).await?;
            self.store.append(user_id, Role::Assistant, reply).await
        };

        match tokio::time::timeout(self.settings.persist_timeout, writes).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(user_id, error = %err, "failed to store turns"),
            Err(_) => warn!(
                user_id,
                timeout_ms = self.settings.persist_timeout.as_millis() as u64,
                "turn log write timed out"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compass_core::ACTION_ANCHOR;
    use compass_llm::{Completion, GenerationError, StaticGenerator};
    use compass_storage::{MemoryStore, Turn};
    use parking_lot::Mutex;

    struct FailingGenerator;

    impl Generator for FailingGenerator {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn complete(
            &self,
            _messages: &[GovernedMessage],
        ) -> Result<Completion, GenerationError> {
            Err(GenerationError::Transport("connection refused".to_string()))
        }
    }

    struct SlowGenerator;

    impl Generator for SlowGenerator {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn complete(
            &self,
            _messages: &[GovernedMessage],
        ) -> Result<Completion, GenerationError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Completion::text("too late"))
        }
    }

    #[derive(Clone, Default)]
    struct RecordingGenerator {
        calls: Arc<Mutex<Vec<Vec<GovernedMessage>>>>,
    }

    impl Generator for RecordingGenerator {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn complete(
            &self,
            messages: &[GovernedMessage],
        ) -> Result<Completion, GenerationError> {
            self.calls.lock().push(messages.to_vec());
            Ok(Completion::text("**Goal:** Pass exams\n\n**Steps:**\n1. List subjects"))
        }
    }

    struct StalledStore;

    impl TurnLog for StalledStore {
        async fn append(
            &self,
            _user_id: &str,
            _role: Role,
            _content: &str,
        ) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }

        async fn history(&self, _user_id: &str, _limit: usize) -> anyhow::Result<Vec<Turn>> {
            Ok(Vec::new())
        }

        async fn clear(&self, _user_id: &str) -> anyhow::Result<u64> {
            Ok(0)
        }
    }

    fn agent_with<G: Generator>(generator: G) -> GovernanceAgent<G, MemoryStore> {
        let settings = GovernanceSettings {
            generation_timeout: Duration::from_millis(50),
            ..GovernanceSettings::default()
        };
        GovernanceAgent::new(
            Arc::new(generator),
            Arc::new(MemoryStore::new()),
            GovernanceMetrics::shared(),
            settings,
        )
    }

    fn input(text: &str) -> ChatInput {
        ChatInput {
            text: text.to_string(),
            user_id: Some("student-1".to_string()),
        }
    }

    #[tokio::test]
    async fn greeting_bypasses_generation() {
        let agent = agent_with(FailingGenerator);
        let reply = agent.respond(input("hi")).await;
        assert_eq!(reply.intent, Intent::Chat);
        assert_eq!(reply.resolution, Resolution::ChatBypass);
        assert!(reply.content.starts_with("Hi"));
        assert!(reply.content.to_lowercase().contains(ACTION_ANCHOR));
    }

    #[tokio::test]
    async fn organize_bypass_lists_detected_tasks() {
        let agent = agent_with(FailingGenerator);
        let reply = agent
            .respond(input("I'm overwhelmed with college, side hustle, and family"))
            .await;
        assert_eq!(reply.intent, Intent::Organize);
        assert_eq!(reply.resolution, Resolution::OrganizeBypass);
        assert!(reply.content.contains("College work"));
        assert!(!reply.content.contains('?'));
    }

    #[tokio::test]
    async fn stress_keyword_overrides_decide() {
        let agent = agent_with(StaticGenerator::new("unused"));
        let reply = agent
            .respond(input("Should I take the job offer? I'm so stressed"))
            .await;
        assert_eq!(reply.intent, Intent::Organize);
        assert_eq!(reply.resolution, Resolution::OrganizeBypass);
    }

    #[tokio::test]
    async fn generation_failure_yields_fallback() {
        let agent = agent_with(FailingGenerator);
        let reply = agent.respond(input("Should I learn Python or JavaScript?")).await;
        assert_eq!(reply.intent, Intent::Decide);
        assert_eq!(reply.content, emergency_fallback(Intent::Decide));
        assert_eq!(
            reply.resolution,
            Resolution::Fallback(FallbackReason::Generation)
        );
        assert_eq!(agent.status().metrics.generation_failures_total, 1);
    }

    #[tokio::test]
    async fn slow_generation_times_out_to_fallback() {
        let agent = agent_with(SlowGenerator);
        let reply = agent.respond(input("Help me plan my exam week")).await;
        assert_eq!(reply.intent, Intent::Plan);
        assert_eq!(reply.content, emergency_fallback(Intent::Plan));
        assert_eq!(reply.resolution, Resolution::Fallback(FallbackReason::Timeout));
    }

    #[tokio::test]
    async fn empty_completion_yields_fallback() {
        let agent = agent_with(StaticGenerator::new("   "));
        let reply = agent.respond(input("Help me plan my exam week")).await;
        assert_eq!(
            reply.resolution,
            Resolution::Fallback(FallbackReason::EmptyCompletion)
        );
    }

    #[tokio::test]
    async fn banned_vocabulary_is_replaced_by_fallback() {
        let agent = agent_with(StaticGenerator::new(
            "It depends on your goals. You might want to consider meditation.",
        ));
        let reply = agent.respond(input("Should I learn Python or JavaScript?")).await;
        assert_eq!(reply.content, emergency_fallback(Intent::Decide));
        assert_eq!(reply.resolution, Resolution::Fallback(FallbackReason::Lexicon));
        assert_eq!(agent.status().metrics.lexicon_rejections_total, 1);
    }

    #[tokio::test]
    async fn options_block_is_stripped_from_decisions() {
        let agent = agent_with(StaticGenerator::new(
            "**Decision:** Learn Python first\n\n**Options:**\n• Python\n• JavaScript\n\n**Recommendation:** Python\n\n**Reason:**\n• Faster to learn\n• Used in data jobs\n\n**Do this today:** Install Python and finish one tutorial.",
        ));
        let reply = agent.respond(input("Should I learn Python or JavaScript?")).await;
        assert_eq!(reply.resolution, Resolution::Governed);
        assert!(!reply.content.contains("Options"));
        assert!(!reply.content.contains("JavaScript"));
        assert!(reply.content.contains("**Recommendation:** Python"));
        assert!(reply.content.contains("• Faster to learn"));
        assert!(reply.content.contains("• Used in data jobs"));
    }

    #[tokio::test]
    async fn governed_plan_drops_questions() {
        let agent = agent_with(StaticGenerator::new(
            "**Goal:** Pass exams\n\n**Steps:**\n1. List subjects\n2. Book library slots\n3. Do past papers\n\nWhat is your exam date?",
        ));
        let reply = agent.respond(input("Help me plan my exam week")).await;
        assert_eq!(reply.resolution, Resolution::Governed);
        assert!(!reply.content.contains('?'));
        assert!(reply.content.ends_with("**Do this today:** Start step 1 now."));
    }

    #[tokio::test]
    async fn turns_are_logged_per_user() {
        let agent = agent_with(FailingGenerator);
        agent.respond(input("hi")).await;

        let history = agent.store().history("student-1", 10).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "hi");
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn generator_sees_only_system_prompt_and_raw_message() {
        let recorder = RecordingGenerator::default();
        let agent = agent_with(recorder.clone());
        agent.respond(input("hi")).await;
        agent.respond(input("thanks")).await;

        let questions = ["Should I learn Python or JavaScript?", "Help me plan my exam week"];
        for question in questions {
            agent.respond(input(question)).await;
        }

        let calls = recorder.calls.lock().clone();
        assert_eq!(calls.len(), questions.len());
        for (messages, question) in calls.iter().zip(questions) {
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0].role, Role::System);
            assert_eq!(messages[1].role, Role::User);
            assert!(messages[0].content.contains("Deadlines matter"));
            assert_eq!(messages[1].content, question);
        }
        assert!(calls[0][0].content.contains("**Decision:**"));
        assert!(calls[1][0].content.contains("**Goal:**"));
    }

    #[tokio::test]
    async fn stalled_turn_log_does_not_hold_the_reply() {
        let settings = GovernanceSettings {
            persist_timeout: Duration::from_millis(50),
            ..GovernanceSettings::default()
        };
        let agent = GovernanceAgent::new(
            Arc::new(FailingGenerator),
            Arc::new(StalledStore),
            GovernanceMetrics::shared(),
            settings,
        );

        let reply = tokio::time::timeout(Duration::from_secs(2), agent.respond(input("hi")))
            .await
            .expect("reply returned before the store write finished");
        assert_eq!(reply.resolution, Resolution::ChatBypass);
    }
}
