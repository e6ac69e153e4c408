//! Parsing orchestrator
//!
//! INPUT → EXTRACT (primary, else rules) → GATE → RETRY | COMMIT
//!
//! Remote failures of any kind are absorbed here and answered with the rule
//! engine. Committing drafts is the caller's job.

use crate::audit::{InteractionKind, InteractionLog};
use crate::config::{ExtractorMode, TrackerConfig};
use crate::edit::EditOutcome;
use crate::error::TrackerError;
use crate::extraction::rules::load_rules;
use crate::extraction::{ExtractionRequest, Extractor, RemoteExtractor, RuleBasedExtractor};
use crate::models::{ExtractionResult, FoodRecord};
use crate::session::{RetryDecision, RetrySession};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

pub const CLARIFICATION_PROMPT: &str = "I'm not quite sure I understood. Could you clarify?";
pub const NOT_UNDERSTOOD_MESSAGE: &str = "Hmm, I didn't catch that. Mind trying again?";

/// What the caller should do with one utterance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionOutcome {
    /// Ask for clarification; `attempt` is the next zero-based attempt.
    Retry {
        prompt: String,
        attempt: u32,
        result: ExtractionResult,
    },
    /// Persist every draft. `forced` marks a low-confidence result committed
    /// because attempts ran out.
    Commit { result: ExtractionResult, forced: bool },
    /// Neither strategy produced anything. Retry state is untouched.
    Failed { message: String },
}

/// Selects remote vs. rule-based extraction and gates the result
pub struct ParsingOrchestrator {
    primary: Option<Arc<dyn Extractor>>,
    fallback: Arc<dyn Extractor>,
    remote_timeout: Duration,
    journal: InteractionLog,
}

impl ParsingOrchestrator {
    pub fn new(primary: Option<Arc<dyn Extractor>>, fallback: Arc<dyn Extractor>) -> Self {
        Self {
            primary,
            fallback,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            journal: InteractionLog::new(),
        }
    }

    /// Rules only, no remote channel
    pub fn rule_based() -> Self {
        Self::new(None, Arc::new(RuleBasedExtractor::new()))
    }

    /// Build the strategy pair the configuration asks for
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let mut rules = RuleBasedExtractor::new();
        if let Some(path) = &config.rules_path {
            let extra = load_rules(path)?;
            info!(count = extra.len(), path = %path.display(), "Loaded extra food rules");
            rules.extend_rules(extra);
        }

        let primary: Option<Arc<dyn Extractor>> = match config.extractor {
            ExtractorMode::Remote => {
                if !config.has_valid_api_key() {
                    warn!("Remote extractor selected without a valid API key; every call will fall back to rules");
                }
                Some(Arc::new(RemoteExtractor::from_config(config)?))
            }
            ExtractorMode::Rules => None,
        };

        info!(mode = ?config.extractor, "Parsing orchestrator configured");

        Ok(Self::new(primary, Arc::new(rules)).with_remote_timeout(config.request_timeout))
    }

    pub fn with_remote_timeout(mut self, remote_timeout: Duration) -> Self {
        self.remote_timeout = remote_timeout;
        self
    }

    pub fn journal(&self) -> &InteractionLog {
        &self.journal
    }

    /// Extract drafts for one attempt. Errors only if the fallback itself
    /// produced nothing.
    pub async fn extract(&self, text: &str, attempt: u32) -> Result<ExtractionResult> {
        let request = ExtractionRequest::new(text, attempt);

        if let Some(primary) = &self.primary {
            self.journal
                .record(InteractionKind::Request, primary.name(), text, None)
                .await;

            match timeout(self.remote_timeout, primary.extract(&request)).await {
                Ok(Ok(result)) => {
                    self.journal
                        .record(
                            InteractionKind::Response,
                            primary.name(),
                            text,
                            Some(format!(
                                "{} item(s), confidence {:.2}",
                                result.drafts.len(),
                                result.confidence
                            )),
                        )
                        .await;
                    return Ok(result);
                }
                Ok(Err(e)) => {
                    if !e.is_remote_failure() {
                        warn!(extractor = primary.name(), "Unexpected extractor error, using rules: {}", e);
                    } else if matches!(e, TrackerError::MalformedResponse(_)) {
                        warn!(extractor = primary.name(), "Malformed response, using rules: {}", e);
                    } else {
                        debug!(extractor = primary.name(), "Remote unavailable, using rules: {}", e);
                    }
                    self.journal
                        .record(InteractionKind::Fallback, primary.name(), text, Some(e.to_string()))
                        .await;
                }
                Err(_) => {
                    warn!(
                        extractor = primary.name(),
                        timeout_ms = self.remote_timeout.as_millis() as u64,
                        "Remote extraction timed out, using rules"
                    );
                    self.journal
                        .record(
                            InteractionKind::Fallback,
                            primary.name(),
                            text,
                            Some("timed out".to_string()),
                        )
                        .await;
                }
            }
        }

        match self.fallback.extract(&request).await {
            Ok(result) if !result.drafts.is_empty() => {
                self.journal
                    .record(
                        InteractionKind::Response,
                        self.fallback.name(),
                        text,
                        Some(format!("{} item(s)", result.drafts.len())),
                    )
                    .await;
                Ok(result)
            }
            Ok(_) => Err(TrackerError::ParseFailed("no drafts produced".to_string())),
            Err(e) => {
                error!(extractor = self.fallback.name(), "Fallback extraction failed: {}", e);
                self.journal
                    .record(InteractionKind::Error, self.fallback.name(), text, Some(e.to_string()))
                    .await;
                Err(TrackerError::ParseFailed(e.to_string()))
            }
        }
    }

    /// Extract and gate one utterance against the session.
    ///
    /// The session is only touched after extraction succeeds, so a failure or
    /// dropping this future mid-flight leaves it exactly as it was.
    pub async fn process(&self, text: &str, session: &mut RetrySession) -> ExtractionOutcome {
        let attempt = session.next_attempt();

        let result = match self.extract(text, attempt).await {
            Ok(result) => result,
            Err(e) => {
                warn!(attempt, "Extraction failed: {}", e);
                return ExtractionOutcome::Failed {
                    message: NOT_UNDERSTOOD_MESSAGE.to_string(),
                };
            }
        };

        session.begin();
        match session.record(result.confidence, result.note.as_deref()) {
            RetryDecision::Retry { attempt } => ExtractionOutcome::Retry {
                prompt: clarification_prompt(result.note.as_deref()),
                attempt,
                result,
            },
            RetryDecision::Commit { forced } => {
                if forced {
                    info!(confidence = result.confidence, "Retries exhausted, committing anyway");
                }
                ExtractionOutcome::Commit { result, forced }
            }
        }
    }

    /// Apply an edit. The remote channel is tried first when present; any
    /// failure there goes to the rule grammar.
    pub async fn edit(&self, original: &FoodRecord, instruction: &str) -> EditOutcome {
        let context = format!(
            "Original: {} ({} cal) | Edit: {}",
            original.name, original.calories, instruction
        );

        if let Some(primary) = &self.primary {
            match timeout(self.remote_timeout, primary.edit(original, instruction)).await {
                Ok(Ok(edited)) if edited.id() == original.id() => {
                    self.journal
                        .record(
                            InteractionKind::Response,
                            primary.name(),
                            &context,
                            Some(format!("{} ({} cal)", edited.name, edited.calories)),
                        )
                        .await;
                    return EditOutcome::from_records(original, edited);
                }
                Ok(Ok(_)) => {
                    warn!(extractor = primary.name(), "Remote edit changed record identity, using rules");
                }
                Ok(Err(e)) => {
                    debug!(extractor = primary.name(), "Remote edit failed, using rules: {}", e);
                }
                Err(_) => {
                    warn!(extractor = primary.name(), "Remote edit timed out, using rules");
                }
            }
            self.journal
                .record(InteractionKind::Fallback, primary.name(), &context, None)
                .await;
        }

        match self.fallback.edit(original, instruction).await {
            Ok(edited) if edited.id() == original.id() => EditOutcome::from_records(original, edited),
            Ok(_) | Err(_) => {
                error!(record_id = %original.id(), "Fallback edit failed, leaving record unchanged");
                EditOutcome::Unchanged {
                    record: original.clone(),
                }
            }
        }
    }
}

fn clarification_prompt(note: Option<&str>) -> String {
    match note {
        Some(note) if !note.trim().is_empty() => format!("{} {}", CLARIFICATION_PROMPT, note),
        _ => CLARIFICATION_PROMPT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::apply_edit;
    use crate::models::FoodDraft;
    use crate::session::RetryState;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Returns a fixed single-draft result at the given confidence
    struct ScriptedExtractor {
        confidence: f64,
    }

    #[async_trait]
    impl Extractor for ScriptedExtractor {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult> {
            Ok(ExtractionResult {
                drafts: vec![FoodDraft {
                    name: "Soup".to_string(),
                    calories: 150,
                    protein: 5.0,
                    carbs: 20.0,
                    fat: 4.0,
                    timestamp: request.current_time,
                    assumption: None,
                }],
                confidence: self.confidence,
                note: Some("which soup?".to_string()),
            })
        }

        async fn edit(&self, original: &FoodRecord, _instruction: &str) -> Result<FoodRecord> {
            let mut edited = original.clone();
            edited.name = "Remote Soup".to_string();
            Ok(edited)
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl Extractor for FailingExtractor {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn extract(&self, _request: &ExtractionRequest) -> Result<ExtractionResult> {
            Err(TrackerError::RemoteUnavailable("connection refused".to_string()))
        }

        async fn edit(&self, _original: &FoodRecord, _instruction: &str) -> Result<FoodRecord> {
            Err(TrackerError::MalformedResponse("garbage".to_string()))
        }
    }

    struct SlowExtractor;

    #[async_trait]
    impl Extractor for SlowExtractor {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            ScriptedExtractor { confidence: 0.9 }.extract(request).await
        }

        async fn edit(&self, original: &FoodRecord, _instruction: &str) -> Result<FoodRecord> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(original.clone())
        }
    }

    fn with_primary(primary: impl Extractor + 'static) -> ParsingOrchestrator {
        ParsingOrchestrator::new(Some(Arc::new(primary)), Arc::new(RuleBasedExtractor::new()))
    }

    fn burger() -> FoodRecord {
        FoodDraft {
            name: "Burger".to_string(),
            calories: 500,
            protein: 25.0,
            carbs: 40.0,
            fat: 20.0,
            timestamp: Utc::now(),
            assumption: None,
        }
        .commit()
    }

    #[tokio::test]
    async fn test_low_confidence_retries_then_forces_commit() {
        let orchestrator = with_primary(ScriptedExtractor { confidence: 0.3 });
        let mut session = RetrySession::new();

        for expected_attempt in 1..=2 {
            match orchestrator.process("some soup", &mut session).await {
                ExtractionOutcome::Retry { prompt, attempt, .. } => {
                    assert_eq!(attempt, expected_attempt);
                    assert_eq!(prompt, format!("{} which soup?", CLARIFICATION_PROMPT));
                }
                other => panic!("expected retry, got {:?}", other),
            }
        }

        match orchestrator.process("some soup", &mut session).await {
            ExtractionOutcome::Commit { result, forced } => {
                assert!(forced);
                assert_eq!(result.drafts.len(), 1);
            }
            other => panic!("expected commit, got {:?}", other),
        }
        assert_eq!(session.attempt(), 0);
        assert_eq!(session.state(), RetryState::Committed);
    }

    #[tokio::test]
    async fn test_remote_failure_falls_back_silently() {
        let orchestrator = with_primary(FailingExtractor);
        let mut session = RetrySession::new();

        match orchestrator.process("a big mac", &mut session).await {
            ExtractionOutcome::Commit { result, forced } => {
                assert!(!forced);
                assert_eq!(result.drafts[0].name, "Big Mac");
                assert_eq!(result.confidence, 0.8);
            }
            other => panic!("expected commit, got {:?}", other),
        }

        let journal = orchestrator.journal().entries().await;
        assert!(journal.iter().any(|e| e.kind == InteractionKind::Fallback));
    }

    #[tokio::test]
    async fn test_remote_timeout_falls_back() {
        let orchestrator =
            with_primary(SlowExtractor).with_remote_timeout(Duration::from_millis(20));

        let result = orchestrator.extract("a bagel", 0).await.unwrap();
        assert_eq!(result.drafts[0].name, "Bagel with Cream Cheese");
    }

    #[tokio::test]
    async fn test_failure_when_fallback_fails_leaves_session() {
        let orchestrator =
            ParsingOrchestrator::new(Some(Arc::new(FailingExtractor)), Arc::new(FailingExtractor));
        let mut session = RetrySession::new();
        session.record(0.1, None);

        let outcome = orchestrator.process("anything", &mut session).await;
        assert_eq!(
            outcome,
            ExtractionOutcome::Failed {
                message: NOT_UNDERSTOOD_MESSAGE.to_string()
            }
        );
        assert_eq!(session.attempt(), 1);
        assert_eq!(session.state(), RetryState::Attempted(1));
    }

    #[tokio::test]
    async fn test_failure_keeps_finished_chain_state() {
        let orchestrator =
            ParsingOrchestrator::new(Some(Arc::new(FailingExtractor)), Arc::new(FailingExtractor));
        let mut session = RetrySession::new();
        session.record(0.9, None);
        assert_eq!(session.state(), RetryState::Committed);

        let outcome = orchestrator.process("anything", &mut session).await;
        assert!(matches!(outcome, ExtractionOutcome::Failed { .. }));
        assert_eq!(session.state(), RetryState::Committed);

        session.abandon();
        orchestrator.process("anything", &mut session).await;
        assert_eq!(session.state(), RetryState::Abandoned);
    }

    #[tokio::test]
    async fn test_abandoned_call_does_not_count_as_attempt() {
        let orchestrator = with_primary(SlowExtractor);
        let mut session = RetrySession::new();
        session.record(0.1, None);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            orchestrator.process("some soup", &mut session),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(session.attempt(), 1);
    }

    #[tokio::test]
    async fn test_edit_prefers_remote_and_falls_back_to_rules() {
        let original = burger();

        let remote = with_primary(ScriptedExtractor { confidence: 0.9 });
        let outcome = remote.edit(&original, "whatever").await;
        assert_eq!(outcome.record().name, "Remote Soup");
        assert_eq!(outcome.record().id(), original.id());

        let fallback = with_primary(FailingExtractor);
        let outcome = fallback.edit(&original, "with cheese").await;
        assert_eq!(outcome.record(), &apply_edit(&original, "with cheese"));
        assert!(outcome.is_changed());

        let unchanged = ParsingOrchestrator::rule_based()
            .edit(&original, "looks good")
            .await;
        assert_eq!(
            unchanged,
            EditOutcome::Unchanged {
                record: original.clone()
            }
        );
    }
}
