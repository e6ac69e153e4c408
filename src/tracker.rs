//! Nutrition tracker
//!
//! Drives the orchestrator, the retry session and the record store for one
//! logical user. Callers observe progress through returned outcomes and a
//! broadcast channel of events; there is no shared mutable view state.

use crate::aggregation::{self, DailyTotals, DayCalories};
use crate::audit::InteractionLog;
use crate::config::TrackerConfig;
use crate::edit::EditOutcome;
use crate::error::TrackerError;
use crate::models::{EditInstruction, FoodDraft, FoodRecord};
use crate::orchestrator::{ExtractionOutcome, ParsingOrchestrator};
use crate::session::{RetrySession, RetryState};
use crate::store::{BlobStore, FileBlobStore, RecordStore};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::info;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

pub const FORCED_COMMIT_CAVEAT: &str =
    "I wasn't fully sure about this one, so double-check the numbers.";

/// Events emitted after each state change
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    RecordsLogged { records: Vec<FoodRecord>, forced: bool },
    ClarificationRequested { prompt: String, attempt: u32 },
    ParseFailed { message: String },
    RecordUpdated { record: FoodRecord },
    RecordRemoved { record_id: Uuid },
    SessionAbandoned,
}

/// Outcome of logging one utterance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LogOutcome {
    Logged {
        records: Vec<FoodRecord>,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        caveat: Option<String>,
    },
    NeedsClarification { prompt: String, attempt: u32 },
    NotUnderstood { message: String },
}

pub struct NutritionTracker {
    orchestrator: ParsingOrchestrator,
    store: RecordStore,
    session: Mutex<RetrySession>,
    events: broadcast::Sender<TrackerEvent>,
}

impl NutritionTracker {
    pub fn new(orchestrator: ParsingOrchestrator, store: RecordStore) -> Self {
        Self::with_session(orchestrator, store, RetrySession::new())
    }

    pub fn with_session(
        orchestrator: ParsingOrchestrator,
        store: RecordStore,
        session: RetrySession,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            orchestrator,
            store,
            session: Mutex::new(session),
            events,
        }
    }

    /// Rules-only tracker over an in-memory store
    pub fn in_memory() -> Self {
        Self::new(ParsingOrchestrator::rule_based(), RecordStore::in_memory())
    }

    /// Wire everything from configuration, persisting under `data_dir`
    pub async fn from_config(config: &TrackerConfig) -> Result<Self> {
        let orchestrator = ParsingOrchestrator::from_config(config)?;
        let blob: Arc<dyn BlobStore> = Arc::new(FileBlobStore::new(config.data_dir.clone()));
        let store = RecordStore::load(blob).await;
        Ok(Self::with_session(
            orchestrator,
            store,
            RetrySession::with_policy(config.retry_policy),
        ))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn journal(&self) -> &InteractionLog {
        self.orchestrator.journal()
    }

    /// Parse an utterance and commit it unless clarification is needed.
    ///
    /// Calls are serialized on the session. Dropping the returned future while
    /// extraction is in flight commits nothing and does not count as an attempt.
    pub async fn log_meal(&self, text: &str) -> Result<LogOutcome> {
        let text = text.trim();
        if text.is_empty() {
            return Err(TrackerError::InvalidInput("meal description is empty".to_string()));
        }

        info!(text = %text, "Logging meal");

        let mut session = self.session.lock().await;
        let outcome = self.orchestrator.process(text, &mut session).await;

        match outcome {
            ExtractionOutcome::Commit { result, forced } => {
                let message = format!(
                    "Logged {} calories, {}g protein.",
                    result.total_calories(),
                    result.total_protein().trunc() as i64
                );
                let records: Vec<FoodRecord> =
                    result.drafts.into_iter().map(FoodDraft::commit).collect();
                self.store.append_all(records.clone()).await;

                info!(count = records.len(), forced, "Meal committed");
                self.emit(TrackerEvent::RecordsLogged {
                    records: records.clone(),
                    forced,
                });

                Ok(LogOutcome::Logged {
                    records,
                    message,
                    caveat: forced.then(|| FORCED_COMMIT_CAVEAT.to_string()),
                })
            }
            ExtractionOutcome::Retry { prompt, attempt, .. } => {
                self.emit(TrackerEvent::ClarificationRequested {
                    prompt: prompt.clone(),
                    attempt,
                });
                Ok(LogOutcome::NeedsClarification { prompt, attempt })
            }
            ExtractionOutcome::Failed { message } => {
                self.emit(TrackerEvent::ParseFailed {
                    message: message.clone(),
                });
                Ok(LogOutcome::NotUnderstood { message })
            }
        }
    }

    /// Drop the pending clarification chain
    pub async fn abandon(&self) {
        self.session.lock().await.abandon();
        self.emit(TrackerEvent::SessionAbandoned);
    }

    pub async fn session_state(&self) -> RetryState {
        self.session.lock().await.state()
    }

    /// Apply a free-form edit to one stored record.
    ///
    /// The record is read under the session lock so queued edits build on
    /// each other.
    pub async fn edit_record(&self, id: Uuid, instruction: &str) -> Result<EditOutcome> {
        let _session = self.session.lock().await;
        let original = self
            .store
            .get(id)
            .await
            .ok_or(TrackerError::RecordNotFound(id))?;

        let outcome = self.orchestrator.edit(&original, instruction).await;

        if let EditOutcome::Updated { record, summary } = &outcome {
            self.store.replace(id, record.clone()).await?;
            info!(record_id = %id, summary = %summary, "Record edited");
            self.emit(TrackerEvent::RecordUpdated {
                record: record.clone(),
            });
        } else {
            info!(record_id = %id, "Edit matched nothing, record unchanged");
        }

        Ok(outcome)
    }

    pub async fn apply_instruction(&self, instruction: &EditInstruction) -> Result<EditOutcome> {
        self.edit_record(instruction.record_id, &instruction.text).await
    }

    /// Commit a draft typed in by hand, bypassing extraction
    pub async fn add_record(&self, draft: FoodDraft) -> FoodRecord {
        let record = draft.commit();
        self.store.append(record.clone()).await;
        self.emit(TrackerEvent::RecordsLogged {
            records: vec![record.clone()],
            forced: false,
        });
        record
    }

    /// Overwrite a stored record with a manual correction
    pub async fn update_record(&self, record: FoodRecord) -> Result<FoodRecord> {
        self.patch_record(record.id(), move |_| Ok(record)).await
    }

    /// Derive a correction from the current version of a record. Serialized
    /// with edits on the session.
    pub async fn patch_record<F>(&self, id: Uuid, apply: F) -> Result<FoodRecord>
    where
        F: FnOnce(&FoodRecord) -> Result<FoodRecord>,
    {
        let _session = self.session.lock().await;
        let record = self.store.update(id, apply).await?;
        self.emit(TrackerEvent::RecordUpdated {
            record: record.clone(),
        });
        Ok(record)
    }

    pub async fn delete_record(&self, id: Uuid) -> Result<FoodRecord> {
        let removed = self.store.remove(id).await?;
        info!(record_id = %id, name = %removed.name, "Record deleted");
        self.emit(TrackerEvent::RecordRemoved { record_id: id });
        Ok(removed)
    }

    pub async fn records(&self) -> Vec<FoodRecord> {
        self.store.all().await
    }

    pub async fn record(&self, id: Uuid) -> Option<FoodRecord> {
        self.store.get(id).await
    }

    pub async fn today_totals(&self) -> DailyTotals {
        aggregation::today_totals(&self.store.all().await)
    }

    /// Calorie and macro totals over the last `days` calendar days
    pub async fn period_totals(&self, days: u32) -> DailyTotals {
        aggregation::period_totals(&self.store.all().await, days)
    }

    pub async fn daily_calories(&self, days: u32) -> Vec<DayCalories> {
        aggregation::series(&self.store.all().await, days)
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is fine
        if self.events.send(event).is_err() {
            tracing::trace!("No event subscribers");
        }
    }
}

impl Default for NutritionTracker {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractionRequest, Extractor, RuleBasedExtractor};
    use crate::models::ExtractionResult;
    use std::time::Duration;

    /// Remote stand-in whose edits stall, then fail over to the rules
    struct StallingEditor;

    #[async_trait::async_trait]
    impl Extractor for StallingEditor {
        fn name(&self) -> &'static str {
            "stalling"
        }

        async fn extract(&self, _request: &ExtractionRequest) -> Result<ExtractionResult> {
            Err(TrackerError::RemoteUnavailable("offline".to_string()))
        }

        async fn edit(&self, _original: &FoodRecord, _instruction: &str) -> Result<FoodRecord> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(TrackerError::RemoteUnavailable("offline".to_string()))
        }
    }

    fn burger_draft() -> FoodDraft {
        FoodDraft {
            name: "Burger".to_string(),
            calories: 500,
            protein: 25.0,
            carbs: 40.0,
            fat: 20.0,
            timestamp: chrono::Utc::now(),
            assumption: None,
        }
    }

    #[tokio::test]
    async fn test_log_meal_commits_drafts_and_emits() {
        let tracker = NutritionTracker::in_memory();
        let mut events = tracker.subscribe();

        let outcome = tracker
            .log_meal("I had a Big Mac and medium fries")
            .await
            .unwrap();

        match &outcome {
            LogOutcome::Logged { records, message, caveat } => {
                assert_eq!(records.len(), 2);
                assert_eq!(message, "Logged 896 calories, 30g protein.");
                assert!(caveat.is_none());
                assert_eq!(records[0].note, records[0].assumption);
            }
            other => panic!("expected logged, got {:?}", other),
        }

        match events.recv().await.unwrap() {
            TrackerEvent::RecordsLogged { records, forced } => {
                assert_eq!(records.len(), 2);
                assert!(!forced);
            }
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(tracker.records().await.len(), 2);
        assert_eq!(tracker.session_state().await, RetryState::Committed);
    }

    #[tokio::test]
    async fn test_blank_input_is_rejected() {
        let tracker = NutritionTracker::in_memory();
        assert!(matches!(
            tracker.log_meal("   ").await,
            Err(TrackerError::InvalidInput(_))
        ));
        assert!(tracker.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_edit_keeps_identity_and_reports_no_change() {
        let tracker = NutritionTracker::in_memory();
        tracker.log_meal("fries").await.unwrap();
        let original = tracker.records().await.remove(0);

        let outcome = tracker.edit_record(original.id(), "make it large").await.unwrap();
        assert!(outcome.is_changed());
        let stored = tracker.record(original.id()).await.unwrap();
        assert_eq!(stored.name, "Large Fries");
        assert_eq!(stored.calories, 500);
        assert_eq!(stored.id(), original.id());

        let outcome = tracker.edit_record(original.id(), "perfect").await.unwrap();
        assert!(!outcome.is_changed());
        assert_eq!(tracker.record(original.id()).await.unwrap(), stored);

        assert!(matches!(
            tracker.edit_record(Uuid::new_v4(), "large").await,
            Err(TrackerError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_edits_both_apply() {
        let orchestrator = ParsingOrchestrator::new(
            Some(Arc::new(StallingEditor)),
            Arc::new(RuleBasedExtractor::new()),
        );
        let tracker = NutritionTracker::new(orchestrator, RecordStore::in_memory());
        let burger = tracker.add_record(burger_draft()).await;

        let (cheese, extra) = tokio::join!(
            tracker.edit_record(burger.id(), "with cheese"),
            tracker.edit_record(burger.id(), "add 100"),
        );
        assert!(cheese.unwrap().is_changed());
        assert!(extra.unwrap().is_changed());

        let stored = tracker.record(burger.id()).await.unwrap();
        assert_eq!(stored.name, "Burger with cheese");
        assert_eq!(stored.calories, 700);
    }

    #[tokio::test]
    async fn test_patch_builds_on_latest_version() {
        let tracker = NutritionTracker::in_memory();
        let burger = tracker.add_record(burger_draft()).await;

        let bump = |current: &FoodRecord| -> Result<FoodRecord> {
            let mut next = current.clone();
            next.calories += 50;
            Ok(next)
        };
        let (first, second) = tokio::join!(
            tracker.patch_record(burger.id(), bump),
            tracker.patch_record(burger.id(), bump),
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(tracker.record(burger.id()).await.unwrap().calories, 600);

        assert!(matches!(
            tracker.patch_record(Uuid::new_v4(), bump).await,
            Err(TrackerError::RecordNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_add_update_delete() {
        let tracker = NutritionTracker::in_memory();
        let record = tracker
            .add_record(FoodDraft {
                name: "Oatmeal".to_string(),
                calories: 150,
                protein: 5.0,
                carbs: 27.0,
                fat: 3.0,
                timestamp: chrono::Utc::now(),
                assumption: None,
            })
            .await;

        let mut corrected = record.clone();
        corrected.calories = 180;
        tracker.update_record(corrected).await.unwrap();
        assert_eq!(tracker.today_totals().await.calories, 180);

        tracker.delete_record(record.id()).await.unwrap();
        assert!(tracker.records().await.is_empty());
        assert_eq!(tracker.daily_calories(7).await.len(), 7);
    }

    #[tokio::test]
    async fn test_abandon_resets_session() {
        let tracker = NutritionTracker::in_memory();
        let mut events = tracker.subscribe();

        tracker.abandon().await;
        assert_eq!(tracker.session_state().await, RetryState::Abandoned);
        assert_eq!(events.recv().await.unwrap(), TrackerEvent::SessionAbandoned);
    }
}
