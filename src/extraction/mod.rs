//! Extractor trait and implementations
//!
//! An extractor turns a meal description into candidate drafts and applies
//! edit instructions to existing records. Two strategies exist: the remote
//! service client and the deterministic rule engine. Configuration picks one
//! as primary; the rule engine always backs it up.

use crate::models::{ExtractionResult, FoodRecord};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod remote;
pub mod rules;

pub use remote::RemoteExtractor;
pub use rules::{FoodRule, Nutrition, RuleBasedExtractor};

/// Request sent to an extractor for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    pub raw_text: String,
    /// Zero-based attempt within the current retry conversation.
    pub attempt_index: u32,
    #[serde(rename = "currentTimeISO8601")]
    pub current_time: DateTime<Utc>,
}

impl ExtractionRequest {
    pub fn new(raw_text: impl Into<String>, attempt_index: u32) -> Self {
        Self {
            raw_text: raw_text.into(),
            attempt_index,
            current_time: Utc::now(),
        }
    }
}

/// Extraction strategy
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short label used in logs and the interaction journal
    fn name(&self) -> &'static str;

    /// Extract candidate drafts from free text
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult>;

    /// Apply a free-form edit to one record. The returned record must carry
    /// `original.id()`.
    async fn edit(&self, original: &FoodRecord, instruction: &str) -> Result<FoodRecord>;
}
