//! Core data models for the nutrition tracker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//
// ================= Food Record =================
//

/// A committed food log entry.
///
/// The `id` is assigned once, when a draft is committed, and is carried
/// unchanged through every edit. It has no setter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FoodRecord {
    id: Uuid,
    pub name: String,
    pub calories: u32,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub timestamp: DateTime<Utc>,
    /// Absent and present-but-empty are distinct: `None` is omitted from the
    /// encoding, `Some("")` is written as `""`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assumption: Option<String>,
}

impl FoodRecord {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Protein + carbs + fat in grams. Derived, never stored.
    pub fn total_macros(&self) -> f64 {
        self.protein + self.carbs + self.fat
    }

    /// Rebuild a record from a draft under an existing identity.
    /// Used when an edit comes back as a fresh draft.
    pub(crate) fn from_draft_with_id(id: Uuid, draft: FoodDraft, note: Option<String>) -> Self {
        Self {
            id,
            name: draft.name,
            calories: draft.calories,
            protein: draft.protein,
            carbs: draft.carbs,
            fat: draft.fat,
            timestamp: draft.timestamp,
            note,
            assumption: draft.assumption,
        }
    }
}

//
// ================= Draft =================
//

/// An extracted food record before it is committed. No id yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FoodDraft {
    pub name: String,
    pub calories: u32,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assumption: Option<String>,
}

impl FoodDraft {
    /// Commit the draft under a fresh identity. The assumption doubles as the
    /// record's note.
    pub fn commit(self) -> FoodRecord {
        let note = self.assumption.clone();
        FoodRecord::from_draft_with_id(Uuid::new_v4(), self, note)
    }
}

//
// ================= Extraction =================
//

/// Ordered candidate drafts with a self-reported confidence in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionResult {
    pub drafts: Vec<FoodDraft>,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ExtractionResult {
    pub fn total_calories(&self) -> u64 {
        self.drafts.iter().map(|d| u64::from(d.calories)).sum()
    }

    pub fn total_protein(&self) -> f64 {
        self.drafts.iter().map(|d| d.protein).sum()
    }
}

//
// ================= Edit =================
//

/// Free text targeting exactly one existing record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditInstruction {
    pub record_id: Uuid,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_draft(assumption: Option<&str>) -> FoodDraft {
        FoodDraft {
            name: "Big Mac".to_string(),
            calories: 563,
            protein: 26.0,
            carbs: 45.0,
            fat: 33.0,
            timestamp: Utc::now(),
            assumption: assumption.map(str::to_string),
        }
    }

    #[test]
    fn test_commit_assigns_identity_and_note() {
        let first = sample_draft(Some("Standard McDonald's Big Mac")).commit();
        let second = sample_draft(None).commit();

        assert_ne!(first.id(), second.id());
        assert_eq!(first.note.as_deref(), Some("Standard McDonald's Big Mac"));
        assert_eq!(first.assumption, first.note);
        assert!(second.note.is_none());
    }

    #[test]
    fn test_total_macros_is_derived() {
        let record = sample_draft(None).commit();
        assert_eq!(record.total_macros(), 104.0);

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("total_macros").is_none());
    }

    #[test]
    fn test_optional_fields_distinguish_absent_and_empty() {
        let mut record = sample_draft(None).commit();
        record.note = Some(String::new());

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"note\":\"\""));
        assert!(!json.contains("assumption"));

        let decoded: FoodRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.note, Some(String::new()));
        assert_eq!(decoded.assumption, None);
        assert_eq!(decoded, record);
    }
}
