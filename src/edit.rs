//! Edit delta interpreter
//!
//! Deterministic grammar that turns a free-form edit instruction into a delta
//! against one existing record. Rule groups run in a fixed order:
//! size, calorie adjustment, ingredient addition, ingredient removal. Within
//! a group the first matching trigger wins. Every applied rule overwrites the
//! assumption note, so the last group to fire owns it.
//!
//! Total: an instruction that matches nothing yields an unchanged copy.

use crate::models::FoodRecord;
use serde::{Deserialize, Serialize};
use tracing::debug;

const LARGE_FACTOR: f64 = 1.5;
const SMALL_FACTOR: f64 = 0.75;
const EXTRA_FACTOR: f64 = 1.2;
const REMOVAL_CALORIE_FACTOR: f64 = 0.9;
const REMOVAL_FAT_FACTOR: f64 = 0.8;

const CHEESE_CALORIES: u32 = 100;
const CHEESE_PROTEIN: f64 = 6.0;
const CHEESE_FAT: f64 = 8.0;

/// Apply `instruction` to a copy of `original`. The copy keeps `original`'s id.
pub fn apply_edit(original: &FoodRecord, instruction: &str) -> FoodRecord {
    let lowered = instruction.to_lowercase();
    let has = |trigger: &str| lowered.contains(trigger);

    let mut edited = original.clone();

    // Size
    if has("large") {
        scale_macros(&mut edited, LARGE_FACTOR);
        edited.name = large_name(&edited.name);
        edited.assumption = Some("Adjusted to large portion size (1.5x)".to_string());
    } else if has("small") {
        scale_macros(&mut edited, SMALL_FACTOR);
        edited.name = format!("Small {}", edited.name);
        edited.assumption = Some("Adjusted to small portion size (0.75x)".to_string());
    }

    // Calorie adjustment
    if has("add 100") {
        edited.calories = edited.calories.saturating_add(100);
        edited.assumption = Some("Added 100 calories as requested".to_string());
    } else if has("add 200") {
        edited.calories = edited.calories.saturating_add(200);
        edited.assumption = Some("Added 200 calories as requested".to_string());
    } else if (has("remove") || has("subtract")) && has("100") {
        edited.calories = edited.calories.saturating_sub(100);
        edited.assumption = Some("Removed 100 calories as requested".to_string());
    }

    // Ingredient addition
    if has("with cheese") {
        edited.calories = edited.calories.saturating_add(CHEESE_CALORIES);
        edited.protein += CHEESE_PROTEIN;
        edited.fat += CHEESE_FAT;
        edited.name.push_str(" with cheese");
        edited.assumption = Some("Added cheese (+100 cal, +6g protein, +8g fat)".to_string());
    } else if has("with extra") {
        edited.calories = scale_calories(edited.calories, EXTRA_FACTOR);
        edited.name.push_str(" (extra)");
        edited.assumption = Some("Added extra portions (+20%)".to_string());
    }

    // Ingredient removal
    if has("without") || has("no sauce") || has("no mayo") {
        edited.calories = scale_calories(edited.calories, REMOVAL_CALORIE_FACTOR);
        edited.fat *= REMOVAL_FAT_FACTOR;
        edited.assumption =
            Some("Removed sauce/condiments (-10% calories, -20% fat)".to_string());
    }

    debug!(
        record_id = %original.id(),
        from = %original.name,
        to = %edited.name,
        calories = edited.calories,
        "Edit interpreted"
    );

    edited
}

/// Round half up. Calories are never negative here, so `f64::round` is exact.
fn scale_calories(calories: u32, factor: f64) -> u32 {
    (f64::from(calories) * factor).round() as u32
}

fn scale_macros(record: &mut FoodRecord, factor: f64) {
    record.calories = scale_calories(record.calories, factor);
    record.protein *= factor;
    record.carbs *= factor;
    record.fat *= factor;
}

/// Fries already carrying a size get it swapped; anything else is prefixed.
fn large_name(name: &str) -> String {
    if name.to_lowercase().contains("fries") && name.contains("Medium") {
        name.replace("Medium", "Large")
    } else {
        format!("Large {}", name)
    }
}

//
// ================= Outcome =================
//

/// Result of an edit as reported to the caller
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EditOutcome {
    Updated { record: FoodRecord, summary: String },
    /// Nothing matched; the record is returned as it was.
    Unchanged { record: FoodRecord },
}

impl EditOutcome {
    pub fn from_records(original: &FoodRecord, edited: FoodRecord) -> Self {
        if &edited == original {
            EditOutcome::Unchanged { record: edited }
        } else {
            let summary = summarize_edit(original, &edited);
            EditOutcome::Updated {
                record: edited,
                summary,
            }
        }
    }

    pub fn record(&self) -> &FoodRecord {
        match self {
            EditOutcome::Updated { record, .. } | EditOutcome::Unchanged { record } => record,
        }
    }

    pub fn is_changed(&self) -> bool {
        matches!(self, EditOutcome::Updated { .. })
    }
}

/// Human-readable list of what changed between two versions of a record
pub fn summarize_edit(original: &FoodRecord, edited: &FoodRecord) -> String {
    let mut changes = Vec::new();

    if original.name != edited.name {
        changes.push(format!("updated to {}", edited.name));
    }

    let calorie_delta = i64::from(edited.calories) - i64::from(original.calories);
    if calorie_delta != 0 {
        changes.push(format!("{:+} cal", calorie_delta));
    }

    let protein_delta = (edited.protein - original.protein).trunc() as i64;
    if protein_delta != 0 {
        changes.push(format!("{:+}g protein", protein_delta));
    }

    if changes.is_empty() {
        format!("updated {}", edited.name)
    } else {
        format!("updated: {}", changes.join(", "))
    }
}
