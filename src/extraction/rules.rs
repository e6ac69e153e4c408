//! Rule-based extractor
//!
//! Deterministic phrase matching against a table of known foods. Total: it
//! never fails and always yields at least one draft, so it is both the
//! offline strategy and the safety net behind the remote service.

use crate::edit::apply_edit;
use crate::error::TrackerError;
use crate::extraction::{ExtractionRequest, Extractor};
use crate::models::{ExtractionResult, FoodDraft, FoodRecord};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Days, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Fixed confidence of every rule-based result, whatever matched.
pub const FALLBACK_CONFIDENCE: f64 = 0.8;

pub const GENERIC_FOOD_NAME: &str = "Unrecognized food";
pub const GENERIC_ASSUMPTION: &str = "could not parse specific food, using generic estimate";

const GENERIC_NUTRITION: Nutrition = Nutrition {
    calories: 200,
    protein: 10.0,
    carbs: 20.0,
    fat: 8.0,
};

/// Placeholder in a sized rule's assumption, replaced with the portion label
const SIZE_PLACEHOLDER: &str = "{size}";

/// Phrases that end the qualifier window in front of a matched food
const CLAUSE_BOUNDARIES: &[&str] = &[",", ";", ".", " and ", " with ", " plus ", " then "];

const BREAKFAST_HOUR: u32 = 8;

//
// ================= Rule Table =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Nutrition {
    pub calories: u32,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Portion {
    Medium,
    Large,
}

impl Portion {
    fn label(self) -> &'static str {
        match self {
            Portion::Medium => "Medium",
            Portion::Large => "Large",
        }
    }
}

/// One known food. A rule with a `large` row is sized: its draft name gets a
/// portion prefix and `nutrition` is the medium row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoodRule {
    pub name: String,
    /// Lowercase phrases; any of them triggers the rule
    pub triggers: Vec<String>,
    pub nutrition: Nutrition,
    #[serde(default)]
    pub large: Option<Nutrition>,
    pub assumption: String,
}

impl FoodRule {
    pub fn new(name: &str, triggers: &[&str], nutrition: Nutrition, assumption: &str) -> Self {
        Self {
            name: name.to_string(),
            triggers: triggers.iter().map(|t| t.to_lowercase()).collect(),
            nutrition,
            large: None,
            assumption: assumption.to_string(),
        }
    }

    pub fn with_large(mut self, large: Nutrition) -> Self {
        self.large = Some(large);
        self
    }

    /// Byte offset of the earliest trigger in `lowered`
    fn find_in(&self, lowered: &str) -> Option<usize> {
        self.triggers
            .iter()
            .filter(|t| !t.is_empty())
            .filter_map(|t| lowered.find(t.as_str()))
            .min()
    }

    fn draft(&self, portion: Option<Portion>, timestamp: DateTime<Utc>) -> FoodDraft {
        let (name, nutrition, assumption) = match (portion, self.large) {
            (Some(portion), Some(large)) => {
                let nutrition = match portion {
                    Portion::Large => large,
                    Portion::Medium => self.nutrition,
                };
                (
                    format!("{} {}", portion.label(), self.name),
                    nutrition,
                    self.assumption.replace(SIZE_PLACEHOLDER, portion.label()),
                )
            }
            _ => (self.name.clone(), self.nutrition, self.assumption.clone()),
        };

        build_draft(name, nutrition, assumption, timestamp)
    }
}

/// Built-in rule table
pub fn default_rules() -> Vec<FoodRule> {
    vec![
        FoodRule::new(
            "Big Mac",
            &["big mac"],
            Nutrition { calories: 563, protein: 26.0, carbs: 45.0, fat: 33.0 },
            "Standard McDonald's Big Mac",
        ),
        FoodRule::new(
            "Fries",
            &["fries", "french fries"],
            Nutrition { calories: 333, protein: 4.0, carbs: 43.0, fat: 16.0 },
            "McDonald's {size} fries",
        )
        .with_large(Nutrition { calories: 444, protein: 5.0, carbs: 57.0, fat: 22.0 }),
        FoodRule::new(
            "Diet Coke",
            &["diet coke", "diet cola"],
            Nutrition { calories: 0, protein: 0.0, carbs: 0.0, fat: 0.0 },
            "Standard diet cola",
        ),
        FoodRule::new(
            "Egg Sandwich",
            &["egg"],
            Nutrition { calories: 320, protein: 18.0, carbs: 28.0, fat: 14.0 },
            "Standard egg sandwich with bread",
        ),
        FoodRule::new(
            "Bagel with Cream Cheese",
            &["bagel"],
            Nutrition { calories: 380, protein: 13.0, carbs: 56.0, fat: 11.0 },
            "Plain bagel with 2 tbsp cream cheese",
        ),
    ]
}

/// Load extra rules from a JSON array of `FoodRule`
pub fn load_rules(path: &Path) -> Result<Vec<FoodRule>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        TrackerError::ConfigError(format!(
            "Failed to read food rules from {}: {}",
            path.display(),
            e
        ))
    })?;

    let mut rules: Vec<FoodRule> = serde_json::from_str(&contents)?;
    for rule in &mut rules {
        rule.triggers = rule.triggers.iter().map(|t| t.to_lowercase()).collect();
    }

    Ok(rules)
}

//
// ================= Extractor =================
//

/// Phrase-matching extractor over an extensible rule table
#[derive(Debug, Clone)]
pub struct RuleBasedExtractor {
    rules: Vec<FoodRule>,
}

impl RuleBasedExtractor {
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    pub fn with_rules(rules: Vec<FoodRule>) -> Self {
        Self { rules }
    }

    /// Append rules after the existing table
    pub fn extend_rules(&mut self, rules: impl IntoIterator<Item = FoodRule>) {
        self.rules.extend(rules);
    }

    /// Extract against the local clock
    pub fn extract_fallback(&self, text: &str) -> ExtractionResult {
        self.extract_at(text, &Local::now())
    }

    /// Extract with an explicit "now". Temporal qualifiers resolve in `now`'s
    /// time zone.
    pub fn extract_at<Tz: TimeZone>(&self, text: &str, now: &DateTime<Tz>) -> ExtractionResult {
        let lowered = text.to_lowercase();
        let timestamp = pin_timestamp(&lowered, now);

        let mut drafts: Vec<FoodDraft> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let position = rule.find_in(&lowered)?;
                let portion = rule
                    .large
                    .map(|_| portion_before(&lowered, position).unwrap_or(Portion::Medium));
                debug!(rule = %rule.name, position, ?portion, "Food rule matched");
                Some(rule.draft(portion, timestamp))
            })
            .collect();

        if drafts.is_empty() {
            drafts.push(build_draft(
                GENERIC_FOOD_NAME.to_string(),
                GENERIC_NUTRITION,
                GENERIC_ASSUMPTION.to_string(),
                timestamp,
            ));
        }

        let count = drafts.len();
        info!(items = count, "Rule-based extraction complete");

        ExtractionResult {
            drafts,
            confidence: FALLBACK_CONFIDENCE,
            note: Some(format!(
                "Estimated {} item{} from typical values",
                count,
                if count == 1 { "" } else { "s" }
            )),
        }
    }
}

impl Default for RuleBasedExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for RuleBasedExtractor {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult> {
        let now = request.current_time.with_timezone(&Local);
        Ok(self.extract_at(&request.raw_text, &now))
    }

    async fn edit(&self, original: &FoodRecord, instruction: &str) -> Result<FoodRecord> {
        Ok(apply_edit(original, instruction))
    }
}

fn build_draft(
    name: String,
    nutrition: Nutrition,
    assumption: String,
    timestamp: DateTime<Utc>,
) -> FoodDraft {
    FoodDraft {
        name,
        calories: nutrition.calories,
        protein: nutrition.protein,
        carbs: nutrition.carbs,
        fat: nutrition.fat,
        timestamp,
        assumption: Some(assumption),
    }
}

/// Size qualifier inside the clause that ends at `position`. Scoped to the
/// clause so a qualifier never leaks onto a different food.
fn portion_before(lowered: &str, position: usize) -> Option<Portion> {
    let prefix = &lowered[..position];
    let clause_start = CLAUSE_BOUNDARIES
        .iter()
        .filter_map(|b| prefix.rfind(b).map(|i| i + b.len()))
        .max()
        .unwrap_or(0);

    let clause = &prefix[clause_start..];
    if clause.contains("large") {
        Some(Portion::Large)
    } else if clause.contains("medium") {
        Some(Portion::Medium)
    } else {
        None
    }
}

/// "yesterday" moves one calendar day back at the same wall time;
/// "breakfast" pins 08:00 on the resulting day.
fn pin_timestamp<Tz: TimeZone>(lowered: &str, now: &DateTime<Tz>) -> DateTime<Utc> {
    let mut at = now.clone();

    if lowered.contains("yesterday") {
        if let Some(previous) = now.clone().checked_sub_days(Days::new(1)) {
            at = previous;
        }
    }

    if lowered.contains("breakfast") {
        let pinned = at
            .date_naive()
            .and_hms_opt(BREAKFAST_HOUR, 0, 0)
            .and_then(|naive| now.timezone().from_local_datetime(&naive).earliest());
        if let Some(pinned) = pinned {
            at = pinned;
        }
    }

    at.with_timezone(&Utc)
}
