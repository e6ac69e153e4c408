use nutrition_tracker::audit::InteractionKind;
use nutrition_tracker::extraction::RuleBasedExtractor;
use nutrition_tracker::{edit::apply_edit, aggregation, LogOutcome, NutritionTracker, TrackerConfig};
use chrono::{FixedOffset, TimeZone, Timelike};
use std::collections::HashMap;

fn config_for(dir: &std::path::Path, extra: &[(&str, &str)]) -> TrackerConfig {
    let mut vars: HashMap<String, String> = HashMap::new();
    vars.insert(
        "NUTRITION_DATA_DIR".to_string(),
        dir.to_string_lossy().into_owned(),
    );
    for (key, value) in extra {
        vars.insert(key.to_string(), value.to_string());
    }
    TrackerConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

fn logged(outcome: LogOutcome) -> Vec<nutrition_tracker::FoodRecord> {
    match outcome {
        LogOutcome::Logged { records, .. } => records,
        other => panic!("expected logged, got {:?}", other),
    }
}

#[test]
fn test_fallback_big_mac_and_medium_fries() {
    let result = RuleBasedExtractor::new().extract_fallback("I had a Big Mac and medium fries");

    let summary: Vec<(&str, u32)> = result
        .drafts
        .iter()
        .map(|d| (d.name.as_str(), d.calories))
        .collect();
    assert_eq!(summary, vec![("Big Mac", 563), ("Medium Fries", 333)]);
}

#[tokio::test]
async fn test_make_it_large_rounds_half_up() {
    let tracker = NutritionTracker::in_memory();
    let records = logged(tracker.log_meal("fries").await.unwrap());
    let fries = &records[0];
    assert_eq!(fries.calories, 333);

    let edited = apply_edit(fries, "make it large");
    assert_eq!(edited.calories, 500);
    assert_eq!(edited.name, "Large Fries");
    assert_eq!(edited.id(), fries.id());
}

#[test]
fn test_series_is_always_full_length() {
    let week = aggregation::series(&[], 7);
    assert_eq!(week.len(), 7);
    assert!(week.iter().all(|d| d.calories == 0));
}

#[tokio::test]
async fn test_records_survive_reload() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(dir.path(), &[("NUTRITION_EXTRACTOR", "rules")]);

    let first_id = {
        let tracker = NutritionTracker::from_config(&config).await.unwrap();
        let records = logged(tracker.log_meal("a bagel and a diet coke").await.unwrap());
        assert_eq!(records.len(), 2);
        tracker.edit_record(records[0].id(), "with cheese").await.unwrap();
        tracker.delete_record(records[1].id()).await.unwrap();
        records[0].id()
    };

    let reopened = NutritionTracker::from_config(&config).await.unwrap();
    let records = reopened.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id(), first_id);
    assert_eq!(records[0].name, "Bagel with Cream Cheese with cheese");
    assert_eq!(records[0].calories, 480);
    assert!(dir.path().join("food_records.json").exists());
}

#[tokio::test]
async fn test_unreachable_remote_falls_back_to_rules() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_for(
        dir.path(),
        &[
            ("ANTHROPIC_API_KEY", "test-key"),
            ("NUTRITION_API_BASE_URL", "http://127.0.0.1:9"),
            ("NUTRITION_REQUEST_TIMEOUT_SECS", "2"),
        ],
    );

    let tracker = NutritionTracker::from_config(&config).await.unwrap();
    let records = logged(tracker.log_meal("Big Mac").await.unwrap());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].calories, 563);

    let journal = tracker.journal().entries().await;
    assert!(journal.iter().any(|e| e.kind == InteractionKind::Fallback));
}

#[tokio::test]
async fn test_unknown_food_gets_generic_estimate() {
    let tracker = NutritionTracker::in_memory();
    let records = logged(tracker.log_meal("a bowl of mystery stew").await.unwrap());

    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].assumption.as_deref(),
        Some("could not parse specific food, using generic estimate")
    );
    assert_eq!(tracker.today_totals().await.calories, u64::from(records[0].calories));
}

#[test]
fn test_yesterday_breakfast_pins_every_draft() {
    let zone = FixedOffset::east_opt(2 * 3600).unwrap();
    let now = zone.with_ymd_and_hms(2024, 3, 1, 19, 45, 0).unwrap();

    let result = RuleBasedExtractor::new()
        .extract_at("yesterday for breakfast I had a bagel and a diet coke", &now);
    assert_eq!(result.drafts.len(), 2);

    for draft in &result.drafts {
        let local = draft.timestamp.with_timezone(&zone);
        assert_eq!(local.date_naive(), chrono::NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!((local.hour(), local.minute()), (8, 0));
    }
}
