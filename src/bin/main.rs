use nutrition_tracker::{
    edit::EditOutcome, LogOutcome, NutritionTracker, TrackerConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const USAGE: &str = "usage: tracker <meal description>\n       tracker edit <record-id> <instruction>\n       tracker list";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{}", USAGE);
        std::process::exit(2);
    }

    let config = TrackerConfig::from_env()?;
    let tracker = NutritionTracker::from_config(&config).await?;
    info!(extractor = ?config.extractor, "Nutrition tracker starting");

    match args[0].as_str() {
        "list" => {
            for record in tracker.records().await {
                println!(
                    "{}  {}  {} kcal  P{:.1} C{:.1} F{:.1}  {}",
                    record.id(),
                    record.timestamp.to_rfc3339(),
                    record.calories,
                    record.protein,
                    record.carbs,
                    record.fat,
                    record.name
                );
            }
        }
        "edit" => {
            let (Some(id), true) = (args.get(1), args.len() > 2) else {
                eprintln!("{}", USAGE);
                std::process::exit(2);
            };
            let id = Uuid::parse_str(id)?;
            let instruction = args[2..].join(" ");

            match tracker.edit_record(id, &instruction).await? {
                EditOutcome::Updated { record, summary } => {
                    println!("{}", summary);
                    println!("{} now {} kcal", record.name, record.calories);
                }
                EditOutcome::Unchanged { record } => {
                    println!("No change to {}", record.name);
                }
            }
        }
        _ => {
            let text = args.join(" ");
            match tracker.log_meal(&text).await? {
                LogOutcome::Logged {
                    records,
                    message,
                    caveat,
                } => {
                    println!("{}", message);
                    for record in &records {
                        match &record.note {
                            Some(note) => println!("  - {} ({} kcal): {}", record.name, record.calories, note),
                            None => println!("  - {} ({} kcal)", record.name, record.calories),
                        }
                    }
                    if let Some(caveat) = caveat {
                        println!("{}", caveat);
                    }
                }
                LogOutcome::NeedsClarification { prompt, attempt } => {
                    println!("{} (attempt {})", prompt, attempt);
                }
                LogOutcome::NotUnderstood { message } => {
                    println!("{}", message);
                }
            }
        }
    }

    let totals = tracker.today_totals().await;
    println!(
        "\nToday: {} kcal, {:.0}g protein, {:.0}g carbs, {:.0}g fat",
        totals.calories, totals.protein, totals.carbs, totals.fat
    );

    Ok(())
}
