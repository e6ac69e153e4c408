use nutrition_tracker::{api::start_server, NutritionTracker, TrackerConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load environment variables
    let config = TrackerConfig::from_env()?;

    if !config.has_valid_api_key() {
        eprintln!("⚠️  ANTHROPIC_API_KEY not set in .env, using rule-based estimates");
    }

    info!("🚀 Nutrition Tracker - API Server");
    info!("📍 Port: {}", config.port);
    info!("📂 Data: {}", config.data_dir.display());

    let tracker = Arc::new(NutritionTracker::from_config(&config).await?);

    info!("✅ Tracker initialized with {} records", tracker.records().await.len());
    info!("📡 Starting API server...");

    start_server(tracker, config.port).await?;

    Ok(())
}
