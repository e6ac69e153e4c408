//! REST API Server for the nutrition tracker
//!
//! Exposes meal logging, record management and totals over HTTP

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::TrackerError;
use crate::models::{EditInstruction, FoodDraft, FoodRecord};
use crate::tracker::NutritionTracker;

const DEFAULT_SERIES_DAYS: u32 = 7;
const MAX_SERIES_DAYS: u32 = 366;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct LogMealRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct EditRequest {
    pub instruction: String,
}

/// Hand-entered record; timestamp defaults to now
#[derive(Debug, Deserialize)]
pub struct ManualRecordRequest {
    pub name: String,
    pub calories: u32,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub carbs: f64,
    #[serde(default)]
    pub fat: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

/// Partial correction of a stored record. Omitted fields keep their value.
#[derive(Debug, Default, Deserialize)]
pub struct RecordPatch {
    pub name: Option<String>,
    pub calories: Option<u32>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeriesParams {
    pub days: Option<u32>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failure(err: TrackerError) -> ApiResult {
    let status = match &err {
        TrackerError::RecordNotFound(_) => StatusCode::NOT_FOUND,
        TrackerError::InvalidInput(_) | TrackerError::UuidError(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!("Request failed: {}", err);
    }
    (status, Json(ApiResponse::error(err.to_string())))
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub tracker: Arc<NutritionTracker>,
}

fn parse_id(raw: &str) -> Result<Uuid, TrackerError> {
    Ok(Uuid::parse_str(raw)?)
}

fn check_macro(label: &str, value: f64) -> Result<f64, TrackerError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(TrackerError::InvalidInput(format!(
            "{} must be a non-negative number",
            label
        )))
    }
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Meal Endpoints
/// =============================

async fn log_meal(
    State(state): State<ApiState>,
    Json(req): Json<LogMealRequest>,
) -> ApiResult {
    info!("Received meal: {}", req.text);

    match state.tracker.log_meal(&req.text).await {
        Ok(outcome) => ok(outcome),
        Err(e) => failure(e),
    }
}

async fn abandon(State(state): State<ApiState>) -> ApiResult {
    state.tracker.abandon().await;
    ok(state.tracker.session_state().await)
}

/// =============================
/// Record Endpoints
/// =============================

async fn list_records(State(state): State<ApiState>) -> ApiResult {
    ok(state.tracker.records().await)
}

async fn add_record(
    State(state): State<ApiState>,
    Json(req): Json<ManualRecordRequest>,
) -> ApiResult {
    let draft = match manual_draft(req) {
        Ok(draft) => draft,
        Err(e) => return failure(e),
    };

    let record = state.tracker.add_record(draft).await;
    (StatusCode::CREATED, Json(ApiResponse::success(record)))
}

fn manual_draft(req: ManualRecordRequest) -> Result<FoodDraft, TrackerError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(TrackerError::InvalidInput("name is empty".to_string()));
    }

    Ok(FoodDraft {
        name,
        calories: req.calories,
        protein: check_macro("protein", req.protein)?,
        carbs: check_macro("carbs", req.carbs)?,
        fat: check_macro("fat", req.fat)?,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
        assumption: req.note,
    })
}

async fn update_record(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(patch): Json<RecordPatch>,
) -> ApiResult {
    match apply_patch(&state.tracker, &id, patch).await {
        Ok(record) => ok(record),
        Err(e) => failure(e),
    }
}

async fn apply_patch(
    tracker: &NutritionTracker,
    id: &str,
    patch: RecordPatch,
) -> Result<FoodRecord, TrackerError> {
    let id = parse_id(id)?;
    tracker
        .patch_record(id, move |current| patch.apply_to(current))
        .await
}

impl RecordPatch {
    fn apply_to(self, current: &FoodRecord) -> Result<FoodRecord, TrackerError> {
        let mut record = current.clone();

        if let Some(name) = self.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(TrackerError::InvalidInput("name is empty".to_string()));
            }
            record.name = name;
        }
        if let Some(calories) = self.calories {
            record.calories = calories;
        }
        if let Some(protein) = self.protein {
            record.protein = check_macro("protein", protein)?;
        }
        if let Some(carbs) = self.carbs {
            record.carbs = check_macro("carbs", carbs)?;
        }
        if let Some(fat) = self.fat {
            record.fat = check_macro("fat", fat)?;
        }
        if let Some(timestamp) = self.timestamp {
            record.timestamp = timestamp;
        }
        if self.note.is_some() {
            record.note = self.note;
        }

        Ok(record)
    }
}

async fn delete_record(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    let result = match parse_id(&id) {
        Ok(id) => state.tracker.delete_record(id).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(record) => ok(record),
        Err(e) => failure(e),
    }
}

async fn edit_record(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(req): Json<EditRequest>,
) -> ApiResult {
    let record_id = match parse_id(&id) {
        Ok(id) => id,
        Err(e) => return failure(e),
    };
    info!("Edit for {}: {}", record_id, req.instruction);

    let instruction = EditInstruction {
        record_id,
        text: req.instruction,
    };
    match state.tracker.apply_instruction(&instruction).await {
        Ok(outcome) => ok(outcome),
        Err(e) => failure(e),
    }
}

/// =============================
/// Totals Endpoints
/// =============================

async fn today_totals(State(state): State<ApiState>) -> ApiResult {
    ok(state.tracker.today_totals().await)
}

async fn series(State(state): State<ApiState>, Query(params): Query<SeriesParams>) -> ApiResult {
    match window_days(&params) {
        Ok(days) => ok(state.tracker.daily_calories(days).await),
        Err(e) => failure(e),
    }
}

fn window_days(params: &SeriesParams) -> Result<u32, TrackerError> {
    let days = params.days.unwrap_or(DEFAULT_SERIES_DAYS);
    if days > MAX_SERIES_DAYS {
        return Err(TrackerError::InvalidInput(format!(
            "days must be at most {}",
            MAX_SERIES_DAYS
        )));
    }
    Ok(days)
}

async fn macro_totals(
    State(state): State<ApiState>,
    Query(params): Query<SeriesParams>,
) -> ApiResult {
    match window_days(&params) {
        Ok(days) => ok(state.tracker.period_totals(days).await),
        Err(e) => failure(e),
    }
}

async fn interactions(State(state): State<ApiState>) -> ApiResult {
    ok(state.tracker.journal().entries().await)
}

async fn export_interactions(State(state): State<ApiState>) -> String {
    state.tracker.journal().export().await
}

/// =============================
/// Router
/// =============================

pub fn create_router(tracker: Arc<NutritionTracker>) -> Router {
    let state = ApiState { tracker };

    Router::new()
        .route("/health", get(health))
        .route("/api/meals", post(log_meal))
        .route("/api/meals/abandon", post(abandon))
        .route("/api/records", get(list_records).post(add_record))
        .route("/api/records/:id", put(update_record).delete(delete_record))
        .route("/api/records/:id/edit", post(edit_record))
        .route("/api/totals/today", get(today_totals))
        .route("/api/totals/series", get(series))
        .route("/api/totals/macros", get(macro_totals))
        .route("/api/interactions", get(interactions))
        .route("/api/interactions/export", get(export_interactions))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    tracker: Arc<NutritionTracker>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(tracker);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
