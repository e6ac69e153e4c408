//! Remote extraction client
//!
//! Talks to a hosted language model over the Anthropic Messages API and
//! holds the reply to the extraction contract. Every failure comes back as
//! `RemoteUnavailable` or `MalformedResponse`; the orchestrator decides what
//! to do with it.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::config::TrackerConfig;
use crate::error::TrackerError;
use crate::extraction::{ExtractionRequest, Extractor};
use crate::models::{ExtractionResult, FoodDraft, FoodRecord};
use crate::session::RetryPolicy;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const EDIT_MAX_TOKENS: u32 = 2500;

/// Reusable extraction client (connection-pooled)
pub struct RemoteExtractor {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    max_attempts: u32,
}

impl RemoteExtractor {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            max_tokens: 1000,
            max_attempts: RetryPolicy::default().max_attempts,
        })
    }

    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let mut extractor = Self::new(
            config.api_key.clone().unwrap_or_default(),
            config.api_base_url.clone(),
            config.model.clone(),
            config.request_timeout,
        )?;
        extractor.max_tokens = config.max_tokens;
        extractor.max_attempts = config.retry_policy.max_attempts;
        Ok(extractor)
    }

    pub fn is_configured(&self) -> bool {
        TrackerConfig::is_valid_api_key(&self.api_key)
    }

    /// Send one message and return the first text block of the reply
    async fn send(&self, system: String, content: String, max_tokens: u32) -> Result<String> {
        if !self.is_configured() {
            return Err(TrackerError::RemoteUnavailable(
                "API key not configured".to_string(),
            ));
        }

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            system,
            messages: vec![Message {
                role: "user".to_string(),
                content,
            }],
        };

        info!(model = %self.model, "Calling extraction service");

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Extraction request failed: {}", e);
                TrackerError::RemoteUnavailable(format!("request failed: {}", e))
            })?;

        let status = response.status();
        info!(status = status.as_u16(), "Extraction service responded");

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Extraction service error response: {}", error_text);
            return Err(TrackerError::RemoteUnavailable(format!(
                "status {}: {}",
                status, error_text
            )));
        }

        let envelope: MessagesResponse = response.json().await.map_err(|e| {
            error!("Failed to decode extraction envelope: {}", e);
            TrackerError::MalformedResponse(format!("envelope: {}", e))
        })?;

        envelope
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .ok_or_else(|| TrackerError::MalformedResponse("no text content".to_string()))
    }
}

#[async_trait]
impl Extractor for RemoteExtractor {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionResult> {
        let system = build_system_prompt(&request.current_time, None);
        let content = format!(
            "{}{}",
            request.raw_text,
            retry_suffix(request.attempt_index, self.max_attempts)
        );

        let text = self.send(system, content, self.max_tokens).await?;
        let result = parse_extraction_payload(&text, request.current_time)?;

        info!(
            items = result.drafts.len(),
            confidence = result.confidence,
            "Remote extraction parsed"
        );
        Ok(result)
    }

    async fn edit(&self, original: &FoodRecord, instruction: &str) -> Result<FoodRecord> {
        let now = Utc::now();
        let system = build_system_prompt(&now, Some(EDIT_PREAMBLE));
        let content = format!(
            "Original Entry:\n- Name: {}\n- Calories: {}\n- Protein: {}g\n- Carbs: {}g\n- Fat: {}g\n- Timestamp: {}\n\nEdit Instruction: \"{}\"",
            original.name,
            original.calories,
            original.protein,
            original.carbs,
            original.fat,
            original.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            instruction,
        );

        let text = self.send(system, content, EDIT_MAX_TOKENS).await?;
        let result = parse_extraction_payload(&text, original.timestamp)?;

        let draft = result
            .drafts
            .into_iter()
            .next()
            .ok_or_else(|| TrackerError::MalformedResponse("no food in edit response".to_string()))?;

        Ok(FoodRecord::from_draft_with_id(
            original.id(),
            draft,
            original.note.clone(),
        ))
    }
}

fn retry_suffix(attempt_index: u32, max_attempts: u32) -> String {
    if attempt_index > 0 {
        format!(
            " (User clarifying - attempt {}/{})",
            attempt_index + 1,
            max_attempts
        )
    } else {
        String::new()
    }
}

const EDIT_PREAMBLE: &str = r#"Apply the user's edit instruction to the existing food entry.

The user will provide:
1. Original food entry data
2. An edit instruction in natural language

Keep the original timestamp unless specifically instructed to change it."#;

/// Build the system prompt carrying the JSON contract and the current time
fn build_system_prompt(now: &DateTime<Utc>, preamble: Option<&str>) -> String {
    let base_prompt = format!(
        r#"You are a nutrition parser that MUST return structured JSON data. Follow these rules:

1. Extract food items from natural speech
2. Use your knowledge of nutrition data for foods/brands
3. Use standard serving sizes if not specified
4. Parse relative times (yesterday, this morning, etc) into timestamps
5. Handle multiple meals in one input
6. Make reasonable assumptions but note them
7. ALWAYS return valid JSON in the exact format specified below

CRITICAL: Your response must be ONLY a valid JSON object. No explanations, no other text.

Required JSON format:
{{
  "foods": [
    {{
      "name": "Food name",
      "calories": integer,
      "protein": number (grams),
      "carbs": number (grams),
      "fat": number (grams),
      "timestamp": "ISO 8601 date string",
      "assumptions": "Any assumptions made (optional)"
    }}
  ],
  "confidence": 0.0-1.0,
  "notes": "Overall notes if any (optional)"
}}

Current time: {}

Remember: ONLY return the JSON object."#,
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    );

    match preamble {
        Some(preamble) => format!("{}\n\n{}", preamble, base_prompt),
        None => base_prompt,
    }
}

//
// ================= Contract Validation =================
//

/// Parse and validate a success payload. Anything outside the contract is
/// `MalformedResponse`. A food timestamp that is not ISO-8601 falls back to
/// `fallback_time`.
pub fn parse_extraction_payload(
    response: &str,
    fallback_time: DateTime<Utc>,
) -> Result<ExtractionResult> {
    let cleaned = strip_fences(response);

    let payload: WirePayload = serde_json::from_str(cleaned).map_err(|e| {
        TrackerError::MalformedResponse(format!("{} | raw={}", e, response))
    })?;

    if !payload.confidence.is_finite() || !(0.0..=1.0).contains(&payload.confidence) {
        return Err(TrackerError::MalformedResponse(format!(
            "confidence out of range: {}",
            payload.confidence
        )));
    }

    if payload.foods.is_empty() {
        return Err(TrackerError::MalformedResponse(
            "response contains no foods".to_string(),
        ));
    }

    let drafts = payload
        .foods
        .into_iter()
        .map(|food| food.into_draft(fallback_time))
        .collect::<Result<Vec<_>>>()?;

    Ok(ExtractionResult {
        drafts,
        confidence: payload.confidence,
        note: payload.notes,
    })
}

fn strip_fences(response: &str) -> &str {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match (cleaned.find('{'), cleaned.rfind('}')) {
        (Some(start), Some(end)) if start < end => &cleaned[start..=end],
        _ => cleaned,
    }
}

#[derive(Debug, Deserialize)]
struct WirePayload {
    foods: Vec<WireFood>,
    confidence: f64,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireFood {
    name: String,
    calories: i64,
    protein: f64,
    carbs: f64,
    fat: f64,
    #[serde(alias = "timestampISO8601")]
    timestamp: String,
    #[serde(default)]
    assumptions: Option<String>,
}

impl WireFood {
    fn into_draft(self, fallback_time: DateTime<Utc>) -> Result<FoodDraft> {
        if self.name.trim().is_empty() {
            return Err(TrackerError::MalformedResponse("food without a name".to_string()));
        }

        let calories = u32::try_from(self.calories).map_err(|_| {
            TrackerError::MalformedResponse(format!(
                "calories out of range for {}: {}",
                self.name, self.calories
            ))
        })?;

        for (label, value) in [("protein", self.protein), ("carbs", self.carbs), ("fat", self.fat)] {
            if !value.is_finite() || value < 0.0 {
                return Err(TrackerError::MalformedResponse(format!(
                    "{} out of range for {}: {}",
                    label, self.name, value
                )));
            }
        }

        let timestamp = match DateTime::parse_from_rfc3339(&self.timestamp) {
            Ok(parsed) => parsed.with_timezone(&Utc),
            Err(e) => {
                warn!(
                    timestamp = %self.timestamp,
                    "Failed to parse food timestamp, using request time: {}",
                    e
                );
                fallback_time
            }
        };

        Ok(FoodDraft {
            name: self.name,
            calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            timestamp,
            assumption: self.assumptions,
        })
    }
}

//
// ================= Messages API =================
//

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}
