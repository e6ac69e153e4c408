//! Runtime configuration
//!
//! Read from the environment, optionally seeded from a `.env` file.

use crate::error::TrackerError;
use crate::session::RetryPolicy;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const PLACEHOLDER_API_KEY: &str = "your_api_key_here";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExtractorMode {
    /// Remote service first, rule engine as fallback
    Remote,
    /// Rule engine only (offline / tests)
    Rules,
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub request_timeout: Duration,
    pub extractor: ExtractorMode,
    pub data_dir: PathBuf,
    pub rules_path: Option<PathBuf>,
    pub port: u16,
    pub retry_policy: RetryPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: "https://api.anthropic.com".to_string(),
            model: "claude-3-5-sonnet-20241022".to_string(),
            max_tokens: 1000,
            request_timeout: Duration::from_secs(30),
            extractor: ExtractorMode::Rules,
            data_dir: PathBuf::from("./data"),
            rules_path: None,
            port: 8080,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl TrackerConfig {
    /// Load `.env` (if any) and read the process environment
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_key = get("ANTHROPIC_API_KEY");

        let extractor = match get("NUTRITION_EXTRACTOR").as_deref().map(str::to_lowercase) {
            Some(mode) if mode == "remote" => ExtractorMode::Remote,
            Some(mode) if mode == "rules" => ExtractorMode::Rules,
            Some(other) => {
                return Err(TrackerError::ConfigError(format!(
                    "NUTRITION_EXTRACTOR must be 'remote' or 'rules', got '{}'",
                    other
                )))
            }
            None if api_key.as_deref().is_some_and(Self::is_valid_api_key) => {
                ExtractorMode::Remote
            }
            None => ExtractorMode::Rules,
        };

        let port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(value) => parse_number("PORT", &value)?,
            None => defaults.port,
        };

        let mut retry_policy = defaults.retry_policy;
        if let Some(value) = get("NUTRITION_MAX_ATTEMPTS") {
            retry_policy.max_attempts = parse_number("NUTRITION_MAX_ATTEMPTS", &value)?;
            if retry_policy.max_attempts == 0 {
                return Err(TrackerError::ConfigError(
                    "NUTRITION_MAX_ATTEMPTS must be at least 1".to_string(),
                ));
            }
        }
        if let Some(value) = get("NUTRITION_CONFIDENCE_THRESHOLD") {
            let threshold: f64 = parse_number("NUTRITION_CONFIDENCE_THRESHOLD", &value)?;
            if !(0.0..=1.0).contains(&threshold) {
                return Err(TrackerError::ConfigError(format!(
                    "NUTRITION_CONFIDENCE_THRESHOLD must be within [0, 1], got {}",
                    threshold
                )));
            }
            retry_policy.confidence_threshold = threshold;
        }

        Ok(Self {
            api_key,
            api_base_url: get("NUTRITION_API_BASE_URL").unwrap_or(defaults.api_base_url),
            model: get("NUTRITION_MODEL").unwrap_or(defaults.model),
            max_tokens: match get("NUTRITION_MAX_TOKENS") {
                Some(value) => parse_number("NUTRITION_MAX_TOKENS", &value)?,
                None => defaults.max_tokens,
            },
            request_timeout: match get("NUTRITION_REQUEST_TIMEOUT_SECS") {
                Some(value) => {
                    Duration::from_secs(parse_number("NUTRITION_REQUEST_TIMEOUT_SECS", &value)?)
                }
                None => defaults.request_timeout,
            },
            extractor,
            data_dir: get("NUTRITION_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            rules_path: get("NUTRITION_RULES_PATH").map(PathBuf::from),
            port,
            retry_policy,
        })
    }

    /// A key counts as configured when it is non-blank and not the sample value
    pub fn is_valid_api_key(key: &str) -> bool {
        let key = key.trim();
        !key.is_empty() && key != PLACEHOLDER_API_KEY
    }

    pub fn has_valid_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(Self::is_valid_api_key)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        TrackerError::ConfigError(format!("{} is not a valid number: '{}'", key, value))
    })
}
