//! Nutrition Tracker
//!
//! Turns free-text meal descriptions into structured nutrition records:
//! - Extracts food drafts through a remote language model, with a
//!   deterministic rule-based fallback
//! - Asks for clarification when extraction confidence is low, up to a
//!   bounded number of attempts
//! - Applies free-text edits to committed records without changing identity
//! - Persists records and aggregates daily and multi-day totals
//!
//! FLOW:
//! TEXT → EXTRACT → (CLARIFY?) → COMMIT → STORE → AGGREGATE

pub mod aggregation;
pub mod api;
pub mod audit;
pub mod config;
pub mod edit;
pub mod error;
pub mod extraction;
pub mod models;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod tracker;

pub use error::{Result, TrackerError};

// Re-export common types
pub use models::*;
pub use config::TrackerConfig;
pub use tracker::{LogOutcome, NutritionTracker, TrackerEvent};
