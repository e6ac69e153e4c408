//! Retry session
//!
//! Bounds the clarification loop of one utterance chain:
//!
//! Idle(0) → Attempted(n) → { Committed | Attempted(n+1) | Abandoned }
//!
//! A low-confidence result asks for clarification only while attempts
//! remain. On the last attempt it is committed anyway, flagged as forced.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Gate parameters for the retry loop
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Results strictly below this ask for clarification
    pub confidence_threshold: f64,
    /// Total attempts per utterance chain, first one included
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Whether a result at `confidence` on zero-based `attempt` should be
    /// retried rather than committed
    pub fn should_retry(&self, confidence: f64, attempt: u32) -> bool {
        confidence < self.confidence_threshold && attempt + 1 < self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", content = "attempts", rename_all = "snake_case")]
pub enum RetryState {
    Idle,
    Attempted(u32),
    Committed,
    Abandoned,
}

/// Decision taken for one extraction result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Ask the user to clarify; `attempt` is the next zero-based attempt.
    Retry { attempt: u32 },
    /// Persist the drafts. `forced` means confidence was still low but no
    /// attempts were left.
    Commit { forced: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySession {
    policy: RetryPolicy,
    state: RetryState,
    attempt: u32,
    last_confidence: Option<f64>,
    last_note: Option<String>,
}

impl RetrySession {
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: RetryState::Idle,
            attempt: 0,
            last_confidence: None,
            last_note: None,
        }
    }

    /// Zero-based index of the attempt about to be made
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn state(&self) -> RetryState {
        self.state
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn last_confidence(&self) -> Option<f64> {
        self.last_confidence
    }

    pub fn last_note(&self) -> Option<&str> {
        self.last_note.as_deref()
    }

    /// Attempt index the next utterance will run under, without touching
    /// the session. A finished chain starts over at 0.
    pub fn next_attempt(&self) -> u32 {
        if self.is_finished() {
            0
        } else {
            self.attempt
        }
    }

    fn is_finished(&self) -> bool {
        matches!(self.state, RetryState::Committed | RetryState::Abandoned)
    }

    /// Prepare for a completed extraction. A finished chain starts over at 0.
    pub fn begin(&mut self) {
        if self.is_finished() {
            debug!(previous = ?self.state, "Starting new utterance chain");
            self.state = RetryState::Idle;
            self.attempt = 0;
        }
    }

    /// Apply the gate to a completed attempt and advance the state.
    pub fn record(&mut self, confidence: f64, note: Option<&str>) -> RetryDecision {
        self.last_confidence = Some(confidence);
        self.last_note = note.map(str::to_string);

        if self.policy.should_retry(confidence, self.attempt) {
            self.attempt += 1;
            self.state = RetryState::Attempted(self.attempt);
            info!(
                confidence,
                attempt = self.attempt,
                max_attempts = self.policy.max_attempts,
                "Low confidence, asking for clarification"
            );
            RetryDecision::Retry {
                attempt: self.attempt,
            }
        } else {
            let forced = confidence < self.policy.confidence_threshold;
            self.attempt = 0;
            self.state = RetryState::Committed;
            RetryDecision::Commit { forced }
        }
    }

    /// Caller gave up on the current chain. Nothing is committed.
    pub fn abandon(&mut self) {
        info!(attempt = self.attempt, "Retry session abandoned");
        self.attempt = 0;
        self.state = RetryState::Abandoned;
    }
}

impl Default for RetrySession {
    fn default() -> Self {
        Self::new()
    }
}
