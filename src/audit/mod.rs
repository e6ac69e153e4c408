//! Interaction journal
//!
//! Bounded record of what was sent to extractors and what came back,
//! newest first. Diagnostic only; never consulted by the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

pub const DEFAULT_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Request,
    Response,
    Fallback,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub interaction_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: InteractionKind,
    /// Extractor that handled the call
    pub source: String,
    pub input: String,
    pub output: Option<String>,
}

/// Interaction journal storage
#[derive(Clone)]
pub struct InteractionLog {
    entries: Arc<RwLock<VecDeque<Interaction>>>,
    capacity: usize,
}

impl InteractionLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Store an entry, evicting the oldest past capacity
    pub async fn record(
        &self,
        kind: InteractionKind,
        source: &str,
        input: &str,
        output: Option<String>,
    ) {
        let entry = Interaction {
            interaction_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            source: source.to_string(),
            input: input.to_string(),
            output,
        };

        let mut entries = self.entries.write().await;
        entries.push_front(entry);
        entries.truncate(self.capacity);
    }

    /// Entries, newest first
    pub async fn entries(&self) -> Vec<Interaction> {
        self.entries.read().await.iter().cloned().collect()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Plain-text dump for bug reports
    pub async fn export(&self) -> String {
        let entries = self.entries.read().await;
        let mut out = format!(
            "Interaction Journal\nGenerated: {}\n",
            Utc::now().to_rfc3339()
        );

        for entry in entries.iter() {
            out.push_str(&format!(
                "\n[{}] {:?} via {}\nInput: {}\n",
                entry.timestamp.to_rfc3339(),
                entry.kind,
                entry.source,
                entry.input
            ));
            if let Some(output) = &entry.output {
                out.push_str(&format!("Output: {}\n", output));
            }
        }

        out
    }
}

impl Default for InteractionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_journal_is_bounded_and_newest_first() {
        let log = InteractionLog::with_capacity(2);

        log.record(InteractionKind::Request, "rules", "first", None).await;
        log.record(InteractionKind::Request, "rules", "second", None).await;
        log.record(
            InteractionKind::Response,
            "rules",
            "third",
            Some("1 item".to_string()),
        )
        .await;

        let entries = log.entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].input, "third");
        assert_eq!(entries[1].input, "second");
    }

    #[test]
    fn test_export_and_clear() {
        tokio_test::block_on(async {
            let log = InteractionLog::new();
            log.record(
                InteractionKind::Fallback,
                "remote",
                "big mac",
                Some("service unavailable".to_string()),
            )
            .await;

            let export = log.export().await;
            assert!(export.contains("Fallback via remote"));
            assert!(export.contains("Output: service unavailable"));

            log.clear().await;
            assert!(log.entries().await.is_empty());
        });
    }
}
