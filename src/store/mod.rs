//! Record store
//!
//! Single-writer, insertion-ordered collection of committed records. The
//! in-memory vector is authoritative; after each mutation the whole
//! collection is written to the blob store as a best-effort side effect. A
//! failed or interrupted write is logged and not retried, so a crash can lose
//! the most recent mutation.

pub mod blob;

pub use blob::{BlobStore, FileBlobStore, InMemoryBlobStore};

use crate::error::TrackerError;
use crate::models::FoodRecord;
use crate::Result;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Fixed key of the persisted collection
pub const RECORDS_KEY: &str = "food_records";

pub struct RecordStore {
    records: RwLock<Vec<FoodRecord>>,
    blob: Arc<dyn BlobStore>,
}

impl RecordStore {
    /// Load the persisted collection. An unreadable blob starts empty.
    pub async fn load(blob: Arc<dyn BlobStore>) -> Self {
        let records = match blob.get(RECORDS_KEY).await {
            Ok(Some(bytes)) => match decode_records(&bytes) {
                Ok(records) => {
                    info!(count = records.len(), "Loaded food records");
                    records
                }
                Err(e) => {
                    warn!("Stored food records are unreadable, starting empty: {}", e);
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!("Failed to read food records, starting empty: {}", e);
                Vec::new()
            }
        };

        Self {
            records: RwLock::new(records),
            blob,
        }
    }

    /// Empty store backed by memory only
    pub fn in_memory() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            blob: Arc::new(InMemoryBlobStore::new()),
        }
    }

    pub async fn append(&self, record: FoodRecord) {
        self.append_all(vec![record]).await;
    }

    /// Append in order with a single write-back
    pub async fn append_all(&self, new_records: Vec<FoodRecord>) {
        let mut records = self.records.write().await;
        for record in new_records {
            debug!(record_id = %record.id(), name = %record.name, "Appending record");
            records.push(record);
        }
        self.persist(&records).await;
    }

    /// Swap the record stored under `id`, keeping its position. Returns the
    /// previous version.
    pub async fn replace(&self, id: Uuid, record: FoodRecord) -> Result<FoodRecord> {
        if record.id() != id {
            return Err(TrackerError::InvalidInput(format!(
                "record id {} does not match target {}",
                record.id(),
                id
            )));
        }

        let mut records = self.records.write().await;
        let slot = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or(TrackerError::RecordNotFound(id))?;

        let previous = std::mem::replace(slot, record);
        debug!(record_id = %id, "Replaced record");
        self.persist(&records).await;
        Ok(previous)
    }

    /// Read-modify-write of one record under a single write lock. The
    /// closure sees the current version and must keep its id.
    pub async fn update<F>(&self, id: Uuid, apply: F) -> Result<FoodRecord>
    where
        F: FnOnce(&FoodRecord) -> Result<FoodRecord>,
    {
        let mut records = self.records.write().await;
        let slot = records
            .iter_mut()
            .find(|r| r.id() == id)
            .ok_or(TrackerError::RecordNotFound(id))?;

        let updated = apply(slot)?;
        if updated.id() != id {
            return Err(TrackerError::InvalidInput(format!(
                "update changed record id {} to {}",
                id,
                updated.id()
            )));
        }

        *slot = updated.clone();
        debug!(record_id = %id, "Updated record");
        self.persist(&records).await;
        Ok(updated)
    }

    pub async fn remove(&self, id: Uuid) -> Result<FoodRecord> {
        let mut records = self.records.write().await;
        let index = records
            .iter()
            .position(|r| r.id() == id)
            .ok_or(TrackerError::RecordNotFound(id))?;

        let removed = records.remove(index);
        debug!(record_id = %id, "Removed record");
        self.persist(&records).await;
        Ok(removed)
    }

    pub async fn get(&self, id: Uuid) -> Option<FoodRecord> {
        self.records.read().await.iter().find(|r| r.id() == id).cloned()
    }

    /// All records in insertion order
    pub async fn all(&self) -> Vec<FoodRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn persist(&self, records: &[FoodRecord]) {
        let bytes = match serde_json::to_vec(records) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode food records, not persisted: {}", e);
                return;
            }
        };

        match self.blob.put(RECORDS_KEY, bytes).await {
            Ok(()) => debug!(count = records.len(), "Persisted food records"),
            Err(e) => warn!("Failed to persist food records: {}", e),
        }
    }
}

fn decode_records(bytes: &[u8]) -> Result<Vec<FoodRecord>> {
    Ok(serde_json::from_slice(bytes)?)
}
