//! In-memory LogStore implementation.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{LogEntry, LogRecord, LogStore, Result, StorageError};

/// Log store that keeps records in insertion order in memory.
#[derive(Default)]
pub struct MemoryLogStore {
    records: RwLock<Vec<LogRecord>>,
    fail_on_insert: RwLock<bool>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent insert fail with `Unavailable`.
    pub async fn set_fail_on_insert(&self, fail: bool) {
        *self.fail_on_insert.write().await = fail;
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Records in insertion order.
    pub async fn snapshot(&self) -> Vec<LogRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn insert(&self, entry: LogEntry) -> Result<LogRecord> {
        if *self.fail_on_insert.read().await {
            return Err(StorageError::Unavailable("insert disabled".to_string()));
        }
        let record = LogRecord::from_entry(Uuid::new_v4().to_string(), entry);
        self.records.write().await.push(record.clone());
        Ok(record)
    }

    async fn all(&self) -> Result<Vec<LogRecord>> {
        let mut records = self.snapshot().await;
        // Stable sort keeps later inserts first among equal timestamps
        records.reverse();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    async fn get(&self, id: &str) -> Result<LogRecord> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound { id: id.to_string() })
    }

    async fn update(&self, id: &str, name: &str, data: &str) -> Result<LogRecord> {
        let mut records = self.records.write().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StorageError::NotFound { id: id.to_string() })?;

        record.name = name.to_string();
        record.data = data.to_string();
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn drop_all(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }
}
