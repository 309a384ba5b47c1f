//! Log record storage.
//!
//! The consumer only needs [`LogStore::insert`]; the remaining operations
//! back the read and edit paths of the logger service.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::config::StorageConfig;

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryLogStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteLogStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Log record not found: {id}")]
    NotFound { id: String },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// A record about to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub name: String,
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LogEntry {
    /// Entry with both timestamps set to the current time.
    pub fn now(name: impl Into<String>, data: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            data: data.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A stored record with its storage-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub id: String,
    pub name: String,
    pub data: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LogRecord {
    pub(crate) fn from_entry(id: String, entry: LogEntry) -> Self {
        Self {
            id,
            name: entry.name,
            data: entry.data,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

/// Interface for log record persistence.
///
/// Implementations:
/// - `SqliteLogStore`: SQLite storage
/// - `MemoryLogStore`: in-memory storage for tests and throwaway runs
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Store a new record and return it with its assigned id.
    async fn insert(&self, entry: LogEntry) -> Result<LogRecord>;

    /// All records, newest `created_at` first.
    async fn all(&self) -> Result<Vec<LogRecord>>;

    /// Fetch one record by id.
    async fn get(&self, id: &str) -> Result<LogRecord>;

    /// Rewrite name and data, refreshing `updated_at`.
    async fn update(&self, id: &str, name: &str, data: &str) -> Result<LogRecord>;

    /// Remove every record.
    async fn drop_all(&self) -> Result<()>;
}

/// Initialize storage based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn LogStore>, Box<dyn std::error::Error>> {
    info!("Storage: {} at {}", config.storage_type, config.path);

    match config.storage_type.as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.path)).await?;

            let store = SqliteLogStore::new(pool);
            store.init().await?;

            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "sqlite"))]
        "sqlite" => {
            error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
        "memory" => Ok(Arc::new(MemoryLogStore::new())),
        other => {
            error!("Unknown storage type: {}", other);
            Err(format!("Unknown storage type: {}", other).into())
        }
    }
}
