//! Storage configuration types.

use serde::Deserialize;

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage type (sqlite, memory).
    #[serde(rename = "type")]
    pub storage_type: String,
    /// Path to database file.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: "sqlite".to_string(),
            path: "./data/logs.db".to_string(),
        }
    }
}
