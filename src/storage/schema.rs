//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Logs table schema.
#[derive(Iden)]
pub enum Logs {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "data"]
    Data,
    #[iden = "created_at"]
    CreatedAt,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// SQL for creating the logs table.
///
/// Timestamps are fixed-width RFC 3339 text, so they sort chronologically.
pub const CREATE_LOGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS logs (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    data TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// Index backing newest-first listing.
pub const CREATE_LOGS_CREATED_AT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_logs_created_at ON logs(created_at)";
