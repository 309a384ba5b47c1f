//! SQLite LogStore implementation.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::storage::schema::{Logs, CREATE_LOGS_CREATED_AT_INDEX, CREATE_LOGS_TABLE};
use crate::storage::{LogEntry, LogRecord, LogStore, Result, StorageError};

/// SQLite implementation of LogStore.
pub struct SqliteLogStore {
    pool: SqlitePool,
}

impl SqliteLogStore {
    /// Create a new SQLite log store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_LOGS_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_LOGS_CREATED_AT_INDEX)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn columns() -> [Logs; 5] {
        [
            Logs::Id,
            Logs::Name,
            Logs::Data,
            Logs::CreatedAt,
            Logs::UpdatedAt,
        ]
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidTimestamp(format!("{}: {}", raw, e)))
}

fn record_from_row(row: &SqliteRow) -> Result<LogRecord> {
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(LogRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        data: row.try_get("data")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn insert(&self, entry: LogEntry) -> Result<LogRecord> {
        let id = Uuid::new_v4().to_string();

        let query = Query::insert()
            .into_table(Logs::Table)
            .columns(Self::columns())
            .values_panic([
                id.as_str().into(),
                entry.name.as_str().into(),
                entry.data.as_str().into(),
                format_timestamp(&entry.created_at).into(),
                format_timestamp(&entry.updated_at).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;

        Ok(LogRecord::from_entry(id, entry))
    }

    async fn all(&self) -> Result<Vec<LogRecord>> {
        let query = Query::select()
            .columns(Self::columns())
            .from(Logs::Table)
            .order_by(Logs::CreatedAt, Order::Desc)
            .order_by_expr(Expr::cust("rowid"), Order::Desc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn get(&self, id: &str) -> Result<LogRecord> {
        let query = Query::select()
            .columns(Self::columns())
            .from(Logs::Table)
            .and_where(Expr::col(Logs::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        match sqlx::query(&query).fetch_optional(&self.pool).await? {
            Some(row) => record_from_row(&row),
            None => Err(StorageError::NotFound { id: id.to_string() }),
        }
    }

    async fn update(&self, id: &str, name: &str, data: &str) -> Result<LogRecord> {
        let query = Query::update()
            .table(Logs::Table)
            .values([
                (Logs::Name, name.into()),
                (Logs::Data, data.into()),
                (Logs::UpdatedAt, format_timestamp(&Utc::now()).into()),
            ])
            .and_where(Expr::col(Logs::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound { id: id.to_string() });
        }

        self.get(id).await
    }

    async fn drop_all(&self) -> Result<()> {
        let query = Query::delete()
            .from_table(Logs::Table)
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}
