//! Durable storage for the registry and run store, backed by `sqlx`'s SQLite driver.
//!
//! A PRAGMA tuning block (WAL mode, `busy_timeout`, a large page cache) runs on every new
//! connection, and sqlite error codes are mapped with a "match the code, fall back to a generic
//! variant" shape. A single `sqlx::SqlitePool` is used rather than a split read/write pool pair:
//! WAL mode plus `busy_timeout` already serializes writers safely at this crate's write volume.
//! Migrations are plain `CREATE TABLE IF NOT EXISTS` statements run on `Db::new` rather than a
//! migration framework.

pub mod registry;
pub mod runs;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::ops::Deref;

#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    #[error("could not establish connection to database; {0}")]
    Connection(String),

    #[error("requested entity not found")]
    NotFound,

    #[error("entity already exists")]
    Exists,

    #[error("unexpected storage error occurred; {0}")]
    Unknown(String),
}

fn map_sqlx_error(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::RowNotFound => StorageError::NotFound,
        sqlx::Error::Database(database_err) => {
            // SQLite error code 2067/1555 is a UNIQUE constraint violation.
            if database_err.code().as_deref() == Some("2067")
                || database_err.code().as_deref() == Some("1555")
                || database_err.message().contains("UNIQUE constraint failed")
            {
                StorageError::Exists
            } else {
                StorageError::Unknown(database_err.to_string())
            }
        }
        other => StorageError::Unknown(other.to_string()),
    }
}

#[derive(Debug, Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Deref for Db {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.pool
    }
}

impl Db {
    pub async fn new(path: &str) -> Result<Self, StorageError> {
        let in_memory = path == ":memory:";

        let options = SqliteConnectOptions::new()
            .filename(path)
            .in_memory(in_memory)
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_millis(5000))
            .pragma("journal_mode", "WAL")
            .pragma("synchronous", "NORMAL")
            .pragma("cache_size", "-1048576")
            .pragma("temp_store", "MEMORY");

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 10 })
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS registry (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    name TEXT,
    description TEXT,
    schema TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Unknown(e.to_string()))?;

        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    owner_id TEXT NOT NULL,
    parent_id TEXT,
    parameters TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    failed_at TEXT,
    result TEXT,
    files TEXT NOT NULL,
    errors TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StorageError::Unknown(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Drains in-flight queries and closes the pool. Called once at worker/server shutdown.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub async fn test_db() -> Db {
        Db::new(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn creates_schema_on_open() {
        let db = test_db().await;
        let row: (i64,) = sqlx::query_as("SELECT count(*) FROM registry")
            .fetch_one(&*db)
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }
}
