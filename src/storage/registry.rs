//! CRUD for `registry` rows: insert/list/get over the crate's `sqlx` pool.

use super::{map_sqlx_error, StorageError};
use crate::models::{RegistryEntry, RegistryId, RegistryKind};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<RegistryEntry, StorageError> {
    let id: String = row.try_get("id").map_err(|e| StorageError::Unknown(e.to_string()))?;
    let kind: String = row.try_get("kind").map_err(|e| StorageError::Unknown(e.to_string()))?;
    let schema: String = row.try_get("schema").map_err(|e| StorageError::Unknown(e.to_string()))?;
    let created_at: String = row
        .try_get("created_at")
        .map_err(|e| StorageError::Unknown(e.to_string()))?;
    let updated_at: String = row
        .try_get("updated_at")
        .map_err(|e| StorageError::Unknown(e.to_string()))?;

    Ok(RegistryEntry {
        id: RegistryId::new(id).map_err(|e| StorageError::Unknown(e.to_string()))?,
        kind: RegistryKind::from_str(&kind).map_err(|e| StorageError::Unknown(e.to_string()))?,
        name: row.try_get("name").ok(),
        description: row.try_get("description").ok(),
        schema: serde_json::from_str(&schema).map_err(|e| StorageError::Unknown(e.to_string()))?,
        created_at: DateTime::<Utc>::from_str(&created_at).map_err(|e| StorageError::Unknown(e.to_string()))?,
        updated_at: DateTime::<Utc>::from_str(&updated_at).map_err(|e| StorageError::Unknown(e.to_string()))?,
    })
}

/// Insert a new registry entry. Fails with [`StorageError::Exists`] if `entry.id` is already
/// taken — this is how a duplicate id error surfaces at the storage boundary.
pub async fn insert(pool: &SqlitePool, entry: &RegistryEntry) -> Result<(), StorageError> {
    sqlx::query(
        r#"
INSERT INTO registry (id, kind, name, description, schema, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, ?);
"#,
    )
    .bind(entry.id.as_str())
    .bind(entry.kind.to_string())
    .bind(&entry.name)
    .bind(&entry.description)
    .bind(serde_json::to_string(&entry.schema).map_err(|e| StorageError::Unknown(e.to_string()))?)
    .bind(entry.created_at.to_rfc3339())
    .bind(entry.updated_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

/// Fetch every registry entry of the given kind, newest first.
pub async fn list(pool: &SqlitePool, kind: RegistryKind, limit: u64, offset: u64) -> Result<Vec<RegistryEntry>, StorageError> {
    let rows = sqlx::query(
        r#"
SELECT id, kind, name, description, schema, created_at, updated_at
FROM registry
WHERE kind = ?
ORDER BY created_at DESC
LIMIT ? OFFSET ?;
"#,
    )
    .bind(kind.to_string())
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(pool)
    .await
    .map_err(map_sqlx_error)?;

    rows.into_iter().map(from_row).collect()
}

/// Fetch a single registry entry by id. Fails with [`StorageError::NotFound`] if absent.
pub async fn get(pool: &SqlitePool, id: &RegistryId) -> Result<RegistryEntry, StorageError> {
    let row = sqlx::query(
        r#"
SELECT id, kind, name, description, schema, created_at, updated_at
FROM registry
WHERE id = ?;
"#,
    )
    .bind(id.as_str())
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    from_row(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::test_db;
    use serde_json::json;

    fn sample_entry(id: &str) -> RegistryEntry {
        RegistryEntry::new(
            RegistryId::new(id).unwrap(),
            RegistryKind::Task,
            json!({"id": id, "image": "nmap:1", "command": "nmap $target"}),
        )
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let db = test_db().await;
        let entry = sample_entry("nmap-scan");
        insert(&db, &entry).await.unwrap();

        let fetched = get(&db, &entry.id).await.unwrap();
        assert_eq!(fetched.id, entry.id);
        assert_eq!(fetched.schema, entry.schema);
    }

    #[tokio::test]
    async fn duplicate_id_insert_fails_and_leaves_original_untouched() {
        let db = test_db().await;
        let entry = sample_entry("nmap-scan");
        insert(&db, &entry).await.unwrap();

        let duplicate = sample_entry("nmap-scan");
        let err = insert(&db, &duplicate).await.unwrap_err();
        assert!(matches!(err, StorageError::Exists));

        let fetched = get(&db, &entry.id).await.unwrap();
        assert_eq!(fetched.schema, entry.schema);
    }

    #[tokio::test]
    async fn list_filters_by_kind() {
        let db = test_db().await;
        insert(&db, &sample_entry("task-one")).await.unwrap();
        insert(
            &db,
            &RegistryEntry::new(RegistryId::new("flow-one").unwrap(), RegistryKind::Workflow, json!({})),
        )
        .await
        .unwrap();

        let tasks = list(&db, RegistryKind::Task, 100, 0).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id.as_str(), "task-one");
    }

    #[tokio::test]
    async fn get_missing_id_returns_not_found() {
        let db = test_db().await;
        let err = get(&db, &RegistryId::new("missing").unwrap()).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }
}
