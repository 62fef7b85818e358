//! CRUD for `runs` rows, backing the Event Handler / Run Store.

use super::{map_sqlx_error, StorageError};
use crate::models::{ArtifactFile, Run, RunError, RunStatus};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

fn parse_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, StorageError> {
    raw.map(|s| DateTime::<Utc>::from_str(&s).map_err(|e| StorageError::Unknown(e.to_string())))
        .transpose()
}

fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Run, StorageError> {
    let id: String = row.try_get("id").map_err(|e| StorageError::Unknown(e.to_string()))?;
    let status: String = row.try_get("status").map_err(|e| StorageError::Unknown(e.to_string()))?;
    let parameters: String = row.try_get("parameters").map_err(|e| StorageError::Unknown(e.to_string()))?;
    let result: Option<String> = row.try_get("result").map_err(|e| StorageError::Unknown(e.to_string()))?;
    let files: String = row.try_get("files").map_err(|e| StorageError::Unknown(e.to_string()))?;
    let errors: String = row.try_get("errors").map_err(|e| StorageError::Unknown(e.to_string()))?;
    let created_at: String = row.try_get("created_at").map_err(|e| StorageError::Unknown(e.to_string()))?;
    let updated_at: String = row.try_get("updated_at").map_err(|e| StorageError::Unknown(e.to_string()))?;

    Ok(Run {
        id: Uuid::parse_str(&id).map_err(|e| StorageError::Unknown(e.to_string()))?,
        name: row.try_get("name").map_err(|e| StorageError::Unknown(e.to_string()))?,
        owner_id: row.try_get("owner_id").map_err(|e| StorageError::Unknown(e.to_string()))?,
        parent_id: row.try_get("parent_id").ok(),
        parameters: serde_json::from_str(&parameters).map_err(|e| StorageError::Unknown(e.to_string()))?,
        status: RunStatus::from_str(&status).map_err(|e| StorageError::Unknown(e.to_string()))?,
        started_at: parse_timestamp(row.try_get("started_at").ok())?,
        completed_at: parse_timestamp(row.try_get("completed_at").ok())?,
        failed_at: parse_timestamp(row.try_get("failed_at").ok())?,
        result: result
            .map(|r| serde_json::from_str(&r).map_err(|e| StorageError::Unknown(e.to_string())))
            .transpose()?,
        files: serde_json::from_str::<Vec<ArtifactFile>>(&files).map_err(|e| StorageError::Unknown(e.to_string()))?,
        errors: serde_json::from_str::<Vec<RunError>>(&errors).map_err(|e| StorageError::Unknown(e.to_string()))?,
        created_at: DateTime::<Utc>::from_str(&created_at).map_err(|e| StorageError::Unknown(e.to_string()))?,
        updated_at: DateTime::<Utc>::from_str(&updated_at).map_err(|e| StorageError::Unknown(e.to_string()))?,
    })
}

/// Insert a brand-new run row with `status = PENDING`. Fails with [`StorageError::Exists`] if
/// `run.id` already has a row — the storage-layer face of the `DuplicateRun` error, since
/// `run_id` equals the dispatching queue message id and at-least-once delivery can repeat it.
pub async fn insert(pool: &SqlitePool, run: &Run) -> Result<(), StorageError> {
    sqlx::query(
        r#"
INSERT INTO runs (id, name, owner_id, parent_id, parameters, status, result, files, errors, created_at, updated_at)
VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, ?);
"#,
    )
    .bind(run.id.to_string())
    .bind(&run.name)
    .bind(&run.owner_id)
    .bind(&run.parent_id)
    .bind(serde_json::to_string(&run.parameters).map_err(|e| StorageError::Unknown(e.to_string()))?)
    .bind(run.status.to_string())
    .bind(serde_json::to_string(&run.files).map_err(|e| StorageError::Unknown(e.to_string()))?)
    .bind(serde_json::to_string(&run.errors).map_err(|e| StorageError::Unknown(e.to_string()))?)
    .bind(run.created_at.to_rfc3339())
    .bind(run.updated_at.to_rfc3339())
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;

    Ok(())
}

/// Fetch a single run by id. Fails with [`StorageError::NotFound`] if absent.
pub async fn get(pool: &SqlitePool, id: Uuid) -> Result<Run, StorageError> {
    let row = sqlx::query(
        r#"
SELECT id, name, owner_id, parent_id, parameters, status, started_at, completed_at, failed_at,
       result, files, errors, created_at, updated_at
FROM runs
WHERE id = ?;
"#,
    )
    .bind(id.to_string())
    .fetch_one(pool)
    .await
    .map_err(map_sqlx_error)?;

    from_row(row)
}

/// Overwrite the whole row with `run`'s current in-memory state (bumping `updated_at`). The
/// Event Handler always has the full `Run` in hand before mutating it, so a whole-row update is
/// simple and race-free: only the Task Runner that owns `run_id` ever writes it.
pub async fn update(pool: &SqlitePool, run: &Run) -> Result<(), StorageError> {
    let result = sqlx::query(
        r#"
UPDATE runs
SET status = ?, started_at = ?, completed_at = ?, failed_at = ?, result = ?, files = ?, errors = ?, updated_at = ?
WHERE id = ?;
"#,
    )
    .bind(run.status.to_string())
    .bind(run.started_at.map(|t| t.to_rfc3339()))
    .bind(run.completed_at.map(|t| t.to_rfc3339()))
    .bind(run.failed_at.map(|t| t.to_rfc3339()))
    .bind(
        run.result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Unknown(e.to_string()))?,
    )
    .bind(serde_json::to_string(&run.files).map_err(|e| StorageError::Unknown(e.to_string()))?)
    .bind(serde_json::to_string(&run.errors).map_err(|e| StorageError::Unknown(e.to_string()))?)
    .bind(run.updated_at.to_rfc3339())
    .bind(run.id.to_string())
    .execute(pool)
    .await
    .map_err(map_sqlx_error)?;

    if result.rows_affected() == 0 {
        return Err(StorageError::NotFound);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::test_db;
    use serde_json::json;

    fn sample_run() -> Run {
        Run::new(Uuid::now_v7(), "nmap-scan".into(), "u1".into(), None, json!({"target": "1.1.1.1"}))
    }

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let db = test_db().await;
        let run = sample_run();
        insert(&db, &run).await.unwrap();

        let fetched = get(&db, run.id).await.unwrap();
        assert_eq!(fetched.id, run.id);
        assert_eq!(fetched.status, RunStatus::Pending);
        assert_eq!(fetched.parameters, run.parameters);
    }

    #[tokio::test]
    async fn duplicate_insert_fails_as_already_processed() {
        let db = test_db().await;
        let run = sample_run();
        insert(&db, &run).await.unwrap();

        let err = insert(&db, &run).await.unwrap_err();
        assert!(matches!(err, StorageError::Exists));
    }

    #[tokio::test]
    async fn update_persists_status_transition() {
        let db = test_db().await;
        let mut run = sample_run();
        insert(&db, &run).await.unwrap();

        run.status = RunStatus::Running;
        run.started_at = Some(crate::models::now());
        update(&db, &run).await.unwrap();

        let fetched = get(&db, run.id).await.unwrap();
        assert_eq!(fetched.status, RunStatus::Running);
        assert!(fetched.started_at.is_some());
    }

    #[tokio::test]
    async fn update_missing_run_fails_not_found() {
        let db = test_db().await;
        let run = sample_run();
        let err = update(&db, &run).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }
}
