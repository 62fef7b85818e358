//! The HTTP surface: thin, framework-agnostic functions over [`AppState`] showing exactly where
//! each endpoint calls into the registry and dispatch adapter. Wiring a real router (axum,
//! actix-web, or similar) on top is left to the deployment.

use crate::dispatch::{JobEnvelope, JobQueue};
use crate::models::{RegistryEntry, RegistryId, RegistryKind};
use crate::schema;
use crate::storage::{self, StorageError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub db: storage::Db,
    pub job_queue: JobQueue,
    pub storage_results_limit: u64,
}

#[derive(thiserror::Error, Debug)]
pub enum HttpError {
    #[error("invalid id '{0}'")]
    InvalidId(String),
    #[error("{0} is not a recognized content type")]
    InvalidContentType(String),
    #[error("content could not be parsed: {0}")]
    InvalidContent(String),
    #[error("schema failed validation: {0}")]
    ValidationError(#[from] schema::SchemaError),
    #[error("a registry entry with this id already exists")]
    Duplicate,
    #[error("not found")]
    NotFound,
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for HttpError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound => HttpError::NotFound,
            StorageError::Exists => HttpError::Duplicate,
            other => HttpError::Internal(other.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListResponse {
    pub tasks: Vec<RegistryEntry>,
}

/// `GET /tasks`
pub async fn list_tasks(state: &AppState, limit: Option<u64>, offset: u64) -> Result<TaskListResponse, HttpError> {
    let limit = limit.unwrap_or(state.storage_results_limit);
    let tasks = storage::registry::list(&state.db, RegistryKind::Task, limit, offset).await?;
    Ok(TaskListResponse { tasks })
}

/// `GET /tasks/{id}`
pub async fn get_task(state: &AppState, id: &str) -> Result<RegistryEntry, HttpError> {
    let id = RegistryId::new(id).map_err(|_| HttpError::InvalidId(id.to_string()))?;
    Ok(storage::registry::get(&state.db, &id).await?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadContentType {
    Json,
    Yaml,
}

impl UploadContentType {
    fn from_mime(mime: &str) -> Result<Self, HttpError> {
        match mime {
            "application/json" => Ok(UploadContentType::Json),
            "text/yaml" => Ok(UploadContentType::Yaml),
            other => Err(HttpError::InvalidContentType(other.to_string())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadTaskResponse {
    pub message: String,
    pub id: String,
}

/// `POST /tasks`: multipart upload of a JSON or YAML task schema.
pub async fn upload_task(state: &AppState, content_type: &str, body: &str) -> Result<UploadTaskResponse, HttpError> {
    let content_type = UploadContentType::from_mime(content_type)?;

    let raw: crate::models::TaskSchema = match content_type {
        UploadContentType::Json => {
            serde_json::from_str(body).map_err(|e| HttpError::InvalidContent(e.to_string()))?
        }
        UploadContentType::Yaml => {
            let value: Value = serde_yaml::from_str(body).map_err(|e| HttpError::InvalidContent(e.to_string()))?;
            if !value.is_object() {
                return Err(HttpError::InvalidContent("YAML document is not a mapping".to_string()));
            }
            serde_json::from_value(value).map_err(|e| HttpError::InvalidContent(e.to_string()))?
        }
    };

    let id = RegistryId::new(raw.id.clone()).map_err(|_| HttpError::InvalidId(raw.id.clone()))?;
    let schema_value = serde_json::to_value(&raw).map_err(|e| HttpError::Internal(e.to_string()))?;

    schema::compile_task(raw)?;

    let entry = RegistryEntry::new(id.clone(), RegistryKind::Task, schema_value);
    storage::registry::insert(&state.db, &entry).await?;

    Ok(UploadTaskResponse { message: "task registered".to_string(), id: id.to_string() })
}

#[derive(Debug, Deserialize)]
pub struct RunTaskRequest {
    pub id: String,
    pub parameters: Value,
    pub owner_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunTaskResponse {
    pub id: Uuid,
}

/// `POST /tasks/run`
pub async fn run_task(state: &AppState, request: RunTaskRequest) -> Result<RunTaskResponse, HttpError> {
    let id = RegistryId::new(&request.id).map_err(|_| HttpError::InvalidId(request.id.clone()))?;
    let entry = storage::registry::get(&state.db, &id).await?;

    let envelope = JobEnvelope {
        schema: entry.schema,
        owner_id: request.owner_id,
        parent_id: request.parent_id,
        parameters: request.parameters,
    };

    let run_id = state
        .job_queue
        .enqueue(envelope)
        .await
        .map_err(|e| HttpError::Internal(e.to_string()))?;

    Ok(RunTaskResponse { id: run_id })
}
