use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The lifecycle status of a run. Transitions are monotonic along one of two paths:
/// `Pending -> Running -> Success` or `Pending -> Running -> Failed` or `Pending -> Failed`
/// (a pre-start failure, e.g. parameter validation).
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
}

/// One recorded failure against a run. Appended to, never replaced — every user-visible
/// failure a run encounters ends up in this list, even if the run later fails again.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct RunError {
    pub reason: String,
    pub message: String,
}

/// An artifact swept up from the run's volume and uploaded to the object store.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub path: String,
    pub content_type: String,
}

/// One attempted execution of a task with concrete parameters.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Run {
    pub id: uuid::Uuid,
    pub name: String,
    pub owner_id: String,
    pub parent_id: Option<String>,
    pub parameters: serde_json::Value,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub files: Vec<ArtifactFile>,
    pub errors: Vec<RunError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    pub fn new(
        id: uuid::Uuid,
        name: String,
        owner_id: String,
        parent_id: Option<String>,
        parameters: serde_json::Value,
    ) -> Self {
        let now = super::now();

        Self {
            id,
            name,
            owner_id,
            parent_id,
            parameters,
            status: RunStatus::Pending,
            started_at: None,
            completed_at: None,
            failed_at: None,
            result: None,
            files: Vec::new(),
            errors: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The transition descriptor returned by every [`crate::events::RunStore`] mutation.
/// [`crate::events::EventBus`] turns these into `run.created` / `run.status_changed` events
/// without the store itself knowing anything about pub/sub.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "kind")]
pub enum RunTransition {
    Created {
        id: uuid::Uuid,
        owner_id: String,
        parent_id: Option<String>,
        params: serde_json::Value,
    },
    StatusChanged {
        id: uuid::Uuid,
        owner_id: String,
        parent_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        completed_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        failed_at: Option<DateTime<Utc>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        status: [RunStatus; 2],
    },
}
