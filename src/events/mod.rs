//! The Event Handler / Run Store: owns the persisted [`Run`] entity and its state machine, and
//! publishes best-effort status-change events to the pub/sub gateway.
//!
//! Composition rather than subclassing: [`RunStore`] persists and returns a [`RunTransition`]
//! descriptor; [`EventBus`] wraps a `RunStore` and turns each descriptor into one `runs`-channel
//! event, swallowing any publish failure, with the persisted outcome standing regardless.

pub mod pubsub;

pub use pubsub::{LocalPubSub, PubSub};

use crate::models::{now, ArtifactFile, Run, RunError, RunStatus, RunTransition};
use crate::storage::{self, StorageError};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum EventError {
    #[error("run '{0}' already exists")]
    DuplicateRun(Uuid),

    #[error("run '{0}' not found")]
    NotFound(Uuid),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Owns `runs` rows and their lifecycle transitions.
#[derive(Debug, Clone)]
pub struct RunStore {
    db: storage::Db,
}

impl RunStore {
    pub fn new(db: storage::Db) -> Self {
        Self { db }
    }

    pub async fn get(&self, run_id: Uuid) -> Result<Run, EventError> {
        storage::runs::get(&self.db, run_id).await.map_err(|e| match e {
            StorageError::NotFound => EventError::NotFound(run_id),
            other => EventError::Storage(other),
        })
    }

    /// Precondition: no row exists for `run_id`. Inserts a `Run` with `status = PENDING`.
    pub async fn before_start(
        &self,
        run_id: Uuid,
        name: String,
        owner_id: String,
        parent_id: Option<String>,
        params: Value,
    ) -> Result<RunTransition, EventError> {
        let run = Run::new(run_id, name, owner_id.clone(), parent_id.clone(), params.clone());

        storage::runs::insert(&self.db, &run).await.map_err(|e| match e {
            StorageError::Exists => EventError::DuplicateRun(run_id),
            other => EventError::Storage(other),
        })?;

        debug!(run_id = %run_id, "run created");

        Ok(RunTransition::Created { id: run_id, owner_id, parent_id, params })
    }

    /// Precondition: run exists. Sets `status = RUNNING`, `started_at = now()`.
    pub async fn on_start(&self, run_id: Uuid) -> Result<RunTransition, EventError> {
        let mut run = self.get(run_id).await?;
        let prev_status = run.status;

        run.status = RunStatus::Running;
        run.started_at = Some(now());
        run.updated_at = now();

        storage::runs::update(&self.db, &run).await?;
        debug!(run_id = %run_id, "run started");

        Ok(RunTransition::StatusChanged {
            id: run_id,
            owner_id: run.owner_id,
            parent_id: run.parent_id,
            started_at: run.started_at,
            completed_at: None,
            failed_at: None,
            error: None,
            status: [prev_status, RunStatus::Running],
        })
    }

    /// Precondition: run exists. Sets `status = SUCCESS`, `completed_at = now()`, `result`,
    /// `files`.
    pub async fn on_complete(
        &self,
        run_id: Uuid,
        result: Value,
        files: Vec<ArtifactFile>,
    ) -> Result<RunTransition, EventError> {
        let mut run = self.get(run_id).await?;
        let prev_status = run.status;

        run.status = RunStatus::Success;
        run.completed_at = Some(now());
        run.result = Some(result);
        run.files = files;
        run.updated_at = now();

        storage::runs::update(&self.db, &run).await?;
        debug!(run_id = %run_id, "run completed");

        Ok(RunTransition::StatusChanged {
            id: run_id,
            owner_id: run.owner_id,
            parent_id: run.parent_id,
            started_at: None,
            completed_at: run.completed_at,
            failed_at: None,
            error: None,
            status: [prev_status, RunStatus::Success],
        })
    }

    /// Precondition: run exists. Sets `status = FAILED`, `failed_at = now()`, appends
    /// `{reason, message}` to `errors`. Errors accumulate — they are never truncated or
    /// replaced, since a run can fail more than once along its pre-start path.
    pub async fn on_error(&self, run_id: Uuid, reason: String, message: String) -> Result<RunTransition, EventError> {
        let mut run = self.get(run_id).await?;
        let prev_status = run.status;

        run.status = RunStatus::Failed;
        run.failed_at = Some(now());
        run.errors.push(RunError { reason: reason.clone(), message: message.clone() });
        run.updated_at = now();

        storage::runs::update(&self.db, &run).await?;
        warn!(run_id = %run_id, reason = %reason, "run failed");

        Ok(RunTransition::StatusChanged {
            id: run_id,
            owner_id: run.owner_id,
            parent_id: run.parent_id,
            started_at: None,
            completed_at: None,
            failed_at: run.failed_at,
            error: Some(message),
            status: [prev_status, RunStatus::Failed],
        })
    }
}

/// The channel every run lifecycle event is published on.
pub const RUNS_CHANNEL: &str = "runs";

/// Decorates a [`RunStore`] with best-effort pub/sub publication. See the module docs for why
/// this is composition rather than subclassing.
#[derive(Debug, Clone)]
pub struct EventBus {
    store: RunStore,
    publisher: Arc<dyn PubSub>,
}

impl EventBus {
    pub fn new(store: RunStore, publisher: Arc<dyn PubSub>) -> Self {
        Self { store, publisher }
    }

    pub async fn get(&self, run_id: Uuid) -> Result<Run, EventError> {
        self.store.get(run_id).await
    }

    pub async fn before_start(
        &self,
        run_id: Uuid,
        name: String,
        owner_id: String,
        parent_id: Option<String>,
        params: Value,
    ) -> Result<RunTransition, EventError> {
        let transition = self.store.before_start(run_id, name, owner_id, parent_id, params).await?;
        self.publish("run.created", &transition).await;
        Ok(transition)
    }

    pub async fn on_start(&self, run_id: Uuid) -> Result<RunTransition, EventError> {
        let transition = self.store.on_start(run_id).await?;
        self.publish("run.status_changed", &transition).await;
        Ok(transition)
    }

    pub async fn on_complete(&self, run_id: Uuid, result: Value, files: Vec<ArtifactFile>) -> Result<RunTransition, EventError> {
        let transition = self.store.on_complete(run_id, result, files).await?;
        self.publish("run.status_changed", &transition).await;
        Ok(transition)
    }

    pub async fn on_error(&self, run_id: Uuid, reason: String, message: String) -> Result<RunTransition, EventError> {
        let transition = self.store.on_error(run_id, reason, message).await?;
        self.publish("run.status_changed", &transition).await;
        Ok(transition)
    }

    async fn publish(&self, event_name: &str, transition: &RunTransition) {
        let payload = event_payload(event_name, transition);
        self.publisher.publish(RUNS_CHANNEL, payload).await;
    }
}

/// Shape the wire payload for a transition as a `run.created`/`run.status_changed` union.
fn event_payload(event_name: &str, transition: &RunTransition) -> Value {
    match transition {
        RunTransition::Created { id, owner_id, parent_id, params } => json!({
            "event": event_name,
            "id": id,
            "owner_id": owner_id,
            "parent_id": parent_id,
            "params": params,
        }),
        RunTransition::StatusChanged {
            id,
            owner_id,
            parent_id,
            started_at,
            completed_at,
            failed_at,
            error,
            status,
        } => {
            let mut payload = json!({
                "event": event_name,
                "id": id,
                "owner_id": owner_id,
                "parent_id": parent_id,
                "status": status,
            });
            let obj = payload.as_object_mut().expect("constructed as an object");
            if let Some(started_at) = started_at {
                obj.insert("started_at".to_string(), json!(started_at));
            }
            if let Some(completed_at) = completed_at {
                obj.insert("completed_at".to_string(), json!(completed_at));
            }
            if let Some(failed_at) = failed_at {
                obj.insert("failed_at".to_string(), json!(failed_at));
            }
            if let Some(error) = error {
                obj.insert("error".to_string(), json!(error));
            }
            payload
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::test_db;

    async fn store() -> RunStore {
        RunStore::new(test_db().await)
    }

    #[tokio::test]
    async fn full_lifecycle_success_path() {
        let store = store().await;
        let run_id = Uuid::now_v7();

        store
            .before_start(run_id, "nmap-scan".into(), "u1".into(), None, json!({"target": "1.1.1.1"}))
            .await
            .unwrap();

        store.on_start(run_id).await.unwrap();
        let transition = store.on_complete(run_id, json!({"report": {"hits": 3}}), vec![]).await.unwrap();

        let run = store.get(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.result.is_some());
        assert!(run.completed_at.is_some());
        assert!(matches!(transition, RunTransition::StatusChanged { status: [RunStatus::Running, RunStatus::Success], .. }));
    }

    #[tokio::test]
    async fn pre_start_failure_path() {
        let store = store().await;
        let run_id = Uuid::now_v7();

        store
            .before_start(run_id, "nmap-scan".into(), "u1".into(), None, json!({"n": "not-a-number"}))
            .await
            .unwrap();

        let transition = store
            .on_error(run_id, "ValidationError".into(), "n must be an integer".into())
            .await
            .unwrap();

        let run = store.get(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.errors.len(), 1);
        assert_eq!(run.errors[0].reason, "ValidationError");
        assert!(matches!(transition, RunTransition::StatusChanged { status: [RunStatus::Pending, RunStatus::Failed], .. }));
    }

    #[tokio::test]
    async fn duplicate_before_start_is_rejected_and_state_is_unchanged() {
        let store = store().await;
        let run_id = Uuid::now_v7();

        store
            .before_start(run_id, "nmap-scan".into(), "u1".into(), None, json!({}))
            .await
            .unwrap();

        let err = store
            .before_start(run_id, "nmap-scan".into(), "u1".into(), None, json!({"different": true}))
            .await
            .unwrap_err();

        assert!(matches!(err, EventError::DuplicateRun(_)));

        let run = store.get(run_id).await.unwrap();
        assert_eq!(run.parameters, json!({}));
    }

    #[tokio::test]
    async fn event_bus_publishes_created_then_status_changed() {
        let bus = LocalPubSub::new();
        let sub = bus.subscribe(RUNS_CHANNEL);
        let event_bus = EventBus::new(store().await, Arc::new(bus));

        let run_id = Uuid::now_v7();
        event_bus
            .before_start(run_id, "nmap-scan".into(), "u1".into(), None, json!({}))
            .await
            .unwrap();
        event_bus.on_start(run_id).await.unwrap();

        let created = sub.receiver.recv().unwrap();
        assert_eq!(created["event"], "run.created");

        let started = sub.receiver.recv().unwrap();
        assert_eq!(started["event"], "run.status_changed");
        assert_eq!(started["status"], json!(["PENDING", "RUNNING"]));
    }
}
