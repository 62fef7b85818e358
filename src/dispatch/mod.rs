//! The Dispatch Adapter: an in-process, at-least-once job queue that hands task invocations from
//! the request plane to the worker plane. A bounded `tokio::sync::mpsc` channel rather than an
//! external broker dependency.

use crate::events::EventBus;
use crate::objectstore::ObjectStore;
use crate::runner::{Invocation, RunnerError, TaskRunner};
use crate::schema::{self, SchemaError};
use crate::scheduler::Scheduler;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};
use uuid::Uuid;

/// The job name every envelope is enqueued under.
pub const QUEUE_NAME: &str = "task_runner";

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("job queue is closed")]
    Closed,
}

/// The `task_runner` queue envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub schema: Value,
    pub owner_id: String,
    pub parent_id: Option<String>,
    pub parameters: Value,
}

struct QueueMessage {
    id: Uuid,
    envelope: JobEnvelope,
}

/// The sending half: non-blocking push to the `task_runner` queue.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<QueueMessage>,
}

/// The consumer half, shared across worker tasks via a mutex around the receiver, so a small
/// pool of consumer tasks can pull from the same receiver side.
#[derive(Clone)]
pub struct JobConsumer {
    receiver: Arc<Mutex<mpsc::Receiver<QueueMessage>>>,
}

/// Build a bounded queue pair. `capacity` bounds how many envelopes may sit unconsumed before
/// `enqueue` starts exerting backpressure on its caller.
pub fn job_queue(capacity: usize) -> (JobQueue, JobConsumer) {
    let (sender, receiver) = mpsc::channel(capacity);
    (
        JobQueue { sender },
        JobConsumer { receiver: Arc::new(Mutex::new(receiver)) },
    )
}

impl JobQueue {
    /// Assigns a fresh UUIDv7 message id — this becomes the eventual `Run.id` — and pushes the
    /// envelope onto the queue.
    pub async fn enqueue(&self, envelope: JobEnvelope) -> Result<Uuid, DispatchError> {
        let id = Uuid::now_v7();
        self.sender
            .send(QueueMessage { id, envelope })
            .await
            .map_err(|_| DispatchError::Closed)?;
        Ok(id)
    }
}

/// Collaborators a worker needs to build a [`TaskRunner`] for each envelope it pulls. Shared by
/// every consumer task in the worker pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub scheduler: Arc<dyn Scheduler>,
    pub event_bus: EventBus,
    pub object_store: Arc<ObjectStore>,
    pub volumes_base: PathBuf,
    pub guest_mount: String,
    pub dev_mode: bool,
}

/// The result a worker reports back for one consumed envelope.
#[derive(Debug, Serialize)]
pub struct RunHandle {
    pub id: Uuid,
}

#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error("envelope schema is invalid: {0}")]
    InvalidSchema(#[from] serde_json::Error),
    #[error("schema compilation failed: {0}")]
    Compile(#[from] SchemaError),
    #[error("task invocation failed: {0}")]
    Invocation(#[from] RunnerError),
}

/// Pull one envelope at a time from `consumer`, compile its schema, run it, and report the
/// outcome — looping until the queue's sending half is dropped. This is the body every pooled
/// worker task runs, each pulling from the same receiver and running to completion before
/// pulling the next.
pub async fn run_worker(consumer: JobConsumer, ctx: WorkerContext) {
    loop {
        let message = {
            let mut receiver = consumer.receiver.lock().await;
            receiver.recv().await
        };

        let Some(message) = message else {
            info!("job queue closed, worker exiting");
            return;
        };

        match process(&ctx, message.id, message.envelope).await {
            Ok(handle) => info!(run_id = %handle.id, "run completed"),
            Err(e) => error!(run_id = %message.id, error = %e, "run failed"),
        }
    }
}

async fn process(ctx: &WorkerContext, id: Uuid, envelope: JobEnvelope) -> Result<RunHandle, WorkerError> {
    let raw_schema = serde_json::from_value(envelope.schema)?;
    let compiled = schema::compile_task(raw_schema)?;

    let runner = TaskRunner::new(
        Arc::new(compiled),
        Arc::clone(&ctx.scheduler),
        ctx.event_bus.clone(),
        Arc::clone(&ctx.object_store),
        ctx.volumes_base.clone(),
        ctx.guest_mount.clone(),
        ctx.dev_mode,
    );

    runner
        .invoke(Invocation {
            request_id: id,
            owner_id: envelope.owner_id,
            parent_id: envelope.parent_id,
            parameters: envelope.parameters,
        })
        .await?;

    Ok(RunHandle { id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn enqueue_assigns_a_fresh_message_id_each_time() {
        let (queue, _consumer) = job_queue(8);

        let envelope = JobEnvelope {
            schema: json!({}),
            owner_id: "u1".to_string(),
            parent_id: None,
            parameters: json!({}),
        };

        let first = queue.enqueue(envelope.clone()).await.unwrap();
        let second = queue.enqueue(envelope).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn enqueue_fails_once_every_consumer_is_dropped() {
        let (queue, consumer) = job_queue(1);
        drop(consumer);

        let envelope = JobEnvelope {
            schema: json!({}),
            owner_id: "u1".to_string(),
            parent_id: None,
            parameters: json!({}),
        };

        let err = queue.enqueue(envelope).await.unwrap_err();
        assert!(matches!(err, DispatchError::Closed));
    }
}
