//! The Task Runner: drives a single invocation of a [`CompiledTask`] from submitted parameters
//! through to a finished [`Run`] row, tying together the Schema Compiler's output, the Volume
//! Manager, the Container Executor, and the Event Handler.
//!
//! The `on_start`/`on_finish` callback shape and the "record the failure on the row, then
//! re-raise" error policy mirror the scheduler-to-events wiring used elsewhere in this crate.

pub mod file_codec;

use crate::events::{EventBus, EventError};
use crate::models::{ArtifactFile, CompiledTask, FileType};
use crate::objectstore::ObjectStore;
use crate::schema::{self, safe_substitute, PlaceholderRole, RUN_DIR};
use crate::scheduler::{OnFinish, OnStart, Scheduler, SchedulerError};
use crate::volume::{Volume, VolumeError};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};
use uuid::Uuid;

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("parameters failed validation: {0:?}")]
    ValidationError(Vec<schema::ValidationErrorDetail>),

    #[error("volume io failure: {0}")]
    IOFailure(#[from] VolumeError),

    #[error("container execution failed: {0}")]
    Container(#[from] SchedulerError),

    #[error("unsupported file type for placeholder '{0}'")]
    UnsupportedFileType(String),

    #[error("could not serialize/deserialize '{name}': {source}")]
    TypeError {
        name: String,
        #[source]
        source: file_codec::CodecError,
    },

    #[error("event handler error: {0}")]
    Event(#[from] EventError),

    #[error("on_finish did not report an outcome")]
    LostOutcome,
}

impl RunnerError {
    /// The `reason` string recorded on the run row and passed to `on_error`.
    pub fn reason(&self) -> &'static str {
        match self {
            RunnerError::ValidationError(_) => "ValidationError",
            RunnerError::IOFailure(_) => "IOFailure",
            RunnerError::Container(SchedulerError::ContainerCancelled) => "ContainerCancelled",
            RunnerError::Container(_) => "ContainerFailed",
            RunnerError::UnsupportedFileType(_) => "UnsupportedFileType",
            RunnerError::TypeError { .. } => "UnsupportedFileType",
            RunnerError::Event(_) => "EventError",
            RunnerError::LostOutcome => "IOFailure",
        }
    }

    /// The `message` string recorded on the run row. For a non-zero container exit this is the
    /// raw captured stderr (§7), not the formatted error Display.
    pub fn message(&self) -> String {
        match self {
            RunnerError::Container(SchedulerError::ContainerFailed { stderr, .. }) => stderr.clone(),
            other => other.to_string(),
        }
    }
}

/// A request to run a compiled task with concrete parameters.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request_id: Uuid,
    pub owner_id: String,
    pub parent_id: Option<String>,
    pub parameters: Value,
}

/// Drives one [`CompiledTask`] invocation to completion. Stateless beyond its collaborators —
/// a worker can hold one `TaskRunner` per task and reuse it across many [`Invocation`]s.
#[derive(Clone)]
pub struct TaskRunner {
    task: Arc<CompiledTask>,
    scheduler: Arc<dyn Scheduler>,
    event_bus: EventBus,
    object_store: Arc<ObjectStore>,
    volumes_base: PathBuf,
    guest_mount: String,
    /// When true, volumes are left on disk after a run so they can be inspected.
    dev_mode: bool,
}

impl TaskRunner {
    pub fn new(
        task: Arc<CompiledTask>,
        scheduler: Arc<dyn Scheduler>,
        event_bus: EventBus,
        object_store: Arc<ObjectStore>,
        volumes_base: PathBuf,
        guest_mount: String,
        dev_mode: bool,
    ) -> Self {
        Self {
            task,
            scheduler,
            event_bus,
            object_store,
            volumes_base,
            guest_mount,
            dev_mode,
        }
    }

    /// Run `invocation` to completion. A `DuplicateRun` from `before_start` is treated as
    /// already-processed and acknowledged rather than propagated.
    pub async fn invoke(&self, invocation: Invocation) -> Result<(), RunnerError> {
        let run_id = invocation.request_id;

        if let Err(err) = self
            .event_bus
            .before_start(
                run_id,
                self.task.run_name().to_string(),
                invocation.owner_id.clone(),
                invocation.parent_id.clone(),
                invocation.parameters.clone(),
            )
            .await
        {
            return match err {
                EventError::DuplicateRun(_) => {
                    info!(run_id = %run_id, "duplicate run delivery, treating as already-processed");
                    Ok(())
                }
                other => Err(RunnerError::Event(other)),
            };
        }

        let volume = match Volume::new(&self.volumes_base, &run_id.to_string(), self.guest_mount.clone()) {
            Ok(v) => v,
            Err(e) => {
                let err = RunnerError::IOFailure(e);
                self.fail(run_id, &err).await;
                return Err(err);
            }
        };

        let outcome = self.prepare_and_run(run_id, &invocation, &volume).await;

        if !self.dev_mode {
            if let Err(e) = volume.cleanup() {
                error!(run_id = %run_id, error = %e, "volume cleanup failed");
            }
        }

        match outcome {
            Ok(()) => Ok(()),
            Err(err) => {
                self.fail(run_id, &err).await;
                Err(err)
            }
        }
    }

    async fn fail(&self, run_id: Uuid, err: &RunnerError) {
        if let Err(e) = self
            .event_bus
            .on_error(run_id, err.reason().to_string(), err.message())
            .await
        {
            error!(run_id = %run_id, error = %e, "could not record run failure");
        }
    }

    async fn prepare_and_run(&self, run_id: Uuid, invocation: &Invocation, volume: &Volume) -> Result<(), RunnerError> {
        let details = schema::validate_parameters(&self.task, &invocation.parameters);
        if !details.is_empty() {
            return Err(RunnerError::ValidationError(details));
        }

        let params = invocation.parameters.as_object().cloned().unwrap_or_default();

        let mut substitutions = HashMap::new();
        substitutions.insert(RUN_DIR.to_string(), self.guest_mount.clone());

        let mut expected_outputs: HashMap<String, (String, FileType)> = HashMap::new();

        for (name, placeholder) in &self.task.command_placeholders {
            match placeholder.role {
                PlaceholderRole::Parameter => {
                    let value = resolve_param_value(&self.task, &params, name);

                    if placeholder.is_file {
                        let file_type = placeholder
                            .file_type
                            .ok_or_else(|| RunnerError::UnsupportedFileType(name.clone()))?;
                        let filename = format!("{name}-{}", Uuid::now_v7());
                        let content = file_codec::serialize_param(&value, file_type)
                            .map_err(|source| RunnerError::TypeError { name: name.clone(), source })?;
                        volume.write(&filename, &content)?;
                        substitutions.insert(name.clone(), format!("{}/{filename}", self.guest_mount));
                    } else {
                        substitutions.insert(name.clone(), scalar_to_string(&value));
                    }
                }
                PlaceholderRole::Output => {
                    if placeholder.is_file {
                        let file_type = placeholder
                            .file_type
                            .ok_or_else(|| RunnerError::UnsupportedFileType(name.clone()))?;
                        let filename = format!("{}.{file_type}", Uuid::now_v7());
                        substitutions.insert(name.clone(), format!("{}/{filename}", self.guest_mount));
                        expected_outputs.insert(name.clone(), (filename, file_type));
                    }
                }
            }
        }

        let command = safe_substitute(&self.task.command, &substitutions);

        let (tx, rx) = oneshot::channel::<Result<(Value, Vec<ArtifactFile>), RunnerError>>();

        let event_bus = self.event_bus.clone();
        let on_start: OnStart = Box::new(move || {
            Box::pin(async move {
                if let Err(e) = event_bus.on_start(run_id).await {
                    error!(run_id = %run_id, error = %e, "could not record run start");
                }
            })
        });

        let output_volume = volume.clone();
        let object_store = Arc::clone(&self.object_store);
        let run_id_str = run_id.to_string();
        let on_finish: OnFinish = Box::new(move || {
            Box::pin(async move {
                let outcome = collect_outputs(&output_volume, &expected_outputs, &object_store, &run_id_str).await;
                let _ = tx.send(outcome);
            })
        });

        self.scheduler
            .run(&run_id.to_string(), &self.task.image, &command, &volume.mount(), on_start, on_finish)
            .await?;

        let (result, files) = rx.await.map_err(|_| RunnerError::LostOutcome)??;

        self.event_bus.on_complete(run_id, result, files).await?;

        Ok(())
    }
}

async fn collect_outputs(
    volume: &Volume,
    expected_outputs: &HashMap<String, (String, FileType)>,
    object_store: &ObjectStore,
    run_id: &str,
) -> Result<(Value, Vec<ArtifactFile>), RunnerError> {
    let mut result = Map::new();
    for (name, (filename, file_type)) in expected_outputs {
        let content = volume.read(filename)?;
        let decoded = file_codec::deserialize_output(&content, *file_type)
            .map_err(|source| RunnerError::TypeError { name: name.clone(), source })?;
        result.insert(name.clone(), decoded);
    }

    let content_types_by_filename: HashMap<&str, FileType> = expected_outputs
        .values()
        .map(|(filename, file_type)| (filename.as_str(), *file_type))
        .collect();

    let mut files = volume.upload_files_to_object_store(object_store, run_id).await;
    for file in &mut files {
        if let Some(file_type) = content_types_by_filename.get(file.path.as_str()) {
            file.content_type = content_type_for_file_type(*file_type).to_string();
        }
    }

    Ok((Value::Object(result), files))
}

fn content_type_for_file_type(file_type: FileType) -> &'static str {
    match file_type {
        FileType::Txt => "text/plain",
        FileType::Json => "application/json",
        FileType::Jsonl => "application/x-ndjson",
        FileType::Csv => "text/csv",
    }
}

fn resolve_param_value(task: &CompiledTask, params: &Map<String, Value>, name: &str) -> Value {
    params
        .get(name)
        .cloned()
        .or_else(|| task.parameters.get(name).and_then(|decl| decl.default.clone()))
        .unwrap_or(Value::Null)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, LocalPubSub, RunStore};
    use crate::models::{OutputDecl, ParameterDecl, TaskSchema};
    use crate::schema::compile_task;
    use crate::storage::tests::test_db;
    use crate::volume::Mount;
    use serde_json::json;
    use std::collections::HashMap as Map;

    fn nmap_schema() -> TaskSchema {
        let mut parameters = Map::new();
        parameters.insert(
            "target".to_string(),
            ParameterDecl {
                description: String::new(),
                schema: json!({"type": "string"}),
                default: None,
                is_file: false,
                file_type: None,
            },
        );
        let mut outputs = Map::new();
        outputs.insert(
            "report".to_string(),
            OutputDecl {
                description: String::new(),
                schema: json!({"type": "object"}),
                is_file: true,
                file_type: Some(FileType::Json),
            },
        );

        TaskSchema {
            version: crate::models::TASK_SCHEMA_VERSION.to_string(),
            id: "nmap-scan".to_string(),
            name: None,
            description: None,
            image: "nmap:latest".to_string(),
            command: "nmap $target -oX $RUN_DIR/$report".to_string(),
            parameters,
            outputs,
        }
    }

    #[derive(Debug)]
    struct FakeScheduler {
        report_body: String,
    }

    #[async_trait::async_trait]
    impl Scheduler for FakeScheduler {
        async fn run(
            &self,
            _run_id: &str,
            _image: &str,
            _command: &str,
            mount: &Mount,
            on_start: OnStart,
            on_finish: OnFinish,
        ) -> Result<(), SchedulerError> {
            on_start().await;

            let report_path = std::fs::read_dir(&mount.host)
                .unwrap()
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .find(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
                .expect("an output filename should have been reserved");
            std::fs::write(&report_path, &self.report_body).unwrap();

            on_finish().await;
            Ok(())
        }
    }

    #[derive(Debug)]
    struct FailingScheduler {
        exit_code: i64,
        stderr: String,
    }

    #[async_trait::async_trait]
    impl Scheduler for FailingScheduler {
        async fn run(
            &self,
            _run_id: &str,
            _image: &str,
            _command: &str,
            _mount: &Mount,
            on_start: OnStart,
            _on_finish: OnFinish,
        ) -> Result<(), SchedulerError> {
            on_start().await;
            Err(SchedulerError::ContainerFailed { exit_code: self.exit_code, stderr: self.stderr.clone() })
        }
    }

    async fn runner_with_scheduler(
        dev_mode: bool,
        volumes_base: &std::path::Path,
        scheduler: Arc<dyn Scheduler>,
    ) -> TaskRunner {
        let compiled = compile_task(nmap_schema()).unwrap();
        let db = test_db().await;
        let event_bus = EventBus::new(RunStore::new(db), Arc::new(LocalPubSub::new()));
        let object_store_dir = volumes_base.join("store");
        let object_store = ObjectStore::new(&crate::conf::config::ObjectStore {
            root: object_store_dir.display().to_string(),
            url: None,
        })
        .unwrap();

        TaskRunner::new(
            Arc::new(compiled),
            scheduler,
            event_bus,
            Arc::new(object_store),
            volumes_base.to_path_buf(),
            "/workspace".to_string(),
            dev_mode,
        )
    }

    async fn runner(dev_mode: bool, volumes_base: &std::path::Path) -> TaskRunner {
        runner_with_scheduler(
            dev_mode,
            volumes_base,
            Arc::new(FakeScheduler { report_body: r#"{"hosts": 1}"#.to_string() }),
        )
        .await
    }

    #[tokio::test]
    async fn successful_invocation_completes_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(false, dir.path()).await;

        let run_id = Uuid::now_v7();
        runner
            .invoke(Invocation {
                request_id: run_id,
                owner_id: "u1".to_string(),
                parent_id: None,
                parameters: json!({"target": "1.1.1.1"}),
            })
            .await
            .unwrap();

        let run = runner.event_bus.get(run_id).await.unwrap();
        assert_eq!(run.status, crate::models::RunStatus::Success);
        assert_eq!(run.result, Some(json!({"report": {"hosts": 1}})));
        assert!(!run.files.is_empty());
    }

    #[tokio::test]
    async fn validation_failure_fails_the_run_without_starting_a_container() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(false, dir.path()).await;

        let run_id = Uuid::now_v7();
        let err = runner
            .invoke(Invocation {
                request_id: run_id,
                owner_id: "u1".to_string(),
                parent_id: None,
                parameters: json!({}),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::ValidationError(_)));

        let run = runner.event_bus.get(run_id).await.unwrap();
        assert_eq!(run.status, crate::models::RunStatus::Failed);
        assert_eq!(run.errors[0].reason, "ValidationError");
    }

    #[tokio::test]
    async fn dev_mode_leaves_the_volume_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(true, dir.path()).await;

        let run_id = Uuid::now_v7();
        runner
            .invoke(Invocation {
                request_id: run_id,
                owner_id: "u1".to_string(),
                parent_id: None,
                parameters: json!({"target": "1.1.1.1"}),
            })
            .await
            .unwrap();

        assert!(dir.path().join(run_id.to_string()).exists());
    }

    #[tokio::test]
    async fn duplicate_invocation_is_acknowledged_not_propagated() {
        let dir = tempfile::tempdir().unwrap();
        let runner = runner(false, dir.path()).await;

        let run_id = Uuid::now_v7();
        let invocation = Invocation {
            request_id: run_id,
            owner_id: "u1".to_string(),
            parent_id: None,
            parameters: json!({"target": "1.1.1.1"}),
        };

        runner.invoke(invocation.clone()).await.unwrap();
        runner.invoke(invocation).await.unwrap();
    }

    #[tokio::test]
    async fn container_failure_records_raw_stderr_as_the_message() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = Arc::new(FailingScheduler { exit_code: 2, stderr: "boom".to_string() });
        let runner = runner_with_scheduler(false, dir.path(), scheduler).await;

        let run_id = Uuid::now_v7();
        let err = runner
            .invoke(Invocation {
                request_id: run_id,
                owner_id: "u1".to_string(),
                parent_id: None,
                parameters: json!({"target": "1.1.1.1"}),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, RunnerError::Container(SchedulerError::ContainerFailed { exit_code: 2, .. })));

        let run = runner.event_bus.get(run_id).await.unwrap();
        assert_eq!(run.status, crate::models::RunStatus::Failed);
        assert_eq!(run.errors.last().unwrap().reason, "ContainerFailed");
        assert_eq!(run.errors.last().unwrap().message, "boom");
    }
}
