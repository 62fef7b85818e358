//! The Container Executor: launches a single container from an image and a command string,
//! bind-mounting one [`crate::volume::Mount`], and reports process start, completion, and exit
//! status back to the caller via two callbacks.
//!
//! A `Scheduler` trait plus an `Engine` enum (`scheduler::Engine`, `scheduler::docker::Docker`),
//! a per-engine `SchedulerError` enum, and a docker pruning background task. The contract is
//! narrow on purpose: `run(image, command, mount, on_start, on_finish)` is all a one-shot task
//! container needs, with no networking or registry-auth surface for long-running containers.

pub mod docker;

pub use docker::Docker;

use crate::volume::Mount;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use std::fmt::Debug;
use strum::{Display, EnumString};

#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    #[error("could not init scheduler; {0}")]
    FailedPrecondition(String),

    #[error("could not connect to scheduler; {0}")]
    Connection(String),

    #[error("container exited non-zero (exit_code={exit_code}): {stderr}")]
    ContainerFailed { exit_code: i64, stderr: String },

    #[error("container run was cancelled")]
    ContainerCancelled,

    #[error("unexpected scheduler error occurred; {0}")]
    Unknown(String),
}

/// Invoked exactly once, right after the container is confirmed started. Returns a future so a
/// caller can do async work (e.g. a database write) without a separate executor thread; `run()`
/// awaits it in place on the calling task.
pub type OnStart = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
/// Invoked exactly once, only when the container exits with status zero. Same async contract as
/// [`OnStart`].
pub type OnFinish = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// The Container Executor contract. `on_start`/`on_finish` are awaited on the same task that
/// called `run()` — there is no separate executor thread, so a caller performing async database
/// work in either callback does so on its own calling context, not a handed-off one.
#[async_trait]
pub trait Scheduler: Debug + Send + Sync {
    async fn run(
        &self,
        run_id: &str,
        image: &str,
        command: &str,
        mount: &Mount,
        on_start: OnStart,
        on_finish: OnFinish,
    ) -> Result<(), SchedulerError>;
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Display, EnumString)]
pub enum Engine {
    Docker,
}

impl Default for Engine {
    fn default() -> Self {
        Engine::Docker
    }
}

pub async fn init_scheduler(
    config: &crate::conf::config::Scheduler,
) -> Result<std::sync::Arc<dyn Scheduler>, SchedulerError> {
    match config.engine {
        Engine::Docker => {
            let docker_config = config.docker.clone().ok_or_else(|| {
                SchedulerError::FailedPrecondition("docker engine settings not found in config".into())
            })?;
            let engine = Docker::new(docker_config).await?;
            Ok(std::sync::Arc::new(engine))
        }
    }
}
