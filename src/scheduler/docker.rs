use super::{OnFinish, OnStart, Scheduler, SchedulerError};
use crate::volume::Mount;
use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount as BollardMount, MountTypeEnum};
use dashmap::DashSet;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, error};

/// Per-engine settings, loaded from `[scheduler.docker]` in the config file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Whether to periodically prune stopped containers/dangling images.
    pub prune: bool,
    /// How often (seconds) the pruning background task runs.
    pub prune_interval: u64,
}

#[derive(Debug)]
pub struct Docker {
    client: Arc<bollard::Docker>,
    /// `run_id`s whose container was force-stopped via [`Docker::cancel`]; consulted by `run()`
    /// so a caller-initiated cancellation is reported as `ContainerCancelled` rather than
    /// `ContainerFailed`.
    cancelled: Arc<DashSet<String>>,
}

impl Docker {
    pub async fn new(config: Config) -> Result<Self, SchedulerError> {
        let client = bollard::Docker::connect_with_socket_defaults().map_err(|e| {
            SchedulerError::Connection(format!(
                "{e}; make sure the Docker daemon is installed and running"
            ))
        })?;
        let client = Arc::new(client);

        let version = client
            .version()
            .await
            .map_err(|e| SchedulerError::Connection(e.to_string()))?;
        debug!(version = ?version.version, "docker scheduler connected");

        if config.prune {
            let prune_client = Arc::clone(&client);
            let interval = config.prune_interval;
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
                    match prune_client.prune_containers::<String>(None).await {
                        Ok(response) => {
                            debug!(deleted = ?response.containers_deleted, "pruned containers")
                        }
                        Err(e) => error!(error = %e, "could not prune containers"),
                    }
                }
            });
        }

        Ok(Self {
            client,
            cancelled: Arc::new(DashSet::new()),
        })
    }

    /// Force-stop and remove a run's container, marking it cancelled so the in-flight `run()`
    /// call reports `ContainerCancelled` instead of a generic failure.
    pub async fn cancel(&self, run_id: &str) {
        let name = container_name(run_id);
        self.cancelled.insert(run_id.to_string());
        let _ = self
            .client
            .stop_container(&name, Some(bollard::container::StopContainerOptions { t: 0 }))
            .await;
    }

    async fn pull_if_missing(&self, image: &str) -> Result<(), SchedulerError> {
        use futures::stream::TryStreamExt;

        let mut filters = std::collections::HashMap::new();
        filters.insert("reference".to_string(), vec![image.to_string()]);

        let images = self
            .client
            .list_images(Some(bollard::image::ListImagesOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| SchedulerError::Unknown(e.to_string()))?;

        if images.is_empty() {
            self.client
                .create_image(
                    Some(CreateImageOptions {
                        from_image: image.to_string(),
                        ..Default::default()
                    }),
                    None,
                    None,
                )
                .try_collect::<Vec<_>>()
                .await
                .map_err(|e| SchedulerError::Unknown(format!("could not pull image: {e}")))?;
        }

        Ok(())
    }

    async fn collect_stderr(&self, name: &str) -> String {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: "200".to_string(),
            ..Default::default()
        };

        let mut logs = self.client.logs(name, Some(options));
        let mut stderr = String::new();

        while let Some(chunk) = logs.next().await {
            if let Ok(LogOutput::StdErr { message }) = chunk {
                stderr.push_str(&String::from_utf8_lossy(&message));
            }
        }

        stderr
    }
}

fn container_name(run_id: &str) -> String {
    format!("discovery-schema-{run_id}")
}

#[async_trait]
impl Scheduler for Docker {
    async fn run(
        &self,
        run_id: &str,
        image: &str,
        command: &str,
        mount: &Mount,
        on_start: OnStart,
        on_finish: OnFinish,
    ) -> Result<(), SchedulerError> {
        let name = container_name(run_id);
        self.cancelled.remove(run_id);

        self.pull_if_missing(image).await?;

        // A previous run under the same id may have left a stopped container behind.
        let _ = self
            .client
            .remove_container(
                &name,
                Some(RemoveContainerOptions {
                    v: true,
                    force: true,
                    ..Default::default()
                }),
            )
            .await;

        let host_config = HostConfig {
            mounts: Some(vec![BollardMount {
                target: Some(mount.guest.clone()),
                source: Some(mount.host.display().to_string()),
                typ: Some(MountTypeEnum::BIND),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let container_config = ContainerConfig {
            image: Some(image.to_string()),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), command.to_string()]),
            host_config: Some(host_config),
            ..Default::default()
        };

        self.client
            .create_container(Some(CreateContainerOptions { name: name.clone(), platform: None }), container_config)
            .await
            .map_err(|e| SchedulerError::Unknown(format!("could not create container: {e}")))?;

        self.client
            .start_container::<String>(&name, None)
            .await
            .map_err(|e| SchedulerError::Unknown(format!("could not start container: {e}")))?;

        on_start().await;

        let wait_result = self
            .client
            .wait_container(&name, None::<WaitContainerOptions<String>>)
            .next()
            .await;

        let outcome = match wait_result {
            Some(Ok(response)) => {
                if response.status_code == 0 {
                    on_finish().await;
                    Ok(())
                } else if self.cancelled.remove(run_id).is_some() {
                    Err(SchedulerError::ContainerCancelled)
                } else {
                    let stderr = self.collect_stderr(&name).await;
                    Err(SchedulerError::ContainerFailed {
                        exit_code: response.status_code,
                        stderr,
                    })
                }
            }
            Some(Err(e)) => {
                if self.cancelled.remove(run_id).is_some() {
                    Err(SchedulerError::ContainerCancelled)
                } else {
                    Err(SchedulerError::Unknown(format!("container wait failed: {e}")))
                }
            }
            None => Err(SchedulerError::Unknown("container wait produced no result".into())),
        };

        let _ = self
            .client
            .remove_container(
                &name,
                Some(RemoveContainerOptions {
                    v: true,
                    force: true,
                    ..Default::default()
                }),
            )
            .await;

        outcome
    }
}
