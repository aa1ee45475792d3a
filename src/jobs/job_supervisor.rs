use chrono::NaiveDateTime;
use sea_orm::DatabaseConnection;
use std::{collections::HashSet, future::Future, sync::Arc, time::Duration};
use tokio::{sync::watch, task::JoinSet, time::sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    config::{CleanupConfig, ConfigError, JobsConfig, WorkerQueueConfig, WorkersConfig},
    jobs::{
        advisory_lock::{self, lock_keys},
        reaper::run_reaper,
        scheduler::{parse_cron_schedule, Scheduler},
        store::{JobStore, PurgeCutoff, StoreError},
        worker::{hostname, Worker},
    },
};

use super::{job_registry::JobRegistry, scheduled_job::ScheduledJob};

const RESTART_DELAY: Duration = Duration::from_secs(10);
const CLEANUP_BATCH_PAUSE: Duration = Duration::from_millis(100);

/// Check every schedule parses and warn about scheduled jobs no pool will pick up.
fn verify_schedule(
    workers_config: &WorkersConfig,
    job_registry: &JobRegistry,
    job_schedule: &[ScheduledJob],
) -> Result<(), ConfigError> {
    let covered_queues: HashSet<&str> = workers_config
        .workers
        .values()
        .flat_map(|queue_config| queue_config.queues.iter().map(String::as_str))
        .collect();

    for scheduled_job in job_schedule {
        parse_cron_schedule(scheduled_job).map_err(|e| ConfigError::InvalidSchedule {
            name: scheduled_job.name.clone(),
            reason: e.to_string(),
        })?;

        if !covered_queues.contains(scheduled_job.queue_name.as_str()) {
            warn!(
                "⚠️ Scheduled job '{}' targets queue '{}', which no worker pool polls",
                scheduled_job.name, scheduled_job.queue_name
            );
        }
        if job_registry.resolve(scheduled_job.job_name).is_none() {
            warn!(
                "⚠️ Scheduled job '{}' uses unregistered job type '{}'",
                scheduled_job.name, scheduled_job.job_name
            );
        }
    }

    Ok(())
}

/// Run every background part of the job system until `shutdown` turns `true`.
///
/// With `lock_db`, the scheduler and cleanup task are elected across all
/// processes through `PostgreSQL` advisory locks; without it they simply run
/// in this process. Returns once all workers have drained.
pub async fn job_supervisor(
    jobs_config: JobsConfig,
    store: Arc<dyn JobStore>,
    lock_db: Option<DatabaseConnection>,
    job_registry: JobRegistry,
    job_schedule: Vec<ScheduledJob>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ConfigError> {
    jobs_config.validate()?;
    verify_schedule(&jobs_config.workers, &job_registry, &job_schedule)?;

    let job_registry = Arc::new(job_registry);
    let mut tasks = JoinSet::new();

    // Start all worker pools
    start_worker_pools(&mut tasks, &jobs_config.workers, &store, &job_registry, &shutdown);

    tasks.spawn(run_reaper(
        store.clone(),
        Duration::from_secs(jobs_config.reaper.interval_seconds),
        shutdown.clone(),
    ));

    // Start the scheduler
    let scheduler_store = store.clone();
    start_singleton(
        &mut tasks,
        lock_db.clone(),
        lock_keys::SCHEDULER,
        "scheduler",
        shutdown.clone(),
        move || {
            let scheduler = Scheduler::new(scheduler_store.clone(), job_schedule.clone());
            async move {
                info!("📅 Starting job scheduler");
                scheduler.run().await;
            }
        },
    );

    // Start the job cleanup task
    let cleanup_config = jobs_config.cleanup.clone();
    let cleanup_store = store.clone();
    start_singleton(
        &mut tasks,
        lock_db,
        lock_keys::CLEANUP,
        "job cleanup",
        shutdown.clone(),
        move || {
            let config = cleanup_config.clone();
            let store = cleanup_store.clone();
            async move {
                info!("🧹 Starting job cleanup task");
                run_cleanup_loop(&config, store.as_ref()).await;
            }
        },
    );

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            error!("💥 Supervisor task failed: {}", e);
        }
    }

    info!("🛑 Job system stopped");
    Ok(())
}

/// Start all worker pools based on configuration
fn start_worker_pools(
    tasks: &mut JoinSet<()>,
    config: &WorkersConfig,
    store: &Arc<dyn JobStore>,
    job_registry: &Arc<JobRegistry>,
    shutdown: &watch::Receiver<bool>,
) {
    info!("🚀 Starting job workers");
    let host = hostname();

    for (pool_name, worker_config) in &config.workers {
        info!(
            "⚡ Pool '{}': {} workers for queues {:?}",
            pool_name, worker_config.count, worker_config.queues
        );

        for index in 0..worker_config.count {
            tasks.spawn(run_worker_with_restart(
                format!("{host}-{pool_name}-{index}"),
                worker_config.clone(),
                store.clone(),
                job_registry.clone(),
                shutdown.clone(),
            ));
        }
    }
}

/// Lease owner for one worker run.
///
/// The readable prefix may repeat across processes (same host, or no
/// `HOSTNAME` at all), so every run gets its own random suffix.
fn worker_name(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Run a worker with automatic restart on crash
async fn run_worker_with_restart(
    worker_prefix: String,
    worker_config: WorkerQueueConfig,
    store: Arc<dyn JobStore>,
    job_registry: Arc<JobRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut restart_count = 0;
    loop {
        let worker_instance_name = worker_name(&worker_prefix);
        debug!(
            "Starting worker '{}' for queues {:?} (restart #{})",
            worker_instance_name, worker_config.queues, restart_count
        );

        let worker = Worker::new(
            worker_instance_name.clone(),
            worker_config.clone(),
            store.clone(),
            job_registry.clone(),
        );
        let worker_shutdown = shutdown.clone();

        match tokio::spawn(async move { worker.run(worker_shutdown).await }).await {
            Ok(_) => return,
            Err(e) => {
                error!(
                    "💥 Worker '{}' crashed (restart #{}) - error: {}",
                    worker_instance_name, restart_count, e
                );
            }
        }

        restart_count += 1;

        tokio::select! {
            () = sleep(RESTART_DELAY) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// Run a task on one process only (advisory lock) or locally when there is no database.
fn start_singleton<F, Fut>(
    tasks: &mut JoinSet<()>,
    lock_db: Option<DatabaseConnection>,
    lock_key: i64,
    task_name: &'static str,
    mut shutdown: watch::Receiver<bool>,
    task_fn: F,
) where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    match lock_db {
        Some(db) => {
            tasks.spawn(async move {
                advisory_lock::run_with_advisory_lock(db, lock_key, task_name, shutdown, task_fn)
                    .await;
            });
        }
        None => {
            tasks.spawn(async move {
                tokio::select! {
                    () = task_fn() => warn!("{} stopped", task_name),
                    _ = shutdown.changed() => {}
                }
            });
        }
    }
}

async fn run_cleanup_loop(config: &CleanupConfig, store: &dyn JobStore) {
    loop {
        match cleanup_old_jobs(config, store).await {
            Ok(0) => debug!("🧹 No old jobs to clean up"),
            Ok(deleted) => info!("🧹 Deleted {} old jobs", deleted),
            Err(e) => error!("🧹 Failed to clean up old jobs: {}", e),
        }

        // Wait for the configured interval between cleanup runs
        sleep(Duration::from_secs(config.interval_seconds)).await;
    }
}

/// Delete terminal jobs past their retention, one batch at a time.
async fn cleanup_old_jobs(config: &CleanupConfig, store: &dyn JobStore) -> Result<u64, StoreError> {
    let now = store.now();
    let cutoff = PurgeCutoff {
        completed_before: retention_cutoff(now, config.completed_retention_seconds),
        failed_before: retention_cutoff(now, config.failed_retention_seconds),
    };

    let mut total = 0;
    loop {
        let deleted = store.purge_terminal(&cutoff, config.batch_size).await?;
        total += deleted;

        if deleted < config.batch_size {
            break;
        }
        debug!("🧹 Deleted batch of {} old jobs", deleted);

        // Small delay between batches to avoid overwhelming the database
        sleep(CLEANUP_BATCH_PAUSE).await;
    }

    Ok(total)
}

fn retention_cutoff(now: NaiveDateTime, retention_seconds: u64) -> NaiveDateTime {
    i64::try_from(retention_seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|retention| now.checked_sub_signed(retention))
        .unwrap_or(NaiveDateTime::MIN)
}
