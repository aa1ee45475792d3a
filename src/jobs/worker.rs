use std::{
    env,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::{
    sync::watch,
    task::{JoinError, JoinSet},
    time::{interval_at, sleep, timeout},
};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::{
    config::WorkerQueueConfig,
    database::models::job,
    jobs::{job_registry::JobRegistry, store::JobStore, JobContext, JobError},
};

const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

/// Name used as lease owner prefix for every worker in this process.
#[must_use]
pub fn hostname() -> String {
    env::var("WORKER_ID")
        .or_else(|_| env::var("HOSTNAME"))
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "worker".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub name: String,
    pub capacity: u32,
    pub queues: Vec<String>,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

/// Totals for one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Jobs left to the reaper: lease lost, result not recorded, or aborted at shutdown
    pub abandoned: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Failed,
    Abandoned,
}

#[derive(Clone)]
pub struct Worker {
    identity: Arc<WorkerIdentity>,
    config: Arc<WorkerQueueConfig>,
    store: Arc<dyn JobStore>,
    job_registry: Arc<JobRegistry>,
    counters: Arc<Counters>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        config: WorkerQueueConfig,
        store: Arc<dyn JobStore>,
        job_registry: Arc<JobRegistry>,
    ) -> Self {
        let identity = WorkerIdentity {
            name: name.into(),
            capacity: config.capacity.max(1),
            queues: config.queues.clone(),
        };

        Self {
            identity: Arc::new(identity),
            config: Arc::new(config),
            store,
            job_registry,
            counters: Arc::default(),
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            processed: self.counters.processed.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Claim and run jobs until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// Store errors never end the loop; they are logged and the claim is
    /// retried after the base poll interval.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
        let name = &self.identity.name;
        let capacity = self.identity.capacity as usize;
        let poll_interval = self.config.poll_interval();
        let mut idle_interval = poll_interval;
        let mut tasks: JoinSet<Outcome> = JoinSet::new();

        info!(
            "👷 Worker '{}' started on queues {:?} (capacity {})",
            name, self.identity.queues, capacity
        );

        while !is_shutting_down(&shutdown) {
            while let Some(result) = tasks.try_join_next() {
                self.record(result);
            }

            let available = capacity.saturating_sub(tasks.len());
            if available == 0 {
                tokio::select! {
                    Some(result) = tasks.join_next() => self.record(result),
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            let batch_size = available.min(self.config.batch_size as usize) as u64;
            let delay = match self
                .store
                .claim_batch(
                    &self.identity.queues,
                    name,
                    batch_size,
                    self.config.lease_duration(),
                )
                .await
            {
                Ok(jobs) if !jobs.is_empty() => {
                    idle_interval = poll_interval;
                    for job_model in jobs {
                        debug!(
                            "🔧 Worker '{}' claimed {}({}) attempt {}/{}",
                            name,
                            job_model.job_type,
                            job_model.id,
                            job_model.attempts,
                            job_model.max_tries
                        );
                        tasks.spawn(self.clone().execute(job_model));
                    }
                    continue;
                }
                Ok(_) if tasks.is_empty() => {
                    let delay = idle_interval;
                    idle_interval = self.next_idle_interval(idle_interval);
                    delay
                }
                Ok(_) => poll_interval,
                Err(e) => {
                    error!("❌ Worker '{}' failed to claim jobs: {}", name, e);
                    poll_interval
                }
            };

            trace!("Worker '{}' sleeping {:?}", name, delay);
            tokio::select! {
                () = sleep(delay) => {}
                _ = shutdown.changed() => {}
                Some(result) = tasks.join_next(), if !tasks.is_empty() => self.record(result),
            }
        }

        self.drain(tasks).await;

        let stats = self.stats();
        info!(
            "🛑 Worker '{}' stopped: {} processed, {} succeeded, {} failed, {} abandoned",
            name, stats.processed, stats.succeeded, stats.failed, stats.abandoned
        );
        stats
    }

    fn next_idle_interval(&self, current: Duration) -> Duration {
        current
            .mul_f64(self.config.poll_backoff_factor.max(1.0))
            .min(self.config.max_poll_interval())
            .max(self.config.poll_interval())
    }

    /// Give running jobs the grace period, then abort whatever is left.
    async fn drain(&self, mut tasks: JoinSet<Outcome>) {
        if tasks.is_empty() {
            return;
        }

        let grace = self.config.shutdown_grace();
        info!(
            "⏳ Worker '{}' waiting up to {:?} for {} active job(s)",
            self.identity.name,
            grace,
            tasks.len()
        );

        let drained = timeout(grace, async {
            while let Some(result) = tasks.join_next().await {
                self.record(result);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "⚠️ Worker '{}' aborting {} job(s) after grace period; their leases will expire",
                self.identity.name,
                tasks.len()
            );
            tasks.abort_all();
            while let Some(result) = tasks.join_next().await {
                self.record(result);
            }
        }
    }

    fn record(&self, result: Result<Outcome, JoinError>) {
        let counter = match result {
            Ok(Outcome::Succeeded) => &self.counters.succeeded,
            Ok(Outcome::Failed) => &self.counters.failed,
            Ok(Outcome::Abandoned) => &self.counters.abandoned,
            Err(e) => {
                if e.is_panic() {
                    error!("💥 Job task on worker '{}' panicked: {}", self.identity.name, e);
                }
                &self.counters.abandoned
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.counters.processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Run one claimed job and report its result to the store.
    async fn execute(self, job_model: job::Model) -> Outcome {
        let name = &self.identity.name;
        let job_timeout = self.config.job_timeout();
        let context = JobContext {
            job_id: job_model.id,
            job_type: job_model.job_type.clone(),
            queue_name: job_model.queue_name.clone(),
            attempt: job_model.attempts,
            store: self.store.clone(),
        };

        let start_time = Instant::now();
        let execution = timeout(
            job_timeout,
            self.job_registry
                .execute(context, &job_model.job_type, &job_model.payload),
        );

        let result = tokio::select! {
            result = execution => result.unwrap_or(Err(JobError::TimedOut(job_timeout))),
            () = self.heartbeat(job_model.id) => {
                warn!(
                    "💔 Worker '{}' lost the lease on {}({}); abandoning it",
                    name, job_model.job_type, job_model.id
                );
                return Outcome::Abandoned;
            }
        };
        let execution_duration = start_time.elapsed();

        match result {
            Ok(()) => match self.store.mark_completed(job_model.id, name).await {
                Ok(true) => {
                    info!(
                        "✅ Worker '{}' completed job {}({}) in {:?}",
                        name, job_model.job_type, job_model.id, execution_duration
                    );
                    Outcome::Succeeded
                }
                Ok(false) => {
                    warn!(
                        "⚠️ Worker '{}' finished {}({}) after losing its lease; result discarded",
                        name, job_model.job_type, job_model.id
                    );
                    Outcome::Abandoned
                }
                Err(e) => {
                    error!(
                        "❌ Worker '{}' could not record completion of {}({}): {}",
                        name, job_model.job_type, job_model.id, e
                    );
                    Outcome::Abandoned
                }
            },
            Err(job_error) => match self.store.mark_failed(job_model.id, name, &job_error).await {
                Ok(true) => {
                    log_failure(name, &job_model, &job_error, execution_duration);
                    Outcome::Failed
                }
                Ok(false) => {
                    warn!(
                        "⚠️ Worker '{}' failed {}({}) after losing its lease; result discarded: {}",
                        name, job_model.job_type, job_model.id, job_error
                    );
                    Outcome::Abandoned
                }
                Err(e) => {
                    error!(
                        "❌ Worker '{}' could not record failure of {}({}): {}",
                        name, job_model.job_type, job_model.id, e
                    );
                    Outcome::Abandoned
                }
            },
        }
    }

    /// Renew the lease every third of its duration. Resolves only once the
    /// lease is gone.
    async fn heartbeat(&self, job_id: Uuid) {
        let lease_duration = self.config.lease_duration();
        let period = (lease_duration / 3).max(MIN_HEARTBEAT);
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);

        loop {
            ticker.tick().await;
            match self
                .store
                .renew_lease(job_id, &self.identity.name, lease_duration)
                .await
            {
                Ok(true) => trace!("Renewed lease on {}", job_id),
                Ok(false) => return,
                Err(e) => warn!("Failed to renew lease on {}: {}", job_id, e),
            }
        }
    }
}

fn log_failure(name: &str, job_model: &job::Model, job_error: &JobError, elapsed: Duration) {
    if !job_error.is_retryable() {
        error!(
            "❌ Worker '{}' failed job {}({}) permanently in {:?}: {}",
            name, job_model.job_type, job_model.id, elapsed, job_error
        );
    } else if job_model.attempts >= job_model.max_tries {
        error!(
            "☠️ Worker '{}' gave up on job {}({}) after {} tries: {}",
            name, job_model.job_type, job_model.id, job_model.attempts, job_error
        );
    } else {
        warn!(
            "⚠️ Worker '{}' will retry job {}({}) after {:?}: {}",
            name, job_model.job_type, job_model.id, elapsed, job_error
        );
    }
}

fn is_shutting_down(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow() || shutdown.has_changed().is_err()
}
