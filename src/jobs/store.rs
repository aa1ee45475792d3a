//! Durable job storage.
//!
//! [`JobStore`] is the only path that mutates a job. Each operation is
//! atomic on its own: it either applies a full lifecycle transition together
//! with its audit row, or changes nothing.

mod memory;
mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PostgresJobStore;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, time::Duration};
use thiserror::Error;
use tracing::trace;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::database::models::{job, job_execution, job_status::JobStatus};

use super::{
    lifecycle::{self, Event, LifecycleError},
    retry_policy::RetryPolicy,
    JobError,
};

pub const DEFAULT_QUEUE: &str = "default";
pub const DEFAULT_MAX_TRIES: i32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("invalid job: {0}")]
    Validation(#[from] ValidationErrors),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// A job as submitted by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct NewJob {
    #[validate(length(min = 1, max = 100))]
    pub job_type: String,
    pub payload: serde_json::Value,
    #[validate(length(min = 1, max = 100))]
    pub queue_name: String,
    #[validate(range(min = 1, max = 100))]
    pub max_tries: i32,
    /// Not claimable before this instant; `None` means now
    pub available_at: Option<NaiveDateTime>,
}

impl NewJob {
    pub fn new(job_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            job_type: job_type.into(),
            payload,
            queue_name: DEFAULT_QUEUE.to_string(),
            max_tries: DEFAULT_MAX_TRIES,
            available_at: None,
        }
    }

    #[must_use]
    pub fn on_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    #[must_use]
    pub const fn max_tries(mut self, max_tries: i32) -> Self {
        self.max_tries = max_tries;
        self
    }

    #[must_use]
    pub const fn available_at(mut self, available_at: NaiveDateTime) -> Self {
        self.available_at = Some(available_at);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
}

impl QueueStats {
    pub fn record(&mut self, status: JobStatus, count: u64) {
        let slot = match status {
            JobStatus::Pending => &mut self.pending,
            JobStatus::Processing => &mut self.processing,
            JobStatus::Completed => &mut self.completed,
            JobStatus::Failed => &mut self.failed,
            JobStatus::Dead => &mut self.dead,
        };
        *slot += count;
    }

    #[must_use]
    pub const fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
            JobStatus::Dead => self.dead,
        }
    }

    #[must_use]
    pub const fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.dead
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub queue_name: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: u64,
    pub offset: u64,
}

impl Default for JobFilter {
    fn default() -> Self {
        Self {
            queue_name: None,
            status: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl JobFilter {
    fn matches(&self, job: &job::Model) -> bool {
        self.queue_name
            .as_deref()
            .is_none_or(|queue_name| job.queue_name == queue_name)
            && self.status.is_none_or(|status| job.status == status)
    }
}

/// Age limits for deleting terminal jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeCutoff {
    /// Completed jobs finished before this instant are deleted
    pub completed_before: NaiveDateTime,
    /// Failed and dead jobs last updated before this instant are deleted
    pub failed_before: NaiveDateTime,
}

impl PurgeCutoff {
    fn matches(&self, job: &job::Model) -> bool {
        match job.status {
            JobStatus::Completed => {
                job.completed_at.unwrap_or(job.updated_at) <= self.completed_before
            }
            JobStatus::Failed | JobStatus::Dead => job.updated_at <= self.failed_before,
            JobStatus::Pending | JobStatus::Processing => false,
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync + Debug {
    /// The store's notion of the current time.
    fn now(&self) -> NaiveDateTime;

    /// Insert a `pending` job and return its id.
    async fn enqueue(&self, new_job: NewJob) -> Result<Uuid, StoreError>;

    /// Atomically lease up to `batch_size` eligible jobs from `queue_names` to
    /// `owner`. Jobs locked by a concurrent claim are skipped, never waited on.
    async fn claim_batch(
        &self,
        queue_names: &[String],
        owner: &str,
        batch_size: u64,
        lease_duration: Duration,
    ) -> Result<Vec<job::Model>, StoreError>;

    /// Returns `false` without changing anything unless `owner` holds the job.
    async fn mark_completed(&self, job_id: Uuid, owner: &str) -> Result<bool, StoreError>;

    /// Returns `false` without changing anything unless `owner` holds the job.
    async fn mark_failed(
        &self,
        job_id: Uuid,
        owner: &str,
        error: &JobError,
    ) -> Result<bool, StoreError>;

    /// Push the lease deadline to `now + lease_duration` while `owner` still holds the job.
    async fn renew_lease(
        &self,
        job_id: Uuid,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<bool, StoreError>;

    /// Release every job whose lease expired before `now`. Returns how many.
    async fn reclaim_expired(&self, now: NaiveDateTime) -> Result<u64, StoreError>;

    async fn stats(&self, queue_name: Option<&str>) -> Result<QueueStats, StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<job::Model>, StoreError>;

    async fn list(&self, filter: &JobFilter) -> Result<Vec<job::Model>, StoreError>;

    /// Audit trail of a job, oldest attempt first.
    async fn executions(&self, job_id: Uuid) -> Result<Vec<job_execution::Model>, StoreError>;

    /// Delete at most `batch_size` terminal jobs older than `cutoff`. Returns how many.
    async fn purge_terminal(
        &self,
        cutoff: &PurgeCutoff,
        batch_size: u64,
    ) -> Result<u64, StoreError>;
}

/// Run `event` through the lifecycle and apply the result to `job`.
///
/// Returns the audit row when the event ended an attempt.
pub(crate) fn advance(
    job: &mut job::Model,
    event: Event<'_>,
    now: NaiveDateTime,
    retry_policy: &RetryPolicy,
) -> Result<Option<job_execution::Model>, LifecycleError> {
    let transition = lifecycle::transition(job, event, now, retry_policy)?;
    let execution = event
        .outcome()
        .map(|(result, reason)| job_execution::Model::record(job, result, reason, now));

    trace!(
        "Job {}({}) {} -> {}",
        job.job_type,
        job.id,
        job.status,
        transition.next_status()
    );

    job.apply(&transition);
    job.updated_at = now;
    Ok(execution)
}
