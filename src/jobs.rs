mod advisory_lock;
pub mod job_registry;
pub mod job_supervisor;
pub mod lifecycle;
pub mod reaper;
pub mod retry_policy;
pub mod scheduled_job;
mod scheduler;
pub mod store;
pub mod worker;

use serde::de::DeserializeOwned;
use std::{future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use uuid::Uuid;

use store::JobStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Do not retry; the job ends `failed`
    #[error("{0}")]
    FailPermanently(String),
    #[error("{0}")]
    TryAgainLater(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

impl JobError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::FailPermanently(_))
    }
}

/// What a handler knows about the attempt it is running.
#[derive(Clone, Debug)]
pub struct JobContext {
    pub job_id: Uuid,
    pub job_type: String,
    pub queue_name: String,
    /// 1-based attempt number
    pub attempt: i32,
    /// Store the job came from, for enqueueing follow-up work
    pub store: Arc<dyn JobStore>,
}

pub trait Job: Send + Sync {
    type Arguments: DeserializeOwned + Send + Sync;

    fn execute(
        context: &JobContext,
        arguments: Self::Arguments,
    ) -> impl Future<Output = Result<(), JobError>> + Send;

    fn name() -> &'static str;
}
