use chrono::NaiveDateTime;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::jobs::{
    lifecycle::after,
    store::{JobStore, MemoryJobStore, NewJob, StoreError, DEFAULT_MAX_TRIES, DEFAULT_QUEUE},
    Job,
};

#[derive(Debug, Error)]
pub enum JobQueueError {
    #[error("failed to serialize job arguments: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Where and when an added job should run
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub queue_name: Option<String>,
    pub max_tries: Option<i32>,
    pub available_at: Option<NaiveDateTime>,
}

impl EnqueueOptions {
    #[must_use]
    pub fn on_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    #[must_use]
    pub const fn max_tries(mut self, max_tries: i32) -> Self {
        self.max_tries = Some(max_tries);
        self
    }

    #[must_use]
    pub const fn available_at(mut self, available_at: NaiveDateTime) -> Self {
        self.available_at = Some(available_at);
        self
    }
}

/// Typed producer handle over a [`JobStore`].
#[derive(Clone, Debug)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    default_max_tries: i32,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, default_max_tries: i32) -> Self {
        Self {
            store,
            default_max_tries,
        }
    }

    /// Queue backed by a fresh [`MemoryJobStore`], for tests
    pub fn memory() -> (Self, MemoryJobStore) {
        let store = MemoryJobStore::default();
        (Self::new(Arc::new(store.clone()), DEFAULT_MAX_TRIES), store)
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Add a job to the default queue, available immediately
    pub async fn add<J: Job>(&self, arguments: J::Arguments) -> Result<Uuid, JobQueueError>
    where
        J::Arguments: serde::Serialize,
    {
        self.add_with::<J>(arguments, EnqueueOptions::default()).await
    }

    pub async fn add_with<J: Job>(
        &self,
        arguments: J::Arguments,
        options: EnqueueOptions,
    ) -> Result<Uuid, JobQueueError>
    where
        J::Arguments: serde::Serialize,
    {
        let payload = serde_json::to_value(arguments)?;
        let mut new_job = NewJob::new(J::name(), payload)
            .on_queue(options.queue_name.unwrap_or_else(|| DEFAULT_QUEUE.to_string()))
            .max_tries(options.max_tries.unwrap_or(self.default_max_tries));
        new_job.available_at = options.available_at;

        Ok(self.store.enqueue(new_job).await?)
    }

    /// Add a job that becomes claimable after `delay`
    pub async fn add_in<J: Job>(
        &self,
        arguments: J::Arguments,
        delay: std::time::Duration,
    ) -> Result<Uuid, JobQueueError>
    where
        J::Arguments: serde::Serialize,
    {
        let options = EnqueueOptions::default().available_at(after(self.store.now(), delay));
        self.add_with::<J>(arguments, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        database::models::job_status::JobStatus,
        jobs::{JobContext, JobError},
    };
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct InvoiceArguments {
        invoice_id: u32,
    }

    struct SendInvoiceJob;

    impl Job for SendInvoiceJob {
        type Arguments = InvoiceArguments;

        async fn execute(_: &JobContext, _: Self::Arguments) -> Result<(), JobError> {
            Ok(())
        }

        fn name() -> &'static str {
            "send_invoice"
        }
    }

    #[tokio::test]
    async fn test_add_uses_defaults() {
        let (queue, store) = JobQueue::memory();

        let job_id = queue
            .add::<SendInvoiceJob>(InvoiceArguments { invoice_id: 7 })
            .await
            .unwrap();

        let job_model = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job_model.job_type, "send_invoice");
        assert_eq!(job_model.queue_name, DEFAULT_QUEUE);
        assert_eq!(job_model.max_tries, DEFAULT_MAX_TRIES);
        assert_eq!(job_model.status, JobStatus::Pending);
        assert_eq!(job_model.payload, serde_json::json!({ "invoice_id": 7 }));
    }

    #[tokio::test]
    async fn test_add_with_options() {
        let store = MemoryJobStore::default();
        let queue = JobQueue::new(Arc::new(store.clone()), 8);

        let job_id = queue
            .add_with::<SendInvoiceJob>(
                InvoiceArguments { invoice_id: 1 },
                EnqueueOptions::default().on_queue("billing"),
            )
            .await
            .unwrap();

        let job_model = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job_model.queue_name, "billing");
        assert_eq!(job_model.max_tries, 8);
    }

    #[tokio::test]
    async fn test_add_in_delays_claim() {
        let (queue, store) = JobQueue::memory();

        queue
            .add_in::<SendInvoiceJob>(InvoiceArguments { invoice_id: 2 }, Duration::from_secs(3600))
            .await
            .unwrap();

        let claimed = store
            .claim_batch(&[DEFAULT_QUEUE.to_string()], "w", 10, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_add_rejects_invalid_max_tries() {
        let (queue, _) = JobQueue::memory();

        let result = queue
            .add_with::<SendInvoiceJob>(
                InvoiceArguments { invoice_id: 3 },
                EnqueueOptions::default().max_tries(0),
            )
            .await;

        assert!(matches!(
            result,
            Err(JobQueueError::Store(StoreError::Validation(_)))
        ));
    }
}
