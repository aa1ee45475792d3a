use std::{process, time::Duration};

use uuid::Uuid;

use crate::{
    config::Config,
    jobs::{
        lifecycle::after,
        store::{JobStore, NewJob, PostgresJobStore, StoreError},
    },
};

use super::store_or_exit;

/// Arguments of the `enqueue` command
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub job_type: String,
    pub queue: String,
    pub payload: String,
    pub max_tries: Option<i32>,
    pub delay_seconds: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("payload is not valid JSON: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub async fn handle_enqueue_command(config: &Config, request: EnqueueRequest) {
    let store = store_or_exit(config).await;

    match enqueue(&store, request, config.jobs.default_max_tries).await {
        Ok(job_id) => println!("📥 Enqueued job {job_id}"),
        Err(e) => {
            eprintln!("❌ Enqueue failed: {e}");
            process::exit(1);
        }
    }
}

async fn enqueue(
    store: &PostgresJobStore,
    request: EnqueueRequest,
    default_max_tries: i32,
) -> Result<Uuid, EnqueueError> {
    let new_job = build_new_job(request, store.now(), default_max_tries)?;
    Ok(store.enqueue(new_job).await?)
}

fn build_new_job(
    request: EnqueueRequest,
    now: chrono::NaiveDateTime,
    default_max_tries: i32,
) -> Result<NewJob, serde_json::Error> {
    let payload = serde_json::from_str(&request.payload)?;
    let mut new_job = NewJob::new(request.job_type, payload)
        .on_queue(request.queue)
        .max_tries(request.max_tries.unwrap_or(default_max_tries));

    if let Some(delay_seconds) = request.delay_seconds {
        new_job = new_job.available_at(after(now, Duration::from_secs(delay_seconds)));
    }

    Ok(new_job)
}
