use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tracing::{debug, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    clock::Clock,
    database::models::{job, job_execution, job_status::JobStatus},
    jobs::{
        lifecycle::{after, Event},
        retry_policy::RetryPolicy,
        JobError,
    },
};

use super::{advance, JobFilter, JobStore, NewJob, PurgeCutoff, QueueStats, StoreError};

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<Uuid, job::Model>,
    executions: Vec<job_execution::Model>,
}

/// In-process [`JobStore`].
///
/// Every operation runs under a single mutex, which gives claims the same
/// exclusivity `SKIP LOCKED` gives the Postgres store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<Mutex<State>>,
    clock: Clock,
    retry_policy: RetryPolicy,
}

impl MemoryJobStore {
    #[must_use]
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            state: Arc::default(),
            clock: Clock::System,
            retry_policy,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, job_id: Uuid, owner: &str, event: Event<'_>) -> Result<bool, StoreError> {
        let now = self.now();
        let mut state = self.state();

        let Some(job_model) = state
            .jobs
            .get_mut(&job_id)
            .filter(|job_model| job_model.is_owned_by(owner))
        else {
            return Ok(false);
        };

        let execution = advance(job_model, event, now, &self.retry_policy)?;
        state.executions.extend(execution);
        Ok(true)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    async fn enqueue(&self, new_job: NewJob) -> Result<Uuid, StoreError> {
        new_job.validate()?;
        let now = self.now();

        let job_model = job::Model {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            job_type: new_job.job_type,
            payload: new_job.payload,
            queue_name: new_job.queue_name,
            status: JobStatus::Pending,
            attempts: 0,
            max_tries: new_job.max_tries,
            available_at: new_job.available_at.unwrap_or(now),
            owner: None,
            lease_expires_at: None,
            last_error: None,
            completed_at: None,
        };

        debug!(
            "📥 Enqueued {}({}) on '{}'",
            job_model.job_type, job_model.id, job_model.queue_name
        );

        let job_id = job_model.id;
        self.state().jobs.insert(job_id, job_model);
        Ok(job_id)
    }

    async fn claim_batch(
        &self,
        queue_names: &[String],
        owner: &str,
        batch_size: u64,
        lease_duration: Duration,
    ) -> Result<Vec<job::Model>, StoreError> {
        if queue_names.is_empty() || batch_size == 0 {
            return Ok(Vec::new());
        }

        let now = self.now();
        let lease_expires_at = after(now, lease_duration);
        let mut state = self.state();

        let mut candidates: Vec<_> = state
            .jobs
            .values()
            .filter(|job_model| queue_names.contains(&job_model.queue_name))
            .filter(|job_model| job_model.is_claimable(now))
            .map(|job_model| (job_model.available_at, job_model.created_at, job_model.id))
            .collect();
        candidates.sort_unstable();
        candidates.truncate(usize::try_from(batch_size).unwrap_or(usize::MAX));

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, _, job_id) in candidates {
            let Some(job_model) = state.jobs.get_mut(&job_id) else {
                continue;
            };
            let event = Event::Claim {
                owner,
                lease_expires_at,
            };
            advance(job_model, event, now, &self.retry_policy)?;
            claimed.push(job_model.clone());
        }

        Ok(claimed)
    }

    async fn mark_completed(&self, job_id: Uuid, owner: &str) -> Result<bool, StoreError> {
        self.finish(job_id, owner, Event::Complete { owner })
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        owner: &str,
        error: &JobError,
    ) -> Result<bool, StoreError> {
        self.finish(job_id, owner, Event::Fail { owner, error })
    }

    async fn renew_lease(
        &self,
        job_id: Uuid,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<bool, StoreError> {
        let lease_expires_at = after(self.now(), lease_duration);
        let mut state = self.state();

        match state.jobs.get_mut(&job_id) {
            Some(job_model) if job_model.is_owned_by(owner) => {
                job_model.renew(lease_expires_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reclaim_expired(&self, now: NaiveDateTime) -> Result<u64, StoreError> {
        let mut state = self.state();
        let State { jobs, executions } = &mut *state;

        let mut reclaimed = 0;
        for job_model in jobs.values_mut().filter(|job_model| job_model.lease_expired(now)) {
            let owner = job_model.owner.clone().unwrap_or_default();
            let execution = advance(job_model, Event::LeaseExpired, now, &self.retry_policy)?;
            executions.extend(execution);

            warn!(
                "🏥 Reclaimed {}({}) from '{}' after lease expiry, now {}",
                job_model.job_type, job_model.id, owner, job_model.status
            );
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    async fn stats(&self, queue_name: Option<&str>) -> Result<QueueStats, StoreError> {
        let state = self.state();

        let mut stats = QueueStats::default();
        for job_model in state.jobs.values() {
            if queue_name.is_none_or(|queue_name| job_model.queue_name == queue_name) {
                stats.record(job_model.status, 1);
            }
        }
        Ok(stats)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<job::Model>, StoreError> {
        Ok(self.state().jobs.get(&job_id).cloned())
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<job::Model>, StoreError> {
        let state = self.state();

        let mut jobs: Vec<_> = state
            .jobs
            .values()
            .filter(|job_model| filter.matches(job_model))
            .cloned()
            .collect();
        jobs.sort_by_key(|job_model| (job_model.created_at, job_model.id));

        Ok(jobs
            .into_iter()
            .skip(usize::try_from(filter.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(filter.limit).unwrap_or(usize::MAX))
            .collect())
    }

    async fn executions(&self, job_id: Uuid) -> Result<Vec<job_execution::Model>, StoreError> {
        let state = self.state();

        let mut executions: Vec<_> = state
            .executions
            .iter()
            .filter(|execution| execution.job_id == job_id)
            .cloned()
            .collect();
        executions.sort_by_key(|execution| (execution.attempt, execution.created_at));
        Ok(executions)
    }

    async fn purge_terminal(
        &self,
        cutoff: &PurgeCutoff,
        batch_size: u64,
    ) -> Result<u64, StoreError> {
        let mut state = self.state();
        let State { jobs, executions } = &mut *state;

        let mut old_jobs: Vec<_> = jobs
            .values()
            .filter(|job_model| cutoff.matches(job_model))
            .map(|job_model| (job_model.created_at, job_model.id))
            .collect();
        old_jobs.sort_unstable();
        old_jobs.truncate(usize::try_from(batch_size).unwrap_or(usize::MAX));

        for (_, job_id) in &old_jobs {
            jobs.remove(job_id);
        }
        executions.retain(|execution| jobs.contains_key(&execution.job_id));

        Ok(old_jobs.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{database::models::job_result::JobResult, jobs::store::DEFAULT_MAX_TRIES};
    use std::collections::HashSet;

    const LEASE: Duration = Duration::from_secs(30);

    fn start() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-06-01 08:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn store() -> (MemoryJobStore, Clock) {
        let clock = Clock::manual(start());
        let retry_policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60), 0.2);
        (MemoryJobStore::new(retry_policy).with_clock(clock.clone()), clock)
    }

    fn queues() -> Vec<String> {
        vec!["default".to_string()]
    }

    async fn enqueue(store: &MemoryJobStore) -> Uuid {
        store
            .enqueue(NewJob::new("send_email", serde_json::json!({ "to": "a@b.c" })))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_creates_pending_job() {
        let (store, _) = store();

        let job_id = enqueue(&store).await;
        let job_model = store.get(job_id).await.unwrap().unwrap();

        assert_eq!(job_model.status, JobStatus::Pending);
        assert_eq!(job_model.attempts, 0);
        assert_eq!(job_model.max_tries, DEFAULT_MAX_TRIES);
        assert_eq!(job_model.available_at, start());
        assert_eq!(job_model.owner, None);
    }

    #[tokio::test]
    async fn test_enqueue_rejects_invalid_job() {
        let (store, _) = store();

        let result = store
            .enqueue(NewJob::new("send_email", serde_json::Value::Null).max_tries(0))
            .await;

        assert!(matches!(result, Err(StoreError::Validation(_))));
        assert_eq!(store.stats(None).await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_claim_respects_available_at_and_queue() {
        let (store, clock) = store();

        store
            .enqueue(
                NewJob::new("later", serde_json::Value::Null)
                    .available_at(start() + chrono::Duration::seconds(10)),
            )
            .await
            .unwrap();
        store
            .enqueue(NewJob::new("elsewhere", serde_json::Value::Null).on_queue("other"))
            .await
            .unwrap();

        let claimed = store.claim_batch(&queues(), "worker-1", 10, LEASE).await.unwrap();
        assert!(claimed.is_empty());

        clock.advance(chrono::Duration::seconds(10));
        let claimed = store.claim_batch(&queues(), "worker-1", 10, LEASE).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].job_type, "later");
    }

    #[tokio::test]
    async fn test_claim_orders_by_available_at_and_honors_batch_size() {
        let (store, _) = store();

        let older = store
            .enqueue(
                NewJob::new("older", serde_json::Value::Null)
                    .available_at(start() - chrono::Duration::seconds(5)),
            )
            .await
            .unwrap();
        enqueue(&store).await;
        enqueue(&store).await;

        let claimed = store.claim_batch(&queues(), "worker-1", 2, LEASE).await.unwrap();

        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, older);
        assert_eq!(store.stats(None).await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_empty_claim_inputs_return_nothing() {
        let (store, _) = store();
        enqueue(&store).await;

        assert!(store.claim_batch(&[], "worker-1", 5, LEASE).await.unwrap().is_empty());
        assert!(store.claim_batch(&queues(), "worker-1", 0, LEASE).await.unwrap().is_empty());
        assert_eq!(store.stats(None).await.unwrap().pending, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_never_overlap() {
        let (store, _) = store();
        for _ in 0..50 {
            enqueue(&store).await;
        }

        let mut handles = Vec::new();
        for worker in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let owner = format!("worker-{worker}");
                let mut ids = Vec::new();
                loop {
                    let batch = store.claim_batch(&queues(), &owner, 2, LEASE).await.unwrap();
                    if batch.is_empty() {
                        break;
                    }
                    ids.extend(batch.into_iter().map(|job_model| job_model.id));
                    tokio::task::yield_now().await;
                }
                ids
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "job {id} claimed twice");
            }
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn test_single_job_goes_to_exactly_one_of_two_workers() {
        let (store, _) = store();
        enqueue(&store).await;

        let first = store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();
        let second = store.claim_batch(&queues(), "worker-2", 1, LEASE).await.unwrap();

        assert_eq!(first.len() + second.len(), 1);
    }

    #[tokio::test]
    async fn test_three_failures_end_dead() {
        let (store, clock) = store();
        let job_id = enqueue(&store).await;
        let error = JobError::TryAgainLater("smtp unavailable".to_string());

        for _ in 0..3 {
            let claimed = store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();
            assert_eq!(claimed.len(), 1);
            assert!(store.mark_failed(job_id, "worker-1", &error).await.unwrap());
            clock.advance(chrono::Duration::minutes(5));
        }

        let job_model = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job_model.status, JobStatus::Dead);
        assert_eq!(job_model.attempts, 3);
        assert_eq!(job_model.last_error.as_deref(), Some("smtp unavailable"));

        // Dead is final
        let claimed = store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();
        assert!(claimed.is_empty());
        assert_eq!(store.reclaim_expired(clock.now()).await.unwrap(), 0);
        assert_eq!(store.get(job_id).await.unwrap().unwrap(), job_model);

        let executions = store.executions(job_id).await.unwrap();
        let attempts: Vec<_> = executions.iter().map(|e| e.attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_retry_waits_at_least_the_backoff_floor() {
        let (store, _) = store();
        let job_id = enqueue(&store).await;
        let error = JobError::TryAgainLater("busy".to_string());

        store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();
        let failed_at = store.now();
        store.mark_failed(job_id, "worker-1", &error).await.unwrap();

        let job_model = store.get(job_id).await.unwrap().unwrap();
        let floor = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60), 0.2).floor(1);

        assert_eq!(job_model.status, JobStatus::Pending);
        assert!(job_model.available_at > failed_at);
        assert!(job_model.available_at >= after(failed_at, floor));

        // Not claimable until the backoff has passed
        let claimed = store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let (store, clock) = store();
        let job_id = enqueue(&store).await;
        let error = JobError::FailPermanently("unknown recipient".to_string());

        store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();
        assert!(store.mark_failed(job_id, "worker-1", &error).await.unwrap());

        clock.advance(chrono::Duration::hours(1));
        let claimed = store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();

        assert!(claimed.is_empty());
        assert_eq!(
            store.get(job_id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_stale_owner_is_rejected_without_changes() {
        let (store, _) = store();
        let job_id = enqueue(&store).await;
        store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();
        let before = store.get(job_id).await.unwrap().unwrap();

        let error = JobError::TryAgainLater("x".to_string());
        assert!(!store.mark_completed(job_id, "worker-2").await.unwrap());
        assert!(!store.mark_failed(job_id, "worker-2", &error).await.unwrap());
        assert!(!store.renew_lease(job_id, "worker-2", LEASE).await.unwrap());
        assert!(!store.mark_completed(Uuid::new_v4(), "worker-1").await.unwrap());

        assert_eq!(store.get(job_id).await.unwrap().unwrap(), before);
        assert!(store.executions(job_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completed_job_cannot_be_finished_again() {
        let (store, _) = store();
        let job_id = enqueue(&store).await;
        store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();

        assert!(store.mark_completed(job_id, "worker-1").await.unwrap());
        assert!(!store.mark_completed(job_id, "worker-1").await.unwrap());

        let job_model = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job_model.status, JobStatus::Completed);
        assert_eq!(job_model.completed_at, Some(start()));
        assert_eq!(store.executions(job_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_crashed_worker_job_is_reclaimed_and_claimed_again() {
        let (store, clock) = store();
        let job_id = enqueue(&store).await;

        // worker-1 claims and then disappears
        store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();

        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(store.reclaim_expired(clock.now()).await.unwrap(), 0);

        clock.advance(chrono::Duration::seconds(31));
        assert_eq!(store.reclaim_expired(clock.now()).await.unwrap(), 1);

        let job_model = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job_model.status, JobStatus::Pending);
        assert_eq!(job_model.attempts, 1);
        assert_eq!(job_model.owner, None);
        assert_eq!(job_model.lease_expires_at, None);

        let claimed = store.claim_batch(&queues(), "worker-2", 1, LEASE).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].attempts, 2);

        // The first worker finally reports back and is ignored
        assert!(!store.mark_completed(job_id, "worker-1").await.unwrap());
        assert!(store.mark_completed(job_id, "worker-2").await.unwrap());

        let results: Vec<_> = store
            .executions(job_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.worker, e.result))
            .collect();
        assert_eq!(
            results,
            vec![
                ("worker-1".to_string(), JobResult::LeaseExpired),
                ("worker-2".to_string(), JobResult::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_reclaim_is_idempotent() {
        let (store, clock) = store();
        let job_id = enqueue(&store).await;
        store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();

        clock.advance(chrono::Duration::minutes(1));
        let now = clock.now();

        assert_eq!(store.reclaim_expired(now).await.unwrap(), 1);
        let after_first = store.get(job_id).await.unwrap().unwrap();

        assert_eq!(store.reclaim_expired(now).await.unwrap(), 0);
        assert_eq!(store.get(job_id).await.unwrap().unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_lease_expiry_on_last_try_is_dead() {
        let (store, clock) = store();
        let job_id = store
            .enqueue(NewJob::new("slow", serde_json::Value::Null).max_tries(1))
            .await
            .unwrap();
        store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();

        clock.advance(chrono::Duration::minutes(1));
        store.reclaim_expired(clock.now()).await.unwrap();

        let job_model = store.get(job_id).await.unwrap().unwrap();
        assert_eq!(job_model.status, JobStatus::Dead);
        assert_eq!(job_model.attempts, 1);
    }

    #[tokio::test]
    async fn test_renew_lease_keeps_job_from_reaper() {
        let (store, clock) = store();
        let job_id = enqueue(&store).await;
        store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();

        clock.advance(chrono::Duration::seconds(20));
        assert!(store.renew_lease(job_id, "worker-1", LEASE).await.unwrap());

        clock.advance(chrono::Duration::seconds(20));
        assert_eq!(store.reclaim_expired(clock.now()).await.unwrap(), 0);
        assert_eq!(
            store.get(job_id).await.unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_stats_and_list_filter_by_queue() {
        let (store, _) = store();
        enqueue(&store).await;
        enqueue(&store).await;
        store
            .enqueue(NewJob::new("report", serde_json::Value::Null).on_queue("reports"))
            .await
            .unwrap();
        store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();

        let stats = store.stats(Some("default")).await.unwrap();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.processing, 1);
        assert_eq!(stats.total(), 2);
        assert_eq!(store.stats(None).await.unwrap().total(), 3);

        let filter = JobFilter {
            queue_name: Some("reports".to_string()),
            ..Default::default()
        };
        let reports = store.list(&filter).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].job_type, "report");

        let filter = JobFilter {
            status: Some(JobStatus::Processing),
            ..Default::default()
        };
        assert_eq!(store.list(&filter).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_purge_removes_only_old_terminal_jobs() {
        let (store, clock) = store();
        let first = enqueue(&store).await;
        let second = enqueue(&store).await;
        let claimed = store.claim_batch(&queues(), "worker-1", 1, LEASE).await.unwrap();
        let done = claimed[0].id;
        let waiting = if done == first { second } else { first };
        store.mark_completed(done, "worker-1").await.unwrap();

        clock.advance(chrono::Duration::days(2));
        let cutoff = PurgeCutoff {
            completed_before: clock.now() - chrono::Duration::days(1),
            failed_before: clock.now() - chrono::Duration::days(1),
        };

        assert_eq!(store.purge_terminal(&cutoff, 100).await.unwrap(), 1);
        assert!(store.get(done).await.unwrap().is_none());
        assert!(store.executions(done).await.unwrap().is_empty());
        assert!(store.get(waiting).await.unwrap().is_some());
        assert_eq!(store.purge_terminal(&cutoff, 100).await.unwrap(), 0);
    }
}
