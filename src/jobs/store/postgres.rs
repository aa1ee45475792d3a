use async_trait::async_trait;
use chrono::NaiveDateTime;
use sea_orm::{
    sea_query::{Expr, LockBehavior, LockType},
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    clock::Clock,
    database::models::{
        job::{self, Entity as JobEntity},
        job_execution::{self, Entity as JobExecutionEntity},
        job_status::JobStatus,
    },
    jobs::{
        lifecycle::{after, Event},
        retry_policy::RetryPolicy,
        JobError,
    },
};

use super::{advance, JobFilter, JobStore, NewJob, PurgeCutoff, QueueStats, StoreError};

/// [`JobStore`] over the `job` and `job_execution` tables.
///
/// Claims and reclaims lock rows with `FOR UPDATE SKIP LOCKED`, so any
/// number of processes can share one database without blocking each other
/// or handing the same job to two workers.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    db: DatabaseConnection,
    clock: Clock,
    retry_policy: RetryPolicy,
}

impl PostgresJobStore {
    #[must_use]
    pub fn new(db: DatabaseConnection, retry_policy: RetryPolicy) -> Self {
        Self {
            db,
            clock: Clock::System,
            retry_policy,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub const fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Apply an attempt-ending event to a job still leased to `owner`.
    async fn finish(&self, job_id: Uuid, owner: &str, event: Event<'_>) -> Result<bool, StoreError> {
        let now = self.now();
        let txn = self.db.begin().await?;

        let job_option = JobEntity::find_by_id(job_id)
            .filter(job::Column::Status.eq(JobStatus::Processing))
            .filter(job::Column::Owner.eq(owner))
            .lock_exclusive()
            .one(&txn)
            .await?;

        let Some(mut job_model) = job_option else {
            txn.commit().await?;
            return Ok(false);
        };

        let execution = advance(&mut job_model, event, now, &self.retry_policy)?;
        save(&txn, &job_model, execution).await?;

        txn.commit().await?;
        Ok(true)
    }
}

/// Write the mutable columns of `job_model` and its audit row, if any.
async fn save(
    txn: &DatabaseTransaction,
    job_model: &job::Model,
    execution: Option<job_execution::Model>,
) -> Result<(), StoreError> {
    let mut active_model: job::ActiveModel = job_model.clone().into();
    active_model.status = Set(job_model.status);
    active_model.attempts = Set(job_model.attempts);
    active_model.available_at = Set(job_model.available_at);
    active_model.owner = Set(job_model.owner.clone());
    active_model.lease_expires_at = Set(job_model.lease_expires_at);
    active_model.last_error = Set(job_model.last_error.clone());
    active_model.completed_at = Set(job_model.completed_at);
    active_model.update(txn).await?;

    if let Some(execution) = execution {
        job_execution::ActiveModel::from(execution).insert(txn).await?;
    }

    Ok(())
}

#[async_trait]
impl JobStore for PostgresJobStore {
    fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    async fn enqueue(&self, new_job: NewJob) -> Result<Uuid, StoreError> {
        new_job.validate()?;
        let now = self.now();

        let job_model = job::ActiveModel {
            id: Set(Uuid::new_v4()),
            created_at: Set(now),
            updated_at: Set(now),
            job_type: Set(new_job.job_type),
            payload: Set(new_job.payload),
            queue_name: Set(new_job.queue_name),
            status: Set(JobStatus::Pending),
            attempts: Set(0),
            max_tries: Set(new_job.max_tries),
            available_at: Set(new_job.available_at.unwrap_or(now)),
            owner: Set(None),
            lease_expires_at: Set(None),
            last_error: Set(None),
            completed_at: Set(None),
        }
        .insert(&self.db)
        .await?;

        debug!(
            "📥 Enqueued {}({}) on '{}'",
            job_model.job_type, job_model.id, job_model.queue_name
        );

        Ok(job_model.id)
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
        let txn = self.db.begin().await?;

        let candidates = JobEntity::find()
            .filter(job::Column::Status.eq(JobStatus::Pending))
            .filter(job::Column::QueueName.is_in(queue_names.iter().map(String::as_str)))
            .filter(job::Column::AvailableAt.lte(now))
            .filter(Expr::col(job::Column::Attempts).lt(Expr::col(job::Column::MaxTries)))
            .order_by_asc(job::Column::AvailableAt)
            .order_by_asc(job::Column::CreatedAt)
            .limit(batch_size)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(&txn)
            .await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for mut job_model in candidates {
            let event = Event::Claim {
                owner,
                lease_expires_at,
            };
            let execution = advance(&mut job_model, event, now, &self.retry_policy)?;
            save(&txn, &job_model, execution).await?;
            claimed.push(job_model);
        }

        // Handlers only ever see committed claims
        txn.commit().await?;
        Ok(claimed)
    }

    async fn mark_completed(&self, job_id: Uuid, owner: &str) -> Result<bool, StoreError> {
        self.finish(job_id, owner, Event::Complete { owner }).await
    }

    async fn mark_failed(
        &self,
        job_id: Uuid,
        owner: &str,
        error: &JobError,
    ) -> Result<bool, StoreError> {
        self.finish(job_id, owner, Event::Fail { owner, error }).await
    }

    async fn renew_lease(
        &self,
        job_id: Uuid,
        owner: &str,
        lease_duration: Duration,
    ) -> Result<bool, StoreError> {
        let lease_expires_at = after(self.now(), lease_duration);

        let result = JobEntity::update_many()
            .col_expr(job::Column::LeaseExpiresAt, Expr::value(lease_expires_at))
            .filter(job::Column::Id.eq(job_id))
            .filter(job::Column::Status.eq(JobStatus::Processing))
            .filter(job::Column::Owner.eq(owner))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn reclaim_expired(&self, now: NaiveDateTime) -> Result<u64, StoreError> {
        let txn = self.db.begin().await?;

        let expired = JobEntity::find()
            .filter(job::Column::Status.eq(JobStatus::Processing))
            .filter(job::Column::LeaseExpiresAt.lt(now))
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(&txn)
            .await?;

        let mut reclaimed = 0;
        for mut job_model in expired {
            let owner = job_model.owner.clone().unwrap_or_default();
            let execution = advance(&mut job_model, Event::LeaseExpired, now, &self.retry_policy)?;
            save(&txn, &job_model, execution).await?;

            warn!(
                "🏥 Reclaimed {}({}) from '{}' after lease expiry, now {}",
                job_model.job_type, job_model.id, owner, job_model.status
            );
            reclaimed += 1;
        }

        txn.commit().await?;
        Ok(reclaimed)
    }

    async fn stats(&self, queue_name: Option<&str>) -> Result<QueueStats, StoreError> {
        let mut query = JobEntity::find()
            .select_only()
            .column(job::Column::Status)
            .column_as(Expr::col(job::Column::Id).count(), "count")
            .group_by(job::Column::Status);

        if let Some(queue_name) = queue_name {
            query = query.filter(job::Column::QueueName.eq(queue_name));
        }

        let counts: Vec<(JobStatus, i64)> = query.into_tuple().all(&self.db).await?;

        let mut stats = QueueStats::default();
        for (status, count) in counts {
            stats.record(status, u64::try_from(count).unwrap_or_default());
        }
        Ok(stats)
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<job::Model>, StoreError> {
        Ok(JobEntity::find_by_id(job_id).one(&self.db).await?)
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<job::Model>, StoreError> {
        let mut query = JobEntity::find();

        if let Some(queue_name) = &filter.queue_name {
            query = query.filter(job::Column::QueueName.eq(queue_name.as_str()));
        }
        if let Some(status) = filter.status {
            query = query.filter(job::Column::Status.eq(status));
        }

        Ok(query
            .order_by_asc(job::Column::CreatedAt)
            .order_by_asc(job::Column::Id)
            .limit(filter.limit)
            .offset(filter.offset)
            .all(&self.db)
            .await?)
    }

    async fn executions(&self, job_id: Uuid) -> Result<Vec<job_execution::Model>, StoreError> {
        Ok(JobExecutionEntity::find()
            .filter(job_execution::Column::JobId.eq(job_id))
            .order_by_asc(job_execution::Column::Attempt)
            .order_by_asc(job_execution::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    async fn purge_terminal(
        &self,
        cutoff: &PurgeCutoff,
        batch_size: u64,
    ) -> Result<u64, StoreError> {
        let old_job_ids: Vec<Uuid> = JobEntity::find()
            .select_only()
            .column(job::Column::Id)
            .filter(
                Condition::any()
                    .add(
                        Condition::all()
                            .add(job::Column::Status.eq(JobStatus::Completed))
                            .add(job::Column::CompletedAt.lte(cutoff.completed_before)),
                    )
                    .add(
                        Condition::all()
                            .add(job::Column::Status.is_in([JobStatus::Failed, JobStatus::Dead]))
                            .add(job::Column::UpdatedAt.lte(cutoff.failed_before)),
                    ),
            )
            .order_by_asc(job::Column::CreatedAt)
            .limit(batch_size)
            .into_tuple()
            .all(&self.db)
            .await?;

        if old_job_ids.is_empty() {
            return Ok(0);
        }

        // Executions go with their job through the cascading foreign key
        let result = JobEntity::delete_many()
            .filter(job::Column::Id.is_in(old_job_ids))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}
