//! `SeaORM` Entity for the per-attempt audit trail

use crate::database::models::job_result::JobResult;
use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize)]
#[sea_orm(table_name = "job_execution")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub job_id: Uuid,
    pub attempt: i32,
    pub worker: String,
    pub result: JobResult,
    pub failure_reason: Option<String>,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::job::Entity",
        from = "Column::JobId",
        to = "super::job::Column::Id"
    )]
    Job,
}

impl Related<super::job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Job.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Build the audit row for a job that just left `Processing`.
    ///
    /// Must be called before the transition is applied, while `owner` still
    /// names the worker that held the lease.
    pub fn record(
        job: &super::job::Model,
        result: JobResult,
        failure_reason: Option<String>,
        now: DateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id: job.id,
            attempt: job.attempts,
            worker: job.owner.clone().unwrap_or_default(),
            result,
            failure_reason,
            created_at: now,
        }
    }
}
