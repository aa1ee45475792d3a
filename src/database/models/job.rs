//! `SeaORM` Entity for queued jobs

use crate::{database::models::job_status::JobStatus, jobs::lifecycle::Transition};
use sea_orm::entity::prelude::*;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize)]
#[sea_orm(table_name = "job")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub created_at: DateTime,
    pub updated_at: DateTime,
    pub job_type: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: Json,
    pub queue_name: String,
    pub status: JobStatus,
    pub attempts: i32,
    pub max_tries: i32,
    pub available_at: DateTime,
    pub owner: Option<String>,
    pub lease_expires_at: Option<DateTime>,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::job_execution::Entity")]
    JobExecution,
}

impl Related<super::job_execution::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::JobExecution.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Apply a transition computed by the lifecycle state machine.
    ///
    /// Owner and lease are set together on claim and cleared together on
    /// every other transition, so they are non-null exactly while the job is
    /// `Processing`.
    pub fn apply(&mut self, transition: &Transition) {
        self.status = transition.next_status();

        match transition {
            Transition::Claimed {
                owner,
                attempts,
                lease_expires_at,
            } => {
                self.attempts = *attempts;
                self.owner = Some(owner.clone());
                self.lease_expires_at = Some(*lease_expires_at);
            }
            Transition::Completed { completed_at } => {
                self.completed_at = Some(*completed_at);
                self.last_error = None;
                self.release();
            }
            Transition::Retry {
                available_at,
                last_error,
            } => {
                self.available_at = *available_at;
                self.last_error = Some(last_error.clone());
                self.release();
            }
            Transition::Released { available_at } => {
                self.available_at = *available_at;
                self.release();
            }
            Transition::Dead { last_error } | Transition::Failed { last_error } => {
                self.last_error = Some(last_error.clone());
                self.release();
            }
        }
    }

    /// Renew the lease of a job this worker still holds.
    pub fn renew(&mut self, lease_expires_at: DateTime) {
        self.lease_expires_at = Some(lease_expires_at);
    }

    #[must_use]
    pub fn is_claimable(&self, now: DateTime) -> bool {
        self.status == JobStatus::Pending && self.available_at <= now && self.attempts < self.max_tries
    }

    #[must_use]
    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.status == JobStatus::Processing && self.owner.as_deref() == Some(owner)
    }

    #[must_use]
    pub fn lease_expired(&self, now: DateTime) -> bool {
        self.status == JobStatus::Processing
            && self
                .lease_expires_at
                .is_some_and(|lease_expires_at| lease_expires_at < now)
    }

    fn release(&mut self) {
        self.owner = None;
        self.lease_expires_at = None;
    }
}
