use sea_orm::DeriveActiveEnum;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Where a job sits in its lifecycle.
///
/// # State Transitions
///
/// - `Pending` → `Processing` (claimed by a worker, lease granted)
/// - `Processing` → `Completed` (handler succeeded)
/// - `Processing` → `Pending` (retryable failure or expired lease, tries left)
/// - `Processing` → `Dead` (retries exhausted)
/// - `Processing` → `Failed` (handler declared the failure permanent)
///
/// `Completed`, `Failed` and `Dead` are terminal.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    EnumIter,
    EnumString,
    Display,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "job_status")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[derive(Default)]
pub enum JobStatus {
    /// Waiting for a worker. Only claimable once `available_at` has passed.
    #[sea_orm(string_value = "pending")]
    #[default]
    Pending,

    /// Leased to exactly one worker until `lease_expires_at`.
    ///
    /// If the worker goes silent, the reaper moves the job back to `Pending`
    /// (or to `Dead` when no tries are left) after the lease expires.
    #[sea_orm(string_value = "processing")]
    Processing,

    /// Handler finished without error.
    #[sea_orm(string_value = "completed")]
    Completed,

    /// Handler reported a permanent failure; never retried.
    #[sea_orm(string_value = "failed")]
    Failed,

    /// Every allowed attempt was used up.
    #[sea_orm(string_value = "dead")]
    Dead,
}

impl JobStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Dead)
    }

    pub const fn is_processing(&self) -> bool {
        matches!(self, Self::Processing)
    }

    pub const fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}
