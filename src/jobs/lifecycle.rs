//! State machine for a single job.
//!
//! Every status change the store makes goes through [`transition`], which is
//! pure: it reads the current row, the event and the clock, and returns what
//! the row must become. Persisting the result is the store's job.

use chrono::NaiveDateTime;
use thiserror::Error;
use uuid::Uuid;

use crate::database::models::{job, job_result::JobResult, job_status::JobStatus};

use super::{retry_policy::RetryPolicy, JobError};

pub const LEASE_EXPIRED: &str = "lease expired";

#[derive(Debug, Clone, Copy)]
pub enum Event<'a> {
    Claim {
        owner: &'a str,
        lease_expires_at: NaiveDateTime,
    },
    Complete {
        owner: &'a str,
    },
    Fail {
        owner: &'a str,
        error: &'a JobError,
    },
    LeaseExpired,
}

impl Event<'_> {
    const fn name(&self) -> &'static str {
        match self {
            Self::Claim { .. } => "claim",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::LeaseExpired => "expire lease",
        }
    }

    /// Audit result and failure reason for events that end an attempt.
    #[must_use]
    pub fn outcome(&self) -> Option<(JobResult, Option<String>)> {
        match self {
            Self::Claim { .. } => None,
            Self::Complete { .. } => Some((JobResult::Completed, None)),
            Self::Fail {
                error: error @ JobError::TimedOut(_),
                ..
            } => Some((JobResult::TimedOut, Some(error.to_string()))),
            Self::Fail { error, .. } => Some((JobResult::Failed, Some(error.to_string()))),
            Self::LeaseExpired => Some((JobResult::LeaseExpired, Some(LEASE_EXPIRED.to_string()))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Claimed {
        owner: String,
        attempts: i32,
        lease_expires_at: NaiveDateTime,
    },
    Completed {
        completed_at: NaiveDateTime,
    },
    /// Retryable failure; eligible again after backoff
    Retry {
        available_at: NaiveDateTime,
        last_error: String,
    },
    /// Lease expired with tries left; eligible immediately
    Released {
        available_at: NaiveDateTime,
    },
    Dead {
        last_error: String,
    },
    Failed {
        last_error: String,
    },
}

impl Transition {
    #[must_use]
    pub const fn next_status(&self) -> JobStatus {
        match self {
            Self::Claimed { .. } => JobStatus::Processing,
            Self::Completed { .. } => JobStatus::Completed,
            Self::Retry { .. } | Self::Released { .. } => JobStatus::Pending,
            Self::Dead { .. } => JobStatus::Dead,
            Self::Failed { .. } => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("job {job_id} is {status} and cannot change state")]
    Terminal { job_id: Uuid, status: JobStatus },
    #[error("job {job_id} cannot {event} while {status}")]
    InvalidTransition {
        job_id: Uuid,
        status: JobStatus,
        event: &'static str,
    },
    #[error("job {job_id} is not available until {available_at}")]
    NotAvailable {
        job_id: Uuid,
        available_at: NaiveDateTime,
    },
    #[error("job {job_id} has used {attempts} of {max_tries} tries")]
    TriesExhausted {
        job_id: Uuid,
        attempts: i32,
        max_tries: i32,
    },
    #[error("job {job_id} is not leased to '{owner}'")]
    NotOwner { job_id: Uuid, owner: String },
    #[error("lease on job {job_id} has not expired")]
    LeaseNotExpired { job_id: Uuid },
}

/// Compute the next state of `job` after `event` at `now`.
pub fn transition(
    job: &job::Model,
    event: Event<'_>,
    now: NaiveDateTime,
    retry_policy: &RetryPolicy,
) -> Result<Transition, LifecycleError> {
    if job.status.is_terminal() {
        return Err(LifecycleError::Terminal {
            job_id: job.id,
            status: job.status,
        });
    }

    match event {
        Event::Claim {
            owner,
            lease_expires_at,
        } => {
            expect_status(job, JobStatus::Pending, &event)?;
            if job.available_at > now {
                return Err(LifecycleError::NotAvailable {
                    job_id: job.id,
                    available_at: job.available_at,
                });
            }
            if job.attempts >= job.max_tries {
                return Err(LifecycleError::TriesExhausted {
                    job_id: job.id,
                    attempts: job.attempts,
                    max_tries: job.max_tries,
                });
            }

            Ok(Transition::Claimed {
                owner: owner.to_string(),
                attempts: job.attempts + 1,
                lease_expires_at,
            })
        }
        Event::Complete { owner } => {
            expect_owner(job, owner, &event)?;
            Ok(Transition::Completed { completed_at: now })
        }
        Event::Fail { owner, error } => {
            expect_owner(job, owner, &event)?;
            let last_error = error.to_string();

            if !error.is_retryable() {
                Ok(Transition::Failed { last_error })
            } else if job.attempts >= job.max_tries {
                Ok(Transition::Dead { last_error })
            } else {
                Ok(Transition::Retry {
                    available_at: after(now, retry_policy.backoff(job.attempts)),
                    last_error,
                })
            }
        }
        Event::LeaseExpired => {
            expect_status(job, JobStatus::Processing, &event)?;
            if !job.lease_expired(now) {
                return Err(LifecycleError::LeaseNotExpired { job_id: job.id });
            }

            if job.attempts >= job.max_tries {
                Ok(Transition::Dead {
                    last_error: LEASE_EXPIRED.to_string(),
                })
            } else {
                Ok(Transition::Released { available_at: now })
            }
        }
    }
}

fn expect_status(
    job: &job::Model,
    status: JobStatus,
    event: &Event<'_>,
) -> Result<(), LifecycleError> {
    if job.status == status {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTransition {
            job_id: job.id,
            status: job.status,
            event: event.name(),
        })
    }
}

fn expect_owner(job: &job::Model, owner: &str, event: &Event<'_>) -> Result<(), LifecycleError> {
    expect_status(job, JobStatus::Processing, event)?;
    if job.is_owned_by(owner) {
        Ok(())
    } else {
        Err(LifecycleError::NotOwner {
            job_id: job.id,
            owner: owner.to_string(),
        })
    }
}

/// `now + delay`, saturating instead of overflowing.
#[must_use]
pub fn after(now: NaiveDateTime, delay: std::time::Duration) -> NaiveDateTime {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(NaiveDateTime::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn now() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2025-03-01 10:00:00", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(2), Duration::from_secs(60), 0.5)
    }

    fn pending_job(attempts: i32, max_tries: i32) -> job::Model {
        job::Model {
            id: Uuid::new_v4(),
            created_at: now(),
            updated_at: now(),
            job_type: "send_email".to_string(),
            payload: serde_json::json!({}),
            queue_name: "default".to_string(),
            status: JobStatus::Pending,
            attempts,
            max_tries,
            available_at: now(),
            owner: None,
            lease_expires_at: None,
            last_error: None,
            completed_at: None,
        }
    }

    fn processing_job(attempts: i32, max_tries: i32, owner: &str) -> job::Model {
        let mut job = pending_job(attempts - 1, max_tries);
        let claimed = transition(
            &job,
            Event::Claim {
                owner,
                lease_expires_at: now() + chrono::Duration::seconds(30),
            },
            now(),
            &policy(),
        )
        .unwrap();
        job.apply(&claimed);
        job
    }

    #[test]
    fn test_claim_increments_attempts_and_sets_lease() {
        let job = pending_job(0, 3);
        let lease_expires_at = now() + chrono::Duration::seconds(30);

        let result = transition(
            &job,
            Event::Claim {
                owner: "worker-1",
                lease_expires_at,
            },
            now(),
            &policy(),
        );

        assert_eq!(
            result,
            Ok(Transition::Claimed {
                owner: "worker-1".to_string(),
                attempts: 1,
                lease_expires_at,
            })
        );
    }

    #[test]
    fn test_claim_rejects_future_job() {
        let mut job = pending_job(0, 3);
        job.available_at = now() + chrono::Duration::seconds(1);

        let result = transition(
            &job,
            Event::Claim {
                owner: "worker-1",
                lease_expires_at: now(),
            },
            now(),
            &policy(),
        );

        assert!(matches!(result, Err(LifecycleError::NotAvailable { .. })));
    }

    #[test]
    fn test_claim_rejects_exhausted_job() {
        let job = pending_job(3, 3);

        let result = transition(
            &job,
            Event::Claim {
                owner: "worker-1",
                lease_expires_at: now(),
            },
            now(),
            &policy(),
        );

        assert!(matches!(result, Err(LifecycleError::TriesExhausted { .. })));
    }

    #[test]
    fn test_claim_rejects_processing_job() {
        let job = processing_job(1, 3, "worker-1");

        let result = transition(
            &job,
            Event::Claim {
                owner: "worker-2",
                lease_expires_at: now(),
            },
            now(),
            &policy(),
        );

        assert!(matches!(
            result,
            Err(LifecycleError::InvalidTransition {
                status: JobStatus::Processing,
                ..
            })
        ));
    }

    #[test]
    fn test_complete_by_owner() {
        let mut job = processing_job(1, 3, "worker-1");
        job.last_error = Some("earlier failure".to_string());

        let result =
            transition(&job, Event::Complete { owner: "worker-1" }, now(), &policy()).unwrap();
        job.apply(&result);

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_at, Some(now()));
        assert_eq!(job.last_error, None);
        assert_eq!(job.owner, None);
        assert_eq!(job.lease_expires_at, None);
    }

    #[test]
    fn test_complete_by_stale_owner_is_rejected() {
        let job = processing_job(1, 3, "worker-1");

        let result = transition(&job, Event::Complete { owner: "worker-2" }, now(), &policy());

        assert!(matches!(result, Err(LifecycleError::NotOwner { owner, .. }) if owner == "worker-2"));
    }

    #[test]
    fn test_retryable_failure_schedules_backoff() {
        let mut job = processing_job(2, 3, "worker-1");
        let error = JobError::TryAgainLater("connection reset".to_string());

        let result = transition(
            &job,
            Event::Fail {
                owner: "worker-1",
                error: &error,
            },
            now(),
            &policy(),
        )
        .unwrap();
        job.apply(&result);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.as_deref(), Some("connection reset"));
        assert_eq!(job.owner, None);
        assert!(job.available_at >= after(now(), policy().floor(2)));
        assert!(job.available_at > now());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let job = processing_job(1, 3, "worker-1");
        let error = JobError::TimedOut(Duration::from_secs(5));

        let result = transition(
            &job,
            Event::Fail {
                owner: "worker-1",
                error: &error,
            },
            now(),
            &policy(),
        );

        assert!(matches!(result, Ok(Transition::Retry { .. })));
    }

    #[test]
    fn test_failure_on_last_try_is_dead() {
        let job = processing_job(3, 3, "worker-1");
        let error = JobError::TryAgainLater("still broken".to_string());

        let result = transition(
            &job,
            Event::Fail {
                owner: "worker-1",
                error: &error,
            },
            now(),
            &policy(),
        );

        assert_eq!(
            result,
            Ok(Transition::Dead {
                last_error: "still broken".to_string()
            })
        );
    }

    #[test]
    fn test_permanent_failure_is_failed() {
        let job = processing_job(1, 3, "worker-1");
        let error = JobError::FailPermanently("bad recipient".to_string());

        let result = transition(
            &job,
            Event::Fail {
                owner: "worker-1",
                error: &error,
            },
            now(),
            &policy(),
        );

        assert_eq!(
            result,
            Ok(Transition::Failed {
                last_error: "bad recipient".to_string()
            })
        );
    }

    #[test]
    fn test_lease_expiry_releases_without_touching_attempts() {
        let mut job = processing_job(1, 3, "worker-1");
        let later = now() + chrono::Duration::minutes(1);

        let result = transition(&job, Event::LeaseExpired, later, &policy()).unwrap();
        job.apply(&result);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 1);
        assert_eq!(job.available_at, later);
        assert_eq!(job.owner, None);
        assert_eq!(job.lease_expires_at, None);
    }

    #[test]
    fn test_lease_expiry_on_last_try_is_dead() {
        let job = processing_job(3, 3, "worker-1");
        let later = now() + chrono::Duration::minutes(1);

        let result = transition(&job, Event::LeaseExpired, later, &policy());

        assert_eq!(
            result,
            Ok(Transition::Dead {
                last_error: LEASE_EXPIRED.to_string()
            })
        );
    }

    #[test]
    fn test_live_lease_cannot_expire() {
        let job = processing_job(1, 3, "worker-1");

        let result = transition(&job, Event::LeaseExpired, now(), &policy());

        assert!(matches!(result, Err(LifecycleError::LeaseNotExpired { .. })));
    }

    #[test]
    fn test_terminal_states_reject_every_event() {
        let error = JobError::TryAgainLater("x".to_string());

        for status in [JobStatus::Completed, JobStatus::Failed, JobStatus::Dead] {
            let mut job = pending_job(1, 3);
            job.status = status;

            let events = [
                Event::Claim {
                    owner: "worker-1",
                    lease_expires_at: now(),
                },
                Event::Complete { owner: "worker-1" },
                Event::Fail {
                    owner: "worker-1",
                    error: &error,
                },
                Event::LeaseExpired,
            ];

            for event in events {
                assert!(matches!(
                    transition(&job, event, now(), &policy()),
                    Err(LifecycleError::Terminal { .. })
                ));
            }
        }
    }

    #[test]
    fn test_event_outcomes() {
        let timed_out = JobError::TimedOut(Duration::from_secs(1));
        let failed = JobError::TryAgainLater("boom".to_string());

        assert_eq!(Event::Complete { owner: "w" }.outcome(), Some((JobResult::Completed, None)));
        assert!(matches!(
            Event::Fail { owner: "w", error: &timed_out }.outcome(),
            Some((JobResult::TimedOut, Some(_)))
        ));
        assert_eq!(
            Event::Fail { owner: "w", error: &failed }.outcome(),
            Some((JobResult::Failed, Some("boom".to_string())))
        );
        assert!(Event::Claim {
            owner: "w",
            lease_expires_at: now()
        }
        .outcome()
        .is_none());
    }

    #[test]
    fn test_after_saturates() {
        assert_eq!(after(NaiveDateTime::MAX, Duration::from_secs(1)), NaiveDateTime::MAX);
    }
}
