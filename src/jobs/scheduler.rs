use chrono::{DateTime, Utc};
use std::{str::FromStr, sync::Arc, time::Duration};
use tokio::{task::JoinSet, time::sleep};
use tracing::{debug, error, info};

use crate::jobs::{
    scheduled_job::ScheduledJob,
    store::{JobStore, StoreError},
};

/// Scheduler that spawns individual tasks for each scheduled job
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    schedule: Vec<ScheduledJob>,
}

impl Scheduler {
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(store: Arc<dyn JobStore>, schedule: Vec<ScheduledJob>) -> Self {
        Self { store, schedule }
    }

    pub async fn run(&self) {
        info!(
            "📅 Scheduler started with {} scheduled jobs",
            self.schedule.len()
        );

        // If there are no scheduled jobs, just wait indefinitely
        if self.schedule.is_empty() {
            debug!("📅 No scheduled jobs configured, scheduler will idle");
            std::future::pending::<()>().await;
            return;
        }

        let mut tasks = JoinSet::new();
        for scheduled_job in &self.schedule {
            let schedule = match parse_cron_schedule(scheduled_job) {
                Ok(schedule) => schedule,
                Err(e) => {
                    error!(
                        "❌ Invalid cron expression for job '{}': {}",
                        scheduled_job.name, e
                    );
                    continue;
                }
            };

            tasks.spawn(run_scheduled_job(
                scheduled_job.clone(),
                schedule,
                self.store.clone(),
            ));
            debug!("📅 Spawned scheduler task for '{}'", scheduled_job.name);
        }

        // Scheduled job tasks run indefinitely
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("📅 Scheduler task failed: {}", e);
            }
        }
    }
}

pub fn parse_cron_schedule(scheduled_job: &ScheduledJob) -> Result<cron::Schedule, cron::error::Error> {
    cron::Schedule::from_str(&scheduled_job.cron_expression)
}

/// Run a single scheduled job in its own loop
async fn run_scheduled_job(
    scheduled_job: ScheduledJob,
    schedule: cron::Schedule,
    store: Arc<dyn JobStore>,
) {
    debug!("📅 Starting scheduler task for '{}'", scheduled_job.name);

    loop {
        let Some(delay) = delay_until_next_run(&schedule, Utc::now()) else {
            error!(
                "❌ Could not determine next execution time for job '{}'",
                scheduled_job.name
            );
            sleep(Duration::from_secs(60)).await;
            continue;
        };

        sleep(delay).await;

        match create_scheduled_job(&scheduled_job, store.as_ref()).await {
            Ok(()) => {
                debug!(
                    "📅 Created scheduled job '{}' for execution",
                    scheduled_job.name
                );
            }
            Err(e) => {
                error!(
                    "❌ Failed to create scheduled job '{}': {}",
                    scheduled_job.name, e
                );
            }
        }
    }
}

/// Time from `now` until the next cron instant.
fn delay_until_next_run(schedule: &cron::Schedule, now: DateTime<Utc>) -> Option<Duration> {
    let next_execution = schedule.after(&now).next()?;

    debug!(
        "🔄 Next execution at: {}",
        next_execution.format("%Y-%m-%d %H:%M:%S UTC")
    );

    Some((next_execution - now).to_std().unwrap_or_default())
}

async fn create_scheduled_job(
    scheduled_job: &ScheduledJob,
    store: &dyn JobStore,
) -> Result<(), StoreError> {
    store.enqueue(scheduled_job.to_new_job()).await?;
    Ok(())
}
