use std::time::Duration;

use serde::Deserialize;
use taskmill::{
    app_info::AppInfo,
    boot::{boot, BootConfig},
    jobs::{job_registry::JobRegistry, scheduled_job::ScheduledJob, Job, JobContext, JobError},
};
use tracing::info;

/// Logs its payload
struct EchoJob;

impl Job for EchoJob {
    type Arguments = serde_json::Value;

    async fn execute(context: &JobContext, arguments: Self::Arguments) -> Result<(), JobError> {
        info!(
            "🔊 echo (attempt {}) on '{}': {}",
            context.attempt, context.queue_name, arguments
        );
        Ok(())
    }

    fn name() -> &'static str {
        "echo"
    }
}

#[derive(Deserialize)]
struct SleepArguments {
    seconds: u64,
}

/// Holds a worker slot for a while; handy for trying out leases and shutdown
struct SleepJob;

impl Job for SleepJob {
    type Arguments = SleepArguments;

    async fn execute(_: &JobContext, arguments: Self::Arguments) -> Result<(), JobError> {
        tokio::time::sleep(Duration::from_secs(arguments.seconds)).await;
        Ok(())
    }

    fn name() -> &'static str {
        "sleep"
    }
}

/// Logs job counts for every queue
struct ReportStatsJob;

impl Job for ReportStatsJob {
    type Arguments = serde_json::Value;

    async fn execute(context: &JobContext, _: Self::Arguments) -> Result<(), JobError> {
        let stats = context
            .store
            .stats(None)
            .await
            .map_err(|e| JobError::TryAgainLater(e.to_string()))?;

        info!(
            "📊 pending={} processing={} completed={} failed={} dead={}",
            stats.pending, stats.processing, stats.completed, stats.failed, stats.dead
        );
        Ok(())
    }

    fn name() -> &'static str {
        "report_stats"
    }
}

fn job_registry() -> JobRegistry {
    let mut registry = JobRegistry::new();
    registry.register_job::<EchoJob>();
    registry.register_job::<SleepJob>();
    registry.register_job::<ReportStatsJob>();
    registry
}

fn job_schedule() -> Vec<ScheduledJob> {
    vec![ScheduledJob::new(
        "queue report",
        ReportStatsJob::name(),
        serde_json::Value::Null,
        "0 */5 * * * *",
    )
    .on_queue("maintenance")
    .max_tries(1)]
}

#[tokio::main]
async fn main() {
    let app_info = AppInfo::taskmill();

    boot(BootConfig::new(app_info, job_registry(), job_schedule())).await;
}
