use std::process;

use uuid::Uuid;

use crate::{
    config::Config,
    database::models::job_status::JobStatus,
    jobs::store::{JobFilter, JobStore, QueueStats},
};

use super::store_or_exit;

fn exit_with(message: &str, e: &dyn std::fmt::Display) -> ! {
    eprintln!("❌ {message}: {e}");
    process::exit(1);
}

pub async fn handle_stats_command(config: &Config, queue: Option<&str>) {
    let store = store_or_exit(config).await;

    match store.stats(queue).await {
        Ok(stats) => print_stats(queue, &stats),
        Err(e) => exit_with("Failed to read stats", &e),
    }
}

fn print_stats(queue: Option<&str>, stats: &QueueStats) {
    println!("📊 Jobs in {}:", queue.unwrap_or("all queues"));
    println!("  ⏳ pending:    {}", stats.pending);
    println!("  ⚙️  processing: {}", stats.processing);
    println!("  ✅ completed:  {}", stats.completed);
    println!("  ❌ failed:     {}", stats.failed);
    println!("  💀 dead:       {}", stats.dead);
    println!("  total:         {}", stats.total());
}

pub async fn handle_list_command(
    config: &Config,
    queue: Option<String>,
    status: Option<JobStatus>,
    limit: u64,
) {
    let store = store_or_exit(config).await;
    let filter = JobFilter {
        queue_name: queue,
        status,
        limit,
        ..JobFilter::default()
    };

    let jobs = match store.list(&filter).await {
        Ok(jobs) => jobs,
        Err(e) => exit_with("Failed to list jobs", &e),
    };

    if jobs.is_empty() {
        println!("No jobs found");
        return;
    }

    for job_model in jobs {
        println!(
            "{}  {:<10} {:<20} {:<12} {}/{}  {}",
            job_model.id,
            job_model.status,
            job_model.job_type,
            job_model.queue_name,
            job_model.attempts,
            job_model.max_tries,
            job_model.last_error.as_deref().unwrap_or(""),
        );
    }
}

pub async fn handle_show_command(config: &Config, job_id: Uuid) {
    let store = store_or_exit(config).await;

    let job_model = match store.get(job_id).await {
        Ok(Some(job_model)) => job_model,
        Ok(None) => {
            eprintln!("❌ Job {job_id} not found");
            process::exit(1);
        }
        Err(e) => exit_with("Failed to load job", &e),
    };

    println!("📄 Job {}", job_model.id);
    println!("  type:        {}", job_model.job_type);
    println!("  queue:       {}", job_model.queue_name);
    println!("  status:      {}", job_model.status);
    println!("  attempts:    {}/{}", job_model.attempts, job_model.max_tries);
    println!("  available:   {}", job_model.available_at);
    println!("  payload:     {}", job_model.payload);
    if let Some(owner) = &job_model.owner {
        println!("  owner:       {owner}");
    }
    if let Some(lease_expires_at) = job_model.lease_expires_at {
        println!("  lease until: {lease_expires_at}");
    }
    if let Some(last_error) = &job_model.last_error {
        println!("  last error:  {last_error}");
    }

    match store.executions(job_id).await {
        Ok(executions) if executions.is_empty() => {}
        Ok(executions) => {
            println!();
            println!("🕘 Executions:");
            for execution in executions {
                println!(
                    "  #{} {} by {} at {}  {}",
                    execution.attempt,
                    execution.result,
                    execution.worker,
                    execution.created_at,
                    execution.failure_reason.as_deref().unwrap_or(""),
                );
            }
        }
        Err(e) => exit_with("Failed to load executions", &e),
    }
}
