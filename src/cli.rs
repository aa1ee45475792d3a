use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::database::models::job_status::JobStatus;

#[derive(Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run worker pools, the reaper, the scheduler and cleanup (default)
    Work,
    /// Add a job to a queue
    Enqueue {
        /// Registered job type
        job_type: String,
        /// Target queue
        #[arg(short, long, default_value = "default")]
        queue: String,
        /// JSON payload handed to the handler
        #[arg(short, long, default_value = "{}")]
        payload: String,
        /// Attempts allowed before the job is dead (default: jobs.default_max_tries)
        #[arg(short, long)]
        max_tries: Option<i32>,
        /// Keep the job unclaimable for this many seconds
        #[arg(short, long)]
        delay_seconds: Option<u64>,
    },
    /// Show job counts per status
    Stats {
        /// Limit counts to one queue
        #[arg(short, long)]
        queue: Option<String>,
    },
    /// List jobs, oldest first
    List {
        #[arg(short, long)]
        queue: Option<String>,
        /// pending, processing, completed, failed or dead
        #[arg(short, long)]
        status: Option<JobStatus>,
        #[arg(short, long, default_value = "20")]
        limit: u64,
    },
    /// Show one job and its execution history
    Show { job_id: Uuid },
    /// Recover jobs whose lease has expired, once
    Reap,
    /// Database migration commands
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum MigrateAction {
    /// Apply pending migrations
    Up {
        /// How many to apply (default: all)
        #[arg(short, long)]
        steps: Option<u32>,
    },
    /// Roll back applied migrations, newest first
    Down {
        #[arg(short, long, default_value = "1")]
        steps: u32,
    },
    /// List applied and pending migrations
    Status,
}
