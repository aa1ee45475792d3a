//! Taskmill - durable background jobs on PostgreSQL
//!
//! Producers add jobs to named queues; worker pools claim them under a
//! time-bounded lease, run the registered handler and record the outcome.
//! Failed jobs are retried with exponential backoff until they run out of
//! tries, and jobs held by a crashed worker are recovered once their lease
//! expires. Execution is at-least-once, so handlers must be idempotent.

#![allow(missing_docs)]

pub mod app_info;
pub mod boot;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod config;
pub mod database;
pub mod environment;
pub mod job_queue;
pub mod jobs;
pub mod setup_tracing;
