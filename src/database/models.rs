pub mod job;
pub mod job_execution;
pub mod job_result;
pub mod job_status;
