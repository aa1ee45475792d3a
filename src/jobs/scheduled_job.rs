use crate::jobs::store::{NewJob, DEFAULT_MAX_TRIES, DEFAULT_QUEUE};

/// A job enqueued on a cron schedule
#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub name: String,
    pub job_name: &'static str,
    pub arguments: serde_json::Value,
    /// Six or seven field expression (seconds first), as accepted by the `cron` crate
    pub cron_expression: String,
    pub queue_name: String,
    pub max_tries: i32,
}

impl ScheduledJob {
    pub fn new(
        name: impl Into<String>,
        job_name: &'static str,
        arguments: serde_json::Value,
        cron_expression: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            job_name,
            arguments,
            cron_expression: cron_expression.into(),
            queue_name: DEFAULT_QUEUE.to_string(),
            max_tries: DEFAULT_MAX_TRIES,
        }
    }

    #[must_use]
    pub fn on_queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = queue_name.into();
        self
    }

    #[must_use]
    pub const fn max_tries(mut self, max_tries: i32) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub(crate) fn to_new_job(&self) -> NewJob {
        NewJob::new(self.job_name, self.arguments.clone())
            .on_queue(self.queue_name.clone())
            .max_tries(self.max_tries)
    }
}
