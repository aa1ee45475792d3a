use std::future::Future;
use std::pin::Pin;
use std::{collections::HashMap, sync::Arc};

use super::{Job, JobContext, JobError};

/// Type alias for job executor function to reduce type complexity
type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type JobExecutor = Arc<
    dyn Fn(JobContext, serde_json::Value) -> BoxFuture<'static, Result<(), JobError>>
        + Send
        + Sync,
>;

/// Maps `job_type` strings to typed handlers.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: HashMap<&'static str, JobExecutor>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_job<J: Job + 'static>(&mut self) {
        self.jobs.insert(
            J::name(),
            Arc::new(|context: JobContext, args_json: serde_json::Value| {
                Box::pin(async move {
                    let arguments: J::Arguments =
                        serde_json::from_value(args_json).map_err(|e| {
                            JobError::FailPermanently(format!("Failed to parse job arguments: {e}"))
                        })?;
                    J::execute(&context, arguments).await
                })
            }),
        );
    }

    pub fn job_names(&self) -> impl Iterator<Item = &&'static str> {
        self.jobs.keys()
    }

    #[must_use]
    pub fn resolve(&self, job_type: &str) -> Option<JobExecutor> {
        self.jobs.get(job_type).cloned()
    }

    /// Run the handler registered for `job_type`.
    ///
    /// An unknown type fails permanently: retrying cannot make a handler appear.
    pub async fn execute(
        &self,
        context: JobContext,
        job_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), JobError> {
        let Some(executor) = self.resolve(job_type) else {
            return Err(JobError::FailPermanently(format!(
                "No job registered for job type: {job_type}"
            )));
        };

        executor(context, payload.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::store::MemoryJobStore;
    use serde::Deserialize;
    use uuid::Uuid;

    #[derive(Deserialize)]
    struct GreetArguments {
        name: String,
    }

    struct GreetJob;

    impl Job for GreetJob {
        type Arguments = GreetArguments;

        async fn execute(context: &JobContext, arguments: Self::Arguments) -> Result<(), JobError> {
            if arguments.name.is_empty() {
                return Err(JobError::TryAgainLater(format!(
                    "attempt {} had no name",
                    context.attempt
                )));
            }
            Ok(())
        }

        fn name() -> &'static str {
            "greet"
        }
    }

    fn context(job_type: &str) -> JobContext {
        JobContext {
            job_id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            queue_name: "default".to_string(),
            attempt: 1,
            store: Arc::new(MemoryJobStore::default()),
        }
    }

    fn registry() -> JobRegistry {
        let mut registry = JobRegistry::new();
        registry.register_job::<GreetJob>();
        registry
    }

    #[tokio::test]
    async fn test_executes_registered_job() {
        let result = registry()
            .execute(context("greet"), "greet", &serde_json::json!({ "name": "Ada" }))
            .await;

        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn test_handler_errors_pass_through() {
        let result = registry()
            .execute(context("greet"), "greet", &serde_json::json!({ "name": "" }))
            .await;

        assert_eq!(
            result,
            Err(JobError::TryAgainLater("attempt 1 had no name".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unknown_job_type_fails_permanently() {
        let result = registry()
            .execute(context("missing"), "missing", &serde_json::Value::Null)
            .await;

        assert!(matches!(result, Err(JobError::FailPermanently(_))));
    }

    #[tokio::test]
    async fn test_bad_payload_fails_permanently() {
        let result = registry()
            .execute(context("greet"), "greet", &serde_json::json!({ "nom": 1 }))
            .await;

        assert!(matches!(result, Err(JobError::FailPermanently(msg)) if msg.contains("parse")));
    }

    #[test]
    fn test_resolve() {
        let registry = registry();

        assert!(registry.resolve("greet").is_some());
        assert!(registry.resolve("missing").is_none());
        assert_eq!(registry.job_names().count(), 1);
    }
}
