//! Bounded retry with failure classification.

use std::sync::Arc;
use std::time::Duration;

use crate::error::TaskError;
use crate::pipeline::InferencePipeline;

use super::queue::TaskQueue;
use super::store::TaskStore;
use super::types::{Task, TaskId};

/// Fixed-backoff policy. `max_attempts` counts executions started, not
/// re-deliveries.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    /// Whether another attempt may follow the given (1-based) attempt.
    pub fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(60),
        }
    }
}

/// Drives one queue delivery through the pipeline and owns every transition
/// that follows:
///
/// ```text
/// Pending --(dequeued)--> Running --(success)--> Succeeded
/// Running --(validation error)--> Failed
/// Running --(other error, attempts < max)--> Pending, redelivered later
/// Running --(other error, attempts == max)--> Failed
/// ```
pub struct RetryController {
    store: Arc<dyn TaskStore>,
    queue: TaskQueue,
    pipeline: Arc<InferencePipeline>,
    policy: RetryPolicy,
}

impl RetryController {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: TaskQueue,
        pipeline: Arc<InferencePipeline>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            pipeline,
            policy,
        }
    }

    /// Runs one delivery for `id`. Failures never propagate out of here;
    /// every outcome lands in the store.
    pub async fn execute(&self, id: TaskId) {
        let task = match self.store.begin_attempt(id) {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::debug!(task_id = %id, "duplicate delivery for terminal task dropped");
                return;
            }
            Err(err) => {
                tracing::error!(task_id = %id, error = %err, "delivery dropped");
                return;
            }
        };
        tracing::info!(task_id = %id, attempt = task.attempts, "task attempt started");

        match self.pipeline.run(&task.lyric).await {
            Ok(context) => {
                tracing::info!(task_id = %id, attempt = task.attempts, "task succeeded");
                if let Err(err) = self.store.complete(id, context) {
                    tracing::error!(task_id = %id, error = %err, "recording success failed");
                }
            }
            Err(error) => self.handle_failure(&task, error),
        }
    }

    fn handle_failure(&self, task: &Task, error: TaskError) {
        let id = task.id;
        tracing::warn!(
            task_id = %id,
            attempt = task.attempts,
            error_type = error.error_type(),
            error = %error,
            "task attempt failed"
        );

        let exhausted = !self.policy.should_retry(task.attempts);
        if !error.is_retryable() || self.recurring_unexpected(task, &error) || exhausted {
            if let Err(err) = self.store.fail(id, &error) {
                tracing::error!(task_id = %id, error = %err, "recording failure failed");
            }
            return;
        }

        if let Err(err) = self.store.reschedule(id, &error) {
            tracing::error!(task_id = %id, error = %err, "rescheduling failed");
            return;
        }
        tracing::info!(
            task_id = %id,
            delay_secs = self.policy.retry_delay.as_secs(),
            "retry scheduled"
        );
        self.queue.redeliver_after(id, self.policy.retry_delay);
    }

    /// An uncategorized failure repeating with the same description on
    /// consecutive attempts will not converge; stop early.
    fn recurring_unexpected(&self, task: &Task, error: &TaskError) -> bool {
        matches!(error, TaskError::Unexpected(_))
            && task.error.as_deref() == Some(error.to_string().as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::super::store::InMemoryTaskStore;
    use super::super::types::TaskState;
    use super::*;
    use crate::model::testing::{EchoLoader, FailingLoader};
    use crate::model::{GenerationParams, ModelLoader, ModelSlot};

    fn controller_with(
        loader: Arc<dyn ModelLoader>,
        policy: RetryPolicy,
    ) -> (RetryController, Arc<InMemoryTaskStore>, TaskQueue) {
        let store = Arc::new(InMemoryTaskStore::new());
        let queue = TaskQueue::new();
        let slot = Arc::new(ModelSlot::new(loader.clone()));
        let pipeline = Arc::new(InferencePipeline::new(
            loader,
            slot,
            GenerationParams::default(),
            256,
        ));
        let controller = RetryController::new(store.clone(), queue.clone(), pipeline, policy);
        (controller, store, queue)
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn success_marks_the_task_succeeded() {
        let (controller, store, _queue) =
            controller_with(Arc::new(EchoLoader::new()), fast_policy(3));
        let id = store.create("Bonjour le monde").unwrap().id;

        controller.execute(id).await;

        let task = store.get(id).unwrap();
        assert_eq!(task.state, TaskState::Succeeded);
        assert_eq!(task.attempts, 1);
        assert!(task.context.as_deref().unwrap().contains("Bonjour"));
    }

    #[tokio::test]
    async fn construction_failures_walk_back_to_pending_then_exhaust() {
        let loader = Arc::new(FailingLoader::new("mt5 weights unavailable"));
        let (controller, store, _queue) = controller_with(loader.clone(), fast_policy(3));
        let id = store.create("Bonjour le monde").unwrap().id;

        controller.execute(id).await;
        let task = store.get(id).unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.attempts, 1);

        controller.execute(id).await;
        let task = store.get(id).unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.attempts, 2);

        controller.execute(id).await;
        let task = store.get(id).unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.attempts, 3);
        assert_eq!(
            task.error.as_deref(),
            Some("dependency error: mt5 weights unavailable")
        );
        assert_eq!(loader.model_attempts(), 3);
    }

    #[tokio::test]
    async fn validation_failure_is_terminal_on_the_first_attempt() {
        let (controller, store, queue) =
            controller_with(Arc::new(EchoLoader::new()), fast_policy(3));
        // Poisoned input straight into the store, as a broken producer would.
        let id = store.create("   ").unwrap().id;

        controller.execute(id).await;

        let task = store.get(id).unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.attempts, 1);
        assert_eq!(task.error.as_deref(), Some("Lyric is required"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn terminal_tasks_ignore_duplicate_deliveries() {
        let (controller, store, _queue) =
            controller_with(Arc::new(EchoLoader::new()), fast_policy(3));
        let id = store.create("Bonjour le monde").unwrap().id;

        controller.execute(id).await;
        let first = store.get(id).unwrap();

        controller.execute(id).await;
        let second = store.get(id).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn recurring_unexpected_failures_stop_early() {
        let loader = Arc::new(
            EchoLoader::new()
                .with_generate_error(TaskError::Unexpected("segfault in kernel".into())),
        );
        let (controller, store, _queue) = controller_with(loader, fast_policy(5));
        let id = store.create("Bonjour le monde").unwrap().id;

        controller.execute(id).await;
        assert_eq!(store.get(id).unwrap().state, TaskState::Pending);

        controller.execute(id).await;
        let task = store.get(id).unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.attempts, 2);
    }

    #[test]
    fn policy_boundaries() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.retry_delay, Duration::from_secs(60));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        let clamped = RetryPolicy::new(0, Duration::from_secs(1));
        assert_eq!(clamped.max_attempts, 1);
    }
}
