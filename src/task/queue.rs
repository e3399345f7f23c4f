//! Task handoff between the submission path and the worker.

use std::time::Duration;

use super::types::TaskId;

/// Unbounded in-process queue with delayed redelivery.
///
/// Delivery is at least once from the consumer's point of view: a task id
/// can reappear (scheduled retries today, broker redelivery in other
/// deployments), so the consumer checks the store before running anything.
#[derive(Clone)]
pub struct TaskQueue {
    tx: flume::Sender<TaskId>,
    rx: flume::Receiver<TaskId>,
}

impl TaskQueue {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    /// Hands a task to the worker. Never blocks.
    pub fn submit(&self, id: TaskId) {
        if self.tx.send(id).is_err() {
            tracing::warn!(task_id = %id, "task queue closed, delivery dropped");
        }
    }

    /// Redelivers `id` once the retry backoff has elapsed.
    pub fn redeliver_after(&self, id: TaskId, delay: Duration) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(id).is_err() {
                tracing::warn!(task_id = %id, "task queue closed, redelivery dropped");
            }
        });
    }

    /// Next delivery; `None` once every producer is gone.
    pub async fn recv(&self) -> Option<TaskId> {
        self.rx.recv_async().await.ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}
