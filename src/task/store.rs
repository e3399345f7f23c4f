//! Task storage.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use super::types::{Task, TaskId, TaskState};
use crate::error::TaskError;

#[derive(Debug, Clone, Error)]
pub enum TaskStoreError {
    #[error("task not found: {0}")]
    NotFound(TaskId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Task store abstraction.
///
/// Implementations serialize writes to a single record, and a record in a
/// terminal state is never modified again: late or duplicate transitions are
/// dropped, which is what makes at-least-once delivery safe.
pub trait TaskStore: Send + Sync {
    /// Insert a new Pending task for the given input.
    fn create(&self, lyric: &str) -> Result<Task, TaskStoreError>;

    /// Fetch a record by id.
    fn get(&self, id: TaskId) -> Result<Task, TaskStoreError>;

    /// Transition Pending to Running and increment the attempt counter,
    /// returning the updated record. Returns `None` when the record is
    /// already terminal, in which case the delivery must be dropped.
    fn begin_attempt(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError>;

    /// Transition to Succeeded with the result payload.
    fn complete(&self, id: TaskId, context: String) -> Result<(), TaskStoreError>;

    /// Transition to Failed (terminal) with the error recorded.
    fn fail(&self, id: TaskId, error: &TaskError) -> Result<(), TaskStoreError>;

    /// Transition Running back to Pending with the failure recorded; the
    /// caller schedules the redelivery.
    fn reschedule(&self, id: TaskId, error: &TaskError) -> Result<(), TaskStoreError>;
}

/// In-memory store. Records live for the process lifetime, which covers the
/// polling window of a submitting client.
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Applies `apply` to the record under the write lock, skipping records
    /// already in a terminal state.
    fn mutate<F>(&self, id: TaskId, apply: F) -> Result<(), TaskStoreError>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id).ok_or(TaskStoreError::NotFound(id))?;
        if task.state.is_terminal() {
            tracing::warn!(task_id = %id, state = %task.state, "update to terminal task dropped");
            return Ok(());
        }
        apply(task);
        Ok(())
    }
}

impl TaskStore for InMemoryTaskStore {
    fn create(&self, lyric: &str) -> Result<Task, TaskStoreError> {
        let task = Task::new(lyric);
        self.tasks.write().insert(task.id, task.clone());
        Ok(task)
    }

    fn get(&self, id: TaskId) -> Result<Task, TaskStoreError> {
        self.tasks
            .read()
            .get(&id)
            .cloned()
            .ok_or(TaskStoreError::NotFound(id))
    }

    fn begin_attempt(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        let mut tasks = self.tasks.write();
        let task = tasks.get_mut(&id).ok_or(TaskStoreError::NotFound(id))?;
        if task.state.is_terminal() {
            return Ok(None);
        }
        task.state = TaskState::Running;
        task.attempts += 1;
        Ok(Some(task.clone()))
    }

    fn complete(&self, id: TaskId, context: String) -> Result<(), TaskStoreError> {
        self.mutate(id, |task| {
            task.state = TaskState::Succeeded;
            task.context = Some(context);
            task.error = None;
        })
    }

    fn fail(&self, id: TaskId, error: &TaskError) -> Result<(), TaskStoreError> {
        self.mutate(id, |task| {
            task.state = TaskState::Failed;
            task.error = Some(error.to_string());
        })
    }

    fn reschedule(&self, id: TaskId, error: &TaskError) -> Result<(), TaskStoreError> {
        self.mutate(id, |task| {
            task.state = TaskState::Pending;
            task.error = Some(error.to_string());
        })
    }
}
