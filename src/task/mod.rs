//! Task domain: records, storage, queueing, retry, and the worker loop.

pub mod queue;
pub mod retry;
pub mod store;
pub mod types;
pub mod worker;

pub use queue::TaskQueue;
pub use retry::{RetryController, RetryPolicy};
pub use store::{InMemoryTaskStore, TaskStore, TaskStoreError};
pub use types::{Task, TaskId, TaskState};
pub use worker::Worker;
