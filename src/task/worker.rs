//! The worker loop: strictly sequential consumption with bounded recycling.

use std::sync::Arc;

use super::queue::TaskQueue;
use super::retry::RetryController;
use crate::model::ModelSlot;

/// Consumes the queue one delivery at a time for the process lifetime.
///
/// After `tasks_per_recycle` deliveries the model handle is dropped and
/// rebuilt on the next acquisition, bounding long-run memory growth the same
/// way a per-process task ceiling recycles whole workers. 0 disables it.
pub struct Worker {
    queue: TaskQueue,
    controller: RetryController,
    slot: Arc<ModelSlot>,
    tasks_per_recycle: u32,
}

impl Worker {
    pub fn new(
        queue: TaskQueue,
        controller: RetryController,
        slot: Arc<ModelSlot>,
        tasks_per_recycle: u32,
    ) -> Self {
        Self {
            queue,
            controller,
            slot,
            tasks_per_recycle,
        }
    }

    pub async fn run(self) {
        tracing::info!("worker started");
        let mut processed: u64 = 0;
        while let Some(id) = self.queue.recv().await {
            self.controller.execute(id).await;
            processed += 1;
            if self.tasks_per_recycle > 0 && processed % u64::from(self.tasks_per_recycle) == 0 {
                tracing::info!(processed, "recycling model handle");
                self.slot.reset().await;
            }
        }
        tracing::info!("worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::retry::RetryPolicy;
    use super::super::store::{InMemoryTaskStore, TaskStore};
    use super::super::types::{TaskId, TaskState};
    use super::*;
    use crate::model::testing::EchoLoader;
    use crate::model::{GenerationParams, ModelLoader, ModelSlot};
    use crate::pipeline::InferencePipeline;

    fn stack_with(
        loader: Arc<dyn ModelLoader>,
        tasks_per_recycle: u32,
    ) -> (Worker, Arc<InMemoryTaskStore>, TaskQueue) {
        let store = Arc::new(InMemoryTaskStore::new());
        let queue = TaskQueue::new();
        let slot = Arc::new(ModelSlot::new(loader.clone()));
        let pipeline = Arc::new(InferencePipeline::new(
            loader,
            slot.clone(),
            GenerationParams::default(),
            256,
        ));
        let controller = RetryController::new(
            store.clone(),
            queue.clone(),
            pipeline,
            RetryPolicy::new(3, Duration::from_millis(10)),
        );
        let worker = Worker::new(queue.clone(), controller, slot, tasks_per_recycle);
        (worker, store, queue)
    }

    async fn wait_for(store: &InMemoryTaskStore, id: TaskId, state: TaskState) {
        for _ in 0..500 {
            if store.get(id).unwrap().state == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("task never reached {state}");
    }

    #[tokio::test]
    async fn worker_drains_the_queue() {
        let (worker, store, queue) = stack_with(Arc::new(EchoLoader::new()), 0);
        tokio::spawn(worker.run());

        let first = store.create("Bonjour le monde").unwrap().id;
        let second = store.create("La vie en rose").unwrap().id;
        queue.submit(first);
        queue.submit(second);

        wait_for(&store, first, TaskState::Succeeded).await;
        wait_for(&store, second, TaskState::Succeeded).await;
    }

    #[tokio::test]
    async fn recycling_rebuilds_the_handle_between_tasks() {
        let loader = Arc::new(EchoLoader::new());
        let (worker, store, queue) = stack_with(loader.clone(), 1);
        tokio::spawn(worker.run());

        let first = store.create("Bonjour").unwrap().id;
        queue.submit(first);
        wait_for(&store, first, TaskState::Succeeded).await;

        let second = store.create("Au revoir").unwrap().id;
        queue.submit(second);
        wait_for(&store, second, TaskState::Succeeded).await;

        assert_eq!(loader.model_builds(), 2);
    }
}
