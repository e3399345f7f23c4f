//! Single-occupancy guard over the model backend.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use super::{ContextModel, ModelLoader};
use crate::error::TaskError;

/// Holds zero or one model handle and admits at most one holder at a time.
///
/// The handle is built lazily on first acquisition. A failed build propagates
/// to the caller while the lock is released on the way out, so the slot is
/// never left locked or poisoned and a later task can retry construction.
pub struct ModelSlot {
    loader: Arc<dyn ModelLoader>,
    handle: Mutex<Option<Box<dyn ContextModel>>>,
}

impl ModelSlot {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            handle: Mutex::new(None),
        }
    }

    /// Blocks the calling task until the slot is free, constructing the
    /// handle if absent, then returns exclusive access to it.
    pub async fn acquire(&self) -> Result<SlotGuard<'_>, TaskError> {
        let mut handle = self.handle.lock().await;
        if handle.is_none() {
            tracing::info!("constructing model handle");
            *handle = Some(self.loader.load_model()?);
        }
        Ok(SlotGuard { handle })
    }

    /// Drops the current handle; the next acquisition rebuilds it. Used by
    /// worker recycling to bound long-run memory growth.
    pub async fn reset(&self) {
        let mut handle = self.handle.lock().await;
        if handle.take().is_some() {
            tracing::info!("model handle dropped for rebuild");
        }
    }
}

/// Exclusive access to the model while held.
///
/// Dropping the guard runs the backend's memory reclamation pass and then
/// releases the slot, on success and error paths alike.
pub struct SlotGuard<'a> {
    handle: MutexGuard<'a, Option<Box<dyn ContextModel>>>,
}

impl SlotGuard<'_> {
    pub fn model(&mut self) -> &mut dyn ContextModel {
        match self.handle.as_mut() {
            Some(model) => model.as_mut(),
            None => unreachable!("slot guard held without a handle"),
        }
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Some(model) = self.handle.as_mut() {
            model.reclaim();
        }
    }
}
