//! FIFO submission queue with deferred resource release

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;

use futures::channel::oneshot;
use parking_lot::Mutex;

use super::{CommandList, FenceWaitError};
use crate::backend::Backend;
use crate::error::{BackendError, Result};

struct QueuedObject {
    fence_value: u64,
    _object: Box<dyn Any + Send + Sync>,
}

/// Submission side of one device queue.
///
/// Fence values are assigned under a lock, so lists reach the device in the
/// order their values were handed out.
pub struct CommandQueue<B: Backend> {
    backend: Arc<B>,
    last_submitted: Mutex<u64>,
    queued: Mutex<VecDeque<QueuedObject>>,
}

impl<B: Backend> CommandQueue<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            last_submitted: Mutex::new(0),
            queued: Mutex::new(VecDeque::new()),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Submit `list` and return the fence value that signals its completion.
    pub fn execute_command_list(&self, list: CommandList<B::Program>) -> Result<u64> {
        let command_count = list.len();
        let referenced = list.referenced_resources();

        let mut last = self.last_submitted.lock();
        let fence_value = *last + 1;
        self.backend.execute(list, fence_value)?;
        *last = fence_value;
        drop(last);

        webnn_tracing::performance::record_submission(fence_value, command_count, referenced);
        Ok(fence_value)
    }

    pub fn last_submitted_fence(&self) -> u64 {
        *self.last_submitted.lock()
    }

    pub fn completed_fence(&self) -> u64 {
        self.backend.fence().completed_value()
    }

    /// Keep `object` alive until the most recent submission completes.
    pub fn reference_until_completed<T: Any + Send + Sync>(&self, object: T) {
        let fence_value = self.last_submitted_fence();
        self.queued.lock().push_back(QueuedObject {
            fence_value,
            _object: Box::new(object),
        });
    }

    /// Drop every queued object whose fence has completed.
    pub fn release_completed_resources(&self) -> usize {
        let completed = self.completed_fence();
        let released: Vec<QueuedObject> = {
            let mut queued = self.queued.lock();
            let keep_from = queued
                .iter()
                .position(|object| object.fence_value > completed)
                .unwrap_or(queued.len());
            queued.drain(..keep_from).collect()
        };
        let count = released.len();
        // Dropped outside the lock; releasing a resource takes the allocator lock.
        drop(released);
        count
    }

    pub fn queued_objects(&self) -> usize {
        self.queued.lock().len()
    }

    /// Call `on_done` once `fence_value` completes, without blocking.
    pub fn wait_async<F>(&self, fence_value: u64, on_done: F)
    where
        F: FnOnce(Result<()>) + Send + 'static,
    {
        self.backend
            .fence()
            .set_event_on_completion(fence_value, move |outcome| on_done(outcome.map_err(Into::into)));
    }

    /// Resolve once `fence_value` completes.
    pub async fn wait(&self, fence_value: u64) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.wait_async(fence_value, move |outcome| {
            let _ = tx.send(outcome);
        });
        rx.await
            .map_err(|_| BackendError::DeviceLost("fence callback dropped".into()))?
    }
}

impl From<FenceWaitError> for BackendError {
    fn from(err: FenceWaitError) -> Self {
        match err {
            FenceWaitError::DeviceLost(reason) => BackendError::DeviceLost(reason),
            FenceWaitError::Faulted {
                fence_value,
                reason,
            } => BackendError::ExecutionFault {
                fence_value,
                reason,
            },
        }
    }
}
