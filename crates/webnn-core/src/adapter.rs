//! Shared device connection
//!
//! An [`Adapter`] owns one backend, its single command queue and the
//! compiled-program cache. Clones share all three; every context created
//! from an adapter submits to the same queue.

use std::sync::Arc;

use webnn_backends::{Backend, CommandQueue, CpuBackend, CpuBackendOptions, ProgramCache};

use crate::context::Context;
use crate::properties::ContextOptions;

struct AdapterInner<B: Backend> {
    backend: Arc<B>,
    queue: CommandQueue<B>,
    programs: ProgramCache<B::Program>,
}

/// Reference-counted handle to a backend and its queue.
pub struct Adapter<B: Backend> {
    inner: Arc<AdapterInner<B>>,
}

impl<B: Backend> Adapter<B> {
    pub fn new(backend: B) -> Self {
        let backend = Arc::new(backend);
        let queue = CommandQueue::new(Arc::clone(&backend));
        Self {
            inner: Arc::new(AdapterInner {
                backend,
                queue,
                programs: ProgramCache::new(),
            }),
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.inner.backend
    }

    pub fn queue(&self) -> &CommandQueue<B> {
        &self.inner.queue
    }

    pub fn programs(&self) -> &ProgramCache<B::Program> {
        &self.inner.programs
    }

    #[tracing::instrument(skip(self), fields(backend = self.backend().name()))]
    pub fn create_context(&self, options: ContextOptions) -> Context<B> {
        Context::new(self.clone(), options)
    }
}

impl Adapter<CpuBackend> {
    /// Adapter over a fresh CPU device.
    pub fn cpu(options: CpuBackendOptions) -> Self {
        Self::new(CpuBackend::new(options))
    }
}

impl<B: Backend> Clone for Adapter<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> std::fmt::Debug for Adapter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("backend", &self.backend().name())
            .field("cached_programs", &self.programs().len())
            .finish()
    }
}
