//! Standalone tensor buffers
//!
//! A [`Buffer`] is a device allocation created by a context outside of any
//! graph. It can be written and read through the context and bound directly
//! to a compiled graph with `dispatch`. Each buffer remembers the fence of
//! the last submission that used it so CPU access never races the device.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use webnn_backends::{BufferBinding, Resource};
use webnn_graph::TensorDescriptor;

/// Byte alignment of standalone buffer allocations.
pub const BUFFER_ALIGNMENT: usize = 4;

struct BufferInner {
    context_id: u64,
    descriptor: TensorDescriptor,
    byte_length: usize,
    resource: Resource,
    last_fence: AtomicU64,
}

/// Device buffer owned by one context. Clones share the allocation.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    pub(crate) fn new(context_id: u64, descriptor: TensorDescriptor, byte_length: usize, resource: Resource) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                context_id,
                descriptor,
                byte_length,
                resource,
                last_fence: AtomicU64::new(0),
            }),
        }
    }

    pub fn descriptor(&self) -> &TensorDescriptor {
        &self.inner.descriptor
    }

    /// Packed byte length of the tensor; the allocation may be larger.
    pub fn byte_length(&self) -> usize {
        self.inner.byte_length
    }

    pub fn allocation_size(&self) -> usize {
        self.inner.resource.size()
    }

    /// Fence value of the last submission that touched this buffer.
    pub fn last_submission_fence(&self) -> u64 {
        self.inner.last_fence.load(Ordering::Acquire)
    }

    pub(crate) fn context_id(&self) -> u64 {
        self.inner.context_id
    }

    pub(crate) fn resource(&self) -> &Resource {
        &self.inner.resource
    }

    pub(crate) fn binding(&self) -> BufferBinding {
        BufferBinding {
            resource: self.inner.resource.clone(),
            offset: 0,
            length: self.inner.byte_length,
        }
    }

    pub(crate) fn record_submission(&self, fence_value: u64) {
        self.inner.last_fence.fetch_max(fence_value, Ordering::AcqRel);
    }

    pub(crate) fn same_allocation(&self, other: &Buffer) -> bool {
        self.inner.resource.ptr_eq(&other.inner.resource)
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("descriptor", &self.inner.descriptor)
            .field("handle", &self.inner.resource.handle())
            .field("last_fence", &self.last_submission_fence())
            .finish()
    }
}
