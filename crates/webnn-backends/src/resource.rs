//! Reference-counted device allocations and bindings into them

use std::fmt;
use std::sync::Arc;

use crate::backend::{BufferHandle, HeapType};
use crate::error::{BackendError, Result};

/// Releases allocations once the last [`Resource`] reference is dropped.
pub trait ResourceAllocator: Send + Sync {
    fn release(&self, handle: BufferHandle);
}

struct ResourceInner {
    handle: BufferHandle,
    size: usize,
    heap: HeapType,
    allocator: Arc<dyn ResourceAllocator>,
}

impl Drop for ResourceInner {
    fn drop(&mut self) {
        self.allocator.release(self.handle);
    }
}

/// Shared ownership of one device allocation.
///
/// Clones are cheap. The allocation is freed when the last clone is dropped,
/// which is how in-flight command lists and the queue keep memory alive
/// until the device is done with it.
#[derive(Clone)]
pub struct Resource(Arc<ResourceInner>);

impl Resource {
    pub fn new(handle: BufferHandle, size: usize, heap: HeapType, allocator: Arc<dyn ResourceAllocator>) -> Self {
        Self(Arc::new(ResourceInner {
            handle,
            size,
            heap,
            allocator,
        }))
    }

    pub fn handle(&self) -> BufferHandle {
        self.0.handle
    }

    pub fn size(&self) -> usize {
        self.0.size
    }

    pub fn heap(&self) -> HeapType {
        self.0.heap
    }

    /// Binding covering the whole allocation.
    pub fn whole(&self) -> BufferBinding {
        BufferBinding {
            resource: self.clone(),
            offset: 0,
            length: self.size(),
        }
    }

    /// Binding over `[offset, offset + length)`, bounds checked.
    pub fn slice(&self, offset: usize, length: usize) -> Result<BufferBinding> {
        check_range(offset, length, self.size())?;
        Ok(BufferBinding {
            resource: self.clone(),
            offset,
            length,
        })
    }

    pub fn ptr_eq(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("handle", &self.0.handle)
            .field("size", &self.0.size)
            .field("heap", &self.0.heap)
            .finish()
    }
}

/// `(resource, offset, length)` sub-region handed to the device.
#[derive(Debug, Clone)]
pub struct BufferBinding {
    pub resource: Resource,
    pub offset: usize,
    pub length: usize,
}

impl BufferBinding {
    pub fn handle(&self) -> BufferHandle {
        self.resource.handle()
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// `offset + size <= limit`, without overflow.
pub fn check_range(offset: usize, size: usize, limit: usize) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= limit => Ok(()),
        _ => Err(BackendError::OutOfBounds {
            offset,
            size,
            limit,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingAllocator {
        released: Mutex<Vec<BufferHandle>>,
    }

    impl ResourceAllocator for RecordingAllocator {
        fn release(&self, handle: BufferHandle) {
            self.released.lock().push(handle);
        }
    }

    #[test]
    fn released_after_last_clone() {
        let allocator = Arc::new(RecordingAllocator::default());
        let resource = Resource::new(BufferHandle::new(7), 64, HeapType::Default, allocator.clone());
        let binding = resource.slice(16, 16).unwrap();
        drop(resource);
        assert!(allocator.released.lock().is_empty());
        drop(binding);
        assert_eq!(*allocator.released.lock(), vec![BufferHandle::new(7)]);
    }

    #[test]
    fn slice_is_bounds_checked() {
        let allocator = Arc::new(RecordingAllocator::default());
        let resource = Resource::new(BufferHandle::new(1), 32, HeapType::Upload, allocator);
        assert!(resource.slice(0, 32).is_ok());
        assert!(matches!(
            resource.slice(16, 17),
            Err(BackendError::OutOfBounds { offset: 16, size: 17, limit: 32 })
        ));
        assert!(resource.slice(usize::MAX, 2).is_err());
        assert_eq!(resource.whole().end(), 32);
    }
}
