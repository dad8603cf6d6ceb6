//! Memory manager for the CPU device
//!
//! Every allocation is a zeroed `Vec<u8>` tagged with its heap and current
//! usage state. An optional budget caps the total number of live bytes so
//! that allocation failure can be exercised.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::{BufferHandle, HeapType, ResourceState};
use crate::error::{BackendError, Result};
use crate::resource::{check_range, ResourceAllocator};

struct CpuBuffer {
    data: Vec<u8>,
    heap: HeapType,
    state: ResourceState,
}

pub struct MemoryManager {
    buffers: HashMap<u64, CpuBuffer>,
    next_buffer_id: u64,
    allocated: usize,
    budget: Option<usize>,
}

impl MemoryManager {
    pub fn new(budget: Option<usize>) -> Self {
        Self {
            buffers: HashMap::new(),
            next_buffer_id: 1,
            allocated: 0,
            budget,
        }
    }

    // ============================================================================================
    // Buffer Management
    // ============================================================================================

    /// Allocate a zeroed buffer in `heap`
    pub fn allocate(&mut self, size: usize, heap: HeapType) -> Result<BufferHandle> {
        if let Some(budget) = self.budget {
            let available = budget.saturating_sub(self.allocated);
            if size > available {
                return Err(BackendError::OutOfMemory {
                    requested: size,
                    available,
                });
            }
        }

        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.allocated += size;
        self.buffers.insert(
            id,
            CpuBuffer {
                data: vec![0u8; size],
                heap,
                state: heap.initial_state(),
            },
        );
        Ok(BufferHandle::new(id))
    }

    /// Free a buffer
    pub fn free(&mut self, handle: BufferHandle) -> Result<()> {
        let buffer = self
            .buffers
            .remove(&handle.id())
            .ok_or(BackendError::InvalidResource(handle))?;
        self.allocated -= buffer.data.len();
        Ok(())
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&CpuBuffer> {
        self.buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidResource(handle))
    }

    fn buffer_mut(&mut self, handle: BufferHandle) -> Result<&mut CpuBuffer> {
        self.buffers
            .get_mut(&handle.id())
            .ok_or(BackendError::InvalidResource(handle))
    }

    pub fn heap(&self, handle: BufferHandle) -> Result<HeapType> {
        Ok(self.buffer(handle)?.heap)
    }

    pub fn state(&self, handle: BufferHandle) -> Result<ResourceState> {
        Ok(self.buffer(handle)?.state)
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    // ============================================================================================
    // Data Access
    // ============================================================================================

    pub fn bytes(&self, handle: BufferHandle, offset: usize, length: usize) -> Result<&[u8]> {
        let buffer = self.buffer(handle)?;
        check_range(offset, length, buffer.data.len())?;
        Ok(&buffer.data[offset..offset + length])
    }

    pub fn bytes_mut(&mut self, handle: BufferHandle, offset: usize, length: usize) -> Result<&mut [u8]> {
        let buffer = self.buffer_mut(handle)?;
        check_range(offset, length, buffer.data.len())?;
        Ok(&mut buffer.data[offset..offset + length])
    }

    pub fn write(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<()> {
        self.bytes_mut(handle, offset, data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub fn read(&self, handle: BufferHandle, offset: usize, length: usize) -> Result<Vec<u8>> {
        Ok(self.bytes(handle, offset, length)?.to_vec())
    }

    /// Device-side copy. `src` must be readable by copies and `dst` writable.
    pub fn copy_region(
        &mut self,
        dst: BufferHandle,
        dst_offset: usize,
        src: BufferHandle,
        src_offset: usize,
        size: usize,
    ) -> Result<()> {
        let src_state = self.state(src)?;
        if !matches!(src_state, ResourceState::CopySource | ResourceState::GenericRead) {
            return Err(BackendError::ResourceMisuse {
                handle: src,
                reason: format!("copy source is in state {src_state}"),
            });
        }
        let dst_state = self.state(dst)?;
        if dst_state != ResourceState::CopyDest {
            return Err(BackendError::ResourceMisuse {
                handle: dst,
                reason: format!("copy destination is in state {dst_state}"),
            });
        }

        let data = self.bytes(src, src_offset, size)?.to_vec();
        self.write(dst, dst_offset, &data)
    }

    /// Apply a barrier, checking the resource is in `before`.
    pub fn transition(&mut self, handle: BufferHandle, before: ResourceState, after: ResourceState) -> Result<()> {
        let buffer = self.buffer_mut(handle)?;
        if buffer.state != before {
            return Err(BackendError::BarrierMismatch {
                handle,
                expected: before,
                actual: buffer.state,
            });
        }
        buffer.state = after;
        Ok(())
    }
}

/// Frees CPU allocations when their last [`Resource`](crate::resource::Resource)
/// is dropped.
pub(crate) struct CpuAllocator {
    pub(crate) memory: Arc<RwLock<MemoryManager>>,
}

impl ResourceAllocator for CpuAllocator {
    fn release(&self, handle: BufferHandle) {
        if let Err(error) = self.memory.write().free(handle) {
            tracing::warn!(%handle, %error, "release_failed");
        }
    }
}
