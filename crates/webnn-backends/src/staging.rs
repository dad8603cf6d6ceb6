//! Combined, aligned allocations for uploads and readbacks
//!
//! Every batch of buffers (constants at compile time, named inputs or outputs
//! at execution time) shares one allocation. Each buffer starts on an aligned
//! offset, in arrival order:
//!
//! ```text
//!   offset 0        align_up(len0)            align_up(len0)+align_up(len1)
//!   |--- buf0 ---pad|------ buf1 ------pad|--- buf2 ---pad|
//! ```

use std::ops::Range;
use std::time::Instant;

use webnn_tracing::performance::{record_transfer, TransferDirection};

use crate::backend::{Backend, HeapType, ResourceState};
use crate::command::{BarrierTransition, CommandRecorder};
use crate::error::{BackendError, Result};
use crate::resource::{BufferBinding, Resource};

/// Round `value` up to a multiple of `alignment` (a power of two).
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// [`align_up`] that reports overflow instead of wrapping.
pub fn checked_align_up(value: usize, alignment: usize) -> Option<usize> {
    Some(value.checked_add(alignment - 1)? & !(alignment - 1))
}

/// Byte ranges of a batch of buffers inside one combined allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignedLayout {
    ranges: Vec<Range<usize>>,
    total: usize,
    alignment: usize,
}

impl AlignedLayout {
    /// Lay out `lengths` in arrival order; the total is the sum of the
    /// individually aligned lengths.
    pub fn new(lengths: impl IntoIterator<Item = usize>, alignment: usize) -> Result<Self> {
        if !alignment.is_power_of_two() {
            return Err(BackendError::Other(format!(
                "alignment {alignment} is not a power of two"
            )));
        }

        let overflow = || BackendError::Other("combined allocation size overflows".into());
        let mut ranges = Vec::new();
        let mut total = 0usize;
        for length in lengths {
            let begin = total;
            let end = begin.checked_add(length).ok_or_else(overflow)?;
            total = checked_align_up(end, alignment).ok_or_else(overflow)?;
            ranges.push(begin..end);
        }

        Ok(Self {
            ranges,
            total,
            alignment,
        })
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    pub fn total_size(&self) -> usize {
        self.total
    }

    /// Size to actually allocate; never zero.
    pub fn allocation_size(&self) -> usize {
        self.total.max(self.alignment)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// One binding per range, all on `resource`.
    pub fn bindings(&self, resource: &Resource) -> Result<Vec<BufferBinding>> {
        self.ranges
            .iter()
            .map(|range| resource.slice(range.start, range.len()))
            .collect()
    }

    /// Cut a mapped copy of the whole allocation back into per-buffer bytes.
    pub fn split(&self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.ranges
            .iter()
            .map(|range| {
                bytes
                    .get(range.clone())
                    .map(<[u8]>::to_vec)
                    .ok_or(BackendError::OutOfBounds {
                        offset: range.start,
                        size: range.len(),
                        limit: bytes.len(),
                    })
            })
            .collect()
    }
}

/// Result of staging a batch of buffers for the device.
#[derive(Debug)]
pub struct StagedUpload {
    pub layout: AlignedLayout,
    /// Allocation the bindings point into
    pub device: Resource,
    /// CPU-written staging allocation; the same resource as `device` on UMA
    pub staging: Resource,
    pub bindings: Vec<BufferBinding>,
}

/// Copy `buffers` into one staging allocation and make them device-visible.
///
/// On unified memory the staging allocation is bound directly. Otherwise a
/// device-private allocation is created and a copy is recorded into it,
/// bracketed by barriers.
pub fn upload<B: Backend>(
    backend: &B,
    recorder: &mut CommandRecorder<B::Program>,
    buffers: &[&[u8]],
) -> Result<StagedUpload> {
    let start = Instant::now();
    let capabilities = backend.capabilities();
    let layout = AlignedLayout::new(buffers.iter().map(|b| b.len()), capabilities.alignment)?;
    let size = layout.allocation_size();

    let staging = backend.create_buffer(size, HeapType::Upload)?;
    for (range, data) in layout.ranges().iter().zip(buffers) {
        backend.write_mapped(&staging, range.start, data)?;
    }

    let device = if capabilities.is_uma {
        staging.clone()
    } else {
        let device = backend.create_buffer(size, HeapType::Default)?;
        recorder.resource_barrier(vec![BarrierTransition::new(
            &device,
            ResourceState::Common,
            ResourceState::CopyDest,
        )])?;
        recorder.copy_buffer_region(&device, 0, &staging, 0, size)?;
        recorder.resource_barrier(vec![BarrierTransition::new(
            &device,
            ResourceState::CopyDest,
            ResourceState::Common,
        )])?;
        device
    };

    let bindings = layout.bindings(&device)?;
    record_transfer(
        layout.total_size(),
        TransferDirection::Upload,
        start.elapsed().as_micros() as u64,
    );

    Ok(StagedUpload {
        layout,
        device,
        staging,
        bindings,
    })
}

/// Combined output allocation and, off UMA, its readback staging.
#[derive(Debug)]
pub struct OutputAllocation {
    pub layout: AlignedLayout,
    pub device: Resource,
    pub readback: Option<Resource>,
    pub bindings: Vec<BufferBinding>,
}

impl OutputAllocation {
    /// Allocate one device-writable region for outputs of `lengths` bytes.
    pub fn new<B: Backend>(backend: &B, lengths: impl IntoIterator<Item = usize>) -> Result<Self> {
        let capabilities = backend.capabilities();
        let layout = AlignedLayout::new(lengths, capabilities.alignment)?;
        let size = layout.allocation_size();

        let (device, readback) = if capabilities.is_uma {
            (backend.create_buffer(size, HeapType::Shared)?, None)
        } else {
            (
                backend.create_buffer(size, HeapType::Default)?,
                Some(backend.create_buffer(size, HeapType::Readback)?),
            )
        };
        let bindings = layout.bindings(&device)?;

        Ok(Self {
            layout,
            device,
            readback,
            bindings,
        })
    }

    /// Record the copy into readback staging, if one is needed.
    pub fn record_readback<P>(&self, recorder: &mut CommandRecorder<P>) -> Result<()> {
        let Some(readback) = &self.readback else {
            return Ok(());
        };
        recorder.resource_barrier(vec![BarrierTransition::new(
            &self.device,
            ResourceState::Common,
            ResourceState::CopySource,
        )])?;
        recorder.copy_buffer_region(readback, 0, &self.device, 0, self.device.size())?;
        recorder.resource_barrier(vec![BarrierTransition::new(
            &self.device,
            ResourceState::CopySource,
            ResourceState::Common,
        )])?;
        Ok(())
    }

    /// Map the CPU-readable copy and split it per output.
    ///
    /// Only valid once the submission that wrote the outputs has completed.
    pub fn read<B: Backend>(&self, backend: &B) -> Result<Vec<Vec<u8>>> {
        let start = Instant::now();
        let source = self.readback.as_ref().unwrap_or(&self.device);
        let bytes = backend.read_mapped(source, 0, self.layout.total_size())?;
        let outputs = self.layout.split(&bytes)?;
        record_transfer(
            self.layout.total_size(),
            TransferDirection::Readback,
            start.elapsed().as_micros() as u64,
        );
        Ok(outputs)
    }
}
