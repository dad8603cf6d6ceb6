//! Backend layer of the WebNN engine
//!
//! This crate provides:
//! - **Lowering**: validated graph → backend nodes, with layout, broadcast
//!   and comparison rewrites
//! - **Backend Trait**: compile, allocate, execute against a device fence
//! - **Command recording**: checked recorder, FIFO queue, monotonic fence
//! - **Staging**: combined aligned upload and readback allocations
//! - **CPU Backend**: reference device running on its own thread
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 GraphInfo (validated)                    │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ lower()
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │          LoweredGraph (nodes, input/output slots)        │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ compile()           ProgramCache
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │  CommandRecorder ─► CommandQueue ─► Backend::execute     │
//! │                          ▲                 │             │
//! │                          └──── Fence ◄─────┘             │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use webnn_backends::{Backend, CommandQueue, CommandRecorder, CpuBackend, HeapType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Arc::new(CpuBackend::default());
//! let queue = CommandQueue::new(Arc::clone(&backend));
//!
//! let upload = backend.create_buffer(4, HeapType::Upload)?;
//! let readback = backend.create_buffer(4, HeapType::Readback)?;
//! backend.write_mapped(&upload, 0, &[1, 2, 3, 4])?;
//!
//! let mut recorder = CommandRecorder::new();
//! recorder.open()?;
//! recorder.copy_buffer_region(&readback, 0, &upload, 0, 4)?;
//! let fence = recorder.close_and_execute(&queue)?;
//! futures::executor::block_on(queue.wait(fence))?;
//!
//! assert_eq!(backend.read_mapped(&readback, 0, 4)?, vec![1, 2, 3, 4]);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod command;
pub mod error;
pub mod lowering;
pub mod program_cache;
pub mod resource;
pub mod staging;

// Re-export public API
pub use backend::{
    Backend, BackendCapabilities, BufferHandle, CompiledProgram, DataTypeLimits, HeapType, ResourceState,
};
pub use backends::{CpuBackend, CpuBackendOptions, CpuProgram};
pub use command::{
    BarrierTransition, Command, CommandList, CommandQueue, CommandRecorder, ExecuteBindings, Fence,
    FenceWaitError, InitializeBindings, RecorderState,
};
pub use error::{BackendError, Result};
pub use lowering::{lower, LoweredGraph, NodeKind};
pub use program_cache::{ProgramCache, ProgramKey};
pub use resource::{BufferBinding, Resource, ResourceAllocator};
pub use staging::{align_up, upload, AlignedLayout, OutputAllocation, StagedUpload};
