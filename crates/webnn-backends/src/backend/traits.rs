//! Backend trait for graph lowering, compilation and execution
//!
//! A backend turns a validated [`GraphInfo`] into its own compiled program
//! type and runs command lists against a device timeline.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      Backend Trait                        │
//! │  - lower() / compile()                                    │
//! │  - create_buffer() / write_mapped() / read_mapped()       │
//! │  - execute(CommandList, fence value) + fence()            │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │
//!                    ┌────────┴────────┐
//!                    ▼                 ▼
//!              ┌──────────┐      ┌──────────┐
//!              │   CPU    │      │  other   │
//!              │ Backend  │      │ devices  │
//!              └──────────┘      └──────────┘
//! ```

use webnn_graph::GraphInfo;

use super::types::{BackendCapabilities, HeapType};
use crate::command::{CommandList, Fence};
use crate::error::Result;
use crate::lowering::{self, LoweredGraph};
use crate::resource::Resource;

/// Backend-specific compiled form of a lowered graph.
pub trait CompiledProgram: Send + Sync + 'static {
    /// The lowered graph the program was compiled from.
    fn lowered(&self) -> &LoweredGraph;

    /// Bytes of state written once by initialisation and reused by every
    /// execution; 0 if none.
    fn persistent_buffer_size(&self) -> usize;

    /// Scratch bytes needed during one execution; 0 if none.
    fn temporary_buffer_size(&self) -> usize;
}

/// Backend trait for graph execution
///
/// One backend instance owns one device and its single queue fence.
/// Execution contexts are generic over this trait.
pub trait Backend: Send + Sync + 'static {
    type Program: CompiledProgram + std::fmt::Debug;

    // ============================================================================================
    // Identity
    // ============================================================================================

    /// Short backend name used in logs and cache keys
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> &BackendCapabilities;

    // ============================================================================================
    // Compilation
    // ============================================================================================

    /// Lower a validated graph into backend nodes.
    ///
    /// # Errors
    ///
    /// Returns `NotSupported` naming the first operator the backend cannot
    /// express.
    fn lower(&self, graph: &GraphInfo) -> Result<LoweredGraph> {
        lowering::lower(graph, self.capabilities())
    }

    /// Compile a lowered graph. May be CPU-expensive; touches no device
    /// resources, so callers can run it on a worker thread.
    fn compile(&self, lowered: &LoweredGraph) -> Result<Self::Program>;

    // ============================================================================================
    // Memory
    // ============================================================================================

    /// Allocate `size` bytes in `heap`
    ///
    /// # Errors
    ///
    /// `OutOfMemory` if the device cannot satisfy the request; `Other` for a
    /// heap the device does not offer.
    fn create_buffer(&self, size: usize, heap: HeapType) -> Result<Resource>;

    /// CPU write into a mappable allocation
    fn write_mapped(&self, resource: &Resource, offset: usize, data: &[u8]) -> Result<()>;

    /// CPU read from a mappable allocation
    fn read_mapped(&self, resource: &Resource, offset: usize, length: usize) -> Result<Vec<u8>>;

    // ============================================================================================
    // Execution
    // ============================================================================================

    /// Hand `list` to the device; it signals `fence_value` on the fence
    /// when done. Must not block on completion.
    fn execute(&self, list: CommandList<Self::Program>, fence_value: u64) -> Result<()>;

    /// Completion fence of the device queue
    fn fence(&self) -> &Fence;
}
