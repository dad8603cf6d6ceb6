//! Backend trait and shared types

mod traits;
mod types;

pub use traits::{Backend, CompiledProgram};
pub use types::{BackendCapabilities, BufferHandle, DataTypeLimits, HeapType, ResourceState};
