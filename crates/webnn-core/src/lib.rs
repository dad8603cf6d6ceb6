//! # webnn-core - Graph Execution Contexts
//!
//! Compiles backend-neutral graphs and runs them on a device without the CPU
//! ever observing results before the device has produced them.
//!
//! ## Architecture
//!
//! ```text
//! Adapter (backend + queue + program cache, shared)
//!   └─ Context (recorder, loss state)
//!        ├─ create_graph: validate → lower → compile (rayon) → initialise
//!        ├─ compute:      upload → record → submit → await fence → readback
//!        ├─ dispatch:     bind standalone buffers, submit, no wait
//!        └─ create_buffer / write_buffer / read_buffer
//! ```
//!
//! ### Errors
//!
//! Every failure is an [`Error`] with an [`ErrorCode`]: `Validation` for a
//! malformed graph, `NotSupported` for a graph the backend cannot run,
//! `InvalidRequest` for caller mistakes and `Unknown` for device failures.
//! Device loss or allocation failure loses the context for good.
//!
//! ## Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use webnn_backends::CpuBackendOptions;
//! use webnn_core::{Adapter, ContextOptions};
//! use webnn_graph::{DataType, GraphBuilder, OperatorKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut builder = GraphBuilder::new();
//! let x = builder.input("x", DataType::Float32, &[4]);
//! builder.output_operation("y", OperatorKind::Relu, &[x])?;
//! let graph = builder.build();
//!
//! let adapter = Adapter::cpu(CpuBackendOptions::default());
//! let context = adapter.create_context(ContextOptions::default());
//!
//! futures::executor::block_on(async {
//!     let compiled = context.create_graph(&graph).await?;
//!     let input: Vec<u8> = [-1.0f32, 2.0, -3.0, 4.0].iter().flat_map(|v| v.to_le_bytes()).collect();
//!     let outputs = context
//!         .compute(&compiled, &HashMap::from([("x".to_string(), input)]))
//!         .await?;
//!     assert_eq!(outputs["y"].len(), 16);
//!     Ok::<_, webnn_core::Error>(())
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod buffer;
pub mod context;
pub mod error;
pub mod graph;
pub mod properties;

// Re-export primary types
pub use adapter::Adapter;
pub use buffer::{Buffer, BUFFER_ALIGNMENT};
pub use context::{Context, NamedBuffers, NamedBytes};
pub use error::{Error, ErrorCode, LostReason, Result};
pub use graph::{CompiledGraph, InputBinding, OutputBinding};
pub use properties::{ContextOptions, ContextProperties};
