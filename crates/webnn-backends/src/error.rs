//! Error types for lowering, recording and device execution

use std::fmt;

use webnn_graph::{DataType, ShapeError};

use crate::backend::{BufferHandle, ResourceState};
use crate::command::RecorderState;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised below the execution context
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// Operator or attribute combination the backend cannot lower
    #[error("{operator} (operator {index}) is not supported: {reason}")]
    NotSupported {
        operator: String,
        index: usize,
        reason: String,
    },

    /// Allocation exceeds what the device can provide
    #[error("out of memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: usize, available: usize },

    /// Device is gone; nothing further will complete
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// A submitted command list faulted on the device
    #[error("execution fault at fence {fence_value}: {reason}")]
    ExecutionFault { fence_value: u64, reason: String },

    /// Handle does not name a live allocation
    #[error("invalid resource: {0}")]
    InvalidResource(BufferHandle),

    /// Resource cannot be used this way (e.g. mapping a device-private heap)
    #[error("resource {handle}: {reason}")]
    ResourceMisuse { handle: BufferHandle, reason: String },

    /// Access past the end of an allocation or binding
    #[error("access out of bounds: offset {offset} + size {size} > {limit}")]
    OutOfBounds { offset: usize, size: usize, limit: usize },

    /// Barrier whose `before` state is not the resource's current state
    #[error("barrier on {handle} expects {expected} but resource is {actual}")]
    BarrierMismatch {
        handle: BufferHandle,
        expected: ResourceState,
        actual: ResourceState,
    },

    /// Recorder used in the wrong state
    #[error("command recorder is {actual}, expected {expected}")]
    RecorderState {
        expected: RecorderState,
        actual: RecorderState,
    },

    /// Lowered graph and bindings disagree
    #[error("binding error: {0}")]
    Binding(String),

    /// Shape arithmetic failed while building a view
    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),

    /// Device kernel has no implementation for this type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Create a not-supported error for the operator at `index`
    pub fn not_supported(operator: impl Into<String>, index: usize, reason: impl Into<String>) -> Self {
        Self::NotSupported {
            operator: operator.into(),
            index,
            reason: reason.into(),
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl fmt::Display, actual: DataType) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn binding(msg: impl Into<String>) -> Self {
        Self::Binding(msg.into())
    }

    /// Device-level failure that invalidates every later submission.
    pub fn is_device_loss(&self) -> bool {
        matches!(self, Self::DeviceLost(_) | Self::OutOfMemory { .. })
    }
}
