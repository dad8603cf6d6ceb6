//! Handles, heaps, resource states and capability descriptions

use std::collections::HashMap;
use std::fmt;

use webnn_graph::{DataType, InputLayout, SupportedDataTypes};

/// Handle to a device allocation
///
/// Handles are opaque and owned by the backend's memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    /// Create a new buffer handle
    pub const fn new(id: u64) -> Self {
        BufferHandle(id)
    }

    /// Get the internal ID
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}", self.0)
    }
}

/// Memory pool an allocation lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// CPU-writable, device-readable
    Upload,
    /// Device-writable, CPU-readable
    Readback,
    /// Device-private; reachable only through copies
    Default,
    /// CPU and device visible; only on unified-memory devices
    Shared,
}

impl HeapType {
    /// State a fresh allocation starts in.
    pub const fn initial_state(self) -> ResourceState {
        match self {
            HeapType::Upload => ResourceState::GenericRead,
            HeapType::Readback => ResourceState::CopyDest,
            HeapType::Default | HeapType::Shared => ResourceState::Common,
        }
    }

    pub const fn is_cpu_writable(self) -> bool {
        matches!(self, HeapType::Upload | HeapType::Shared)
    }

    pub const fn is_cpu_readable(self) -> bool {
        matches!(self, HeapType::Readback | HeapType::Shared)
    }
}

impl fmt::Display for HeapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HeapType::Upload => "upload",
            HeapType::Readback => "readback",
            HeapType::Default => "default",
            HeapType::Shared => "shared",
        };
        f.write_str(name)
    }
}

/// Usage state of a device allocation.
///
/// Device-private and shared allocations rest in `Common` between
/// operations; copies move them through `CopyDest` / `CopySource` and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    Common,
    CopySource,
    CopyDest,
    UnorderedAccess,
    GenericRead,
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceState::Common => "common",
            ResourceState::CopySource => "copy_source",
            ResourceState::CopyDest => "copy_dest",
            ResourceState::UnorderedAccess => "unordered_access",
            ResourceState::GenericRead => "generic_read",
        };
        f.write_str(name)
    }
}

/// Per-operator data type limits, keyed by operator name.
///
/// Operators without an entry accept every type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTypeLimits {
    limits: HashMap<&'static str, SupportedDataTypes>,
}

impl DataTypeLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, operator: &'static str, types: SupportedDataTypes) -> Self {
        self.limits.insert(operator, types);
        self
    }

    pub fn get(&self, operator: &str) -> Option<SupportedDataTypes> {
        self.limits.get(operator).copied()
    }

    pub fn supports(&self, operator: &str, data_type: DataType) -> bool {
        self.get(operator).is_none_or(|types| types.contains(data_type))
    }
}

/// What a backend can lower and how its memory behaves.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCapabilities {
    /// Layout convolution, pooling and resampling run in
    pub required_layout: InputLayout,
    /// Element type comparisons natively produce
    pub native_boolean: DataType,
    pub max_rank: usize,
    pub data_type_limits: DataTypeLimits,
    /// Device reads CPU-written memory without a copy
    pub is_uma: bool,
    /// Minimum offset/length alignment for bindings
    pub alignment: usize,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self {
            required_layout: InputLayout::Nchw,
            native_boolean: DataType::Uint8,
            max_rank: 8,
            data_type_limits: DataTypeLimits::new(),
            is_uma: false,
            alignment: 16,
        }
    }
}
