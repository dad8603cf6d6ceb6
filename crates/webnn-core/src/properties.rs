//! Context configuration and the properties a context reports

use webnn_backends::{BackendCapabilities, DataTypeLimits};
use webnn_graph::{DataType, InputLayout};

/// Options for [`crate::Adapter::create_context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    /// Compile on the rayon pool instead of the calling thread
    pub compile_on_worker: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            compile_on_worker: true,
        }
    }
}

impl ContextOptions {
    pub fn with_compile_on_worker(mut self, compile_on_worker: bool) -> Self {
        self.compile_on_worker = compile_on_worker;
        self
    }
}

/// What graphs built for a context should look like.
///
/// Lowering consults the same limits, so a graph that respects them never
/// fails with `NotSupported`.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextProperties {
    /// Layout spatial operators run in without extra transposes
    pub preferred_input_layout: InputLayout,
    pub data_type_limits: DataTypeLimits,
    pub max_rank: usize,
}

impl ContextProperties {
    pub fn from_capabilities(capabilities: &BackendCapabilities) -> Self {
        Self {
            preferred_input_layout: capabilities.required_layout,
            data_type_limits: capabilities.data_type_limits.clone(),
            max_rank: capabilities.max_rank,
        }
    }

    pub fn supports(&self, operator: &str, data_type: DataType) -> bool {
        self.data_type_limits.supports(operator, data_type)
    }
}
