//! Compiled graphs and their device state

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use webnn_backends::{
    Backend, BufferBinding, CompiledProgram, ExecuteBindings, InitializeBindings, LoweredGraph, Resource,
};
use webnn_graph::{GraphInfo, TensorDescriptor};

/// Named input of a compiled graph.
#[derive(Debug, Clone, PartialEq)]
pub struct InputBinding {
    /// Position in the program's input slots; `None` when no operator
    /// reads the input
    pub slot: Option<usize>,
    pub descriptor: TensorDescriptor,
    pub byte_length: usize,
}

/// Named output of a compiled graph.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputBinding {
    pub name: String,
    pub descriptor: TensorDescriptor,
    pub byte_length: usize,
}

/// A graph compiled for one context.
///
/// Holds the compiled program together with the device allocations it was
/// initialised into. Constants stay resident so initialisation can be
/// recorded again if a device fault leaves the persistent state undefined.
pub struct CompiledGraph<B: Backend> {
    context_id: u64,
    program: Arc<B::Program>,
    constants: Vec<Option<BufferBinding>>,
    persistent: Option<Resource>,
    temporary: Option<Resource>,
    inputs: BTreeMap<String, InputBinding>,
    outputs: Vec<OutputBinding>,
    initialized: Arc<AtomicBool>,
}

impl<B: Backend> CompiledGraph<B> {
    pub(crate) fn new(
        context_id: u64,
        graph: &GraphInfo,
        program: Arc<B::Program>,
        constants: Vec<Option<BufferBinding>>,
        persistent: Option<Resource>,
        temporary: Option<Resource>,
    ) -> Self {
        let lowered: &LoweredGraph = program.lowered();
        let inputs = graph
            .input_names()
            .filter_map(|(name, id)| {
                let descriptor = TensorDescriptor::from_operand(graph.operand(id).ok()?);
                Some((
                    name.to_string(),
                    InputBinding {
                        slot: lowered.input_slot(name).map(|(slot, _)| slot),
                        byte_length: descriptor.packed_byte_length().unwrap_or(0),
                        descriptor,
                    },
                ))
            })
            .collect();
        let outputs = lowered
            .output_slots
            .iter()
            .map(|output| OutputBinding {
                name: output.name.clone(),
                descriptor: output.desc.clone(),
                byte_length: output.byte_length(),
            })
            .collect();

        Self {
            context_id,
            program,
            constants,
            persistent,
            temporary,
            inputs,
            outputs,
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn program(&self) -> &Arc<B::Program> {
        &self.program
    }

    /// Named inputs in name order.
    pub fn inputs(&self) -> impl Iterator<Item = (&str, &InputBinding)> {
        self.inputs.iter().map(|(name, input)| (name.as_str(), input))
    }

    pub fn input(&self, name: &str) -> Option<&InputBinding> {
        self.inputs.get(name)
    }

    /// Outputs in binding order.
    pub fn outputs(&self) -> &[OutputBinding] {
        &self.outputs
    }

    pub fn output(&self, name: &str) -> Option<(usize, &OutputBinding)> {
        self.outputs.iter().enumerate().find(|(_, output)| output.name == name)
    }

    /// Whether the device-side initialisation is currently valid.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn context_id(&self) -> u64 {
        self.context_id
    }

    pub(crate) fn needs_initialization(&self) -> bool {
        !self.is_initialized() && (self.persistent.is_some() || self.constants.iter().any(Option::is_some))
    }

    pub(crate) fn set_initialized(&self, initialized: bool) {
        self.initialized.store(initialized, Ordering::Release);
    }

    /// Flag shared with completion callbacks.
    pub(crate) fn initialized_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.initialized)
    }

    pub(crate) fn initialize_bindings(&self) -> InitializeBindings {
        InitializeBindings {
            constants: self.constants.clone(),
            persistent: self.persistent.as_ref().map(Resource::whole),
        }
    }

    pub(crate) fn execute_bindings(
        &self,
        inputs: Vec<Option<BufferBinding>>,
        outputs: Vec<BufferBinding>,
    ) -> ExecuteBindings {
        ExecuteBindings {
            inputs,
            outputs,
            persistent: self.persistent.as_ref().map(Resource::whole),
            temporary: self.temporary.as_ref().map(Resource::whole),
        }
    }

    pub(crate) fn input_slot_count(&self) -> usize {
        self.program.lowered().input_slots.len()
    }
}

impl<B: Backend> std::fmt::Debug for CompiledGraph<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.program.lowered().nodes.len())
            .field("inputs", &self.inputs.keys().collect::<Vec<_>>())
            .field("outputs", &self.outputs.iter().map(|o| &o.name).collect::<Vec<_>>())
            .field("persistent", &self.persistent.as_ref().map(Resource::size))
            .field("temporary", &self.temporary.as_ref().map(Resource::size))
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
