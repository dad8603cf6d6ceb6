//! Compiled CPU program: buffer plan plus the interpreter that runs it

use std::ops::Range;

use half::f16;
use webnn_graph::{DataType, TensorDescriptor};

use webnn_tracing::perf_span;

use super::kernels::{self, Tensor};
use super::memory::MemoryManager;
use crate::backend::CompiledProgram;
use crate::command::{ExecuteBindings, InitializeBindings};
use crate::error::{BackendError, Result};
use crate::lowering::{LoweredGraph, Node, NodeOutput, NodeSource};
use crate::resource::BufferBinding;
use crate::staging::AlignedLayout;

/// Alignment of sub-allocations inside the persistent and temporary buffers.
const PLAN_ALIGNMENT: usize = 16;

/// Where a node's result lives during one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
enum NodeStorage {
    Temporary(Range<usize>),
    Output(usize),
}

/// CPU compiled program.
///
/// Constants are copied into the persistent buffer by initialisation.
/// Every node result that is not a graph output gets its own region of the
/// temporary buffer.
#[derive(Debug)]
pub struct CpuProgram {
    lowered: LoweredGraph,
    constant_ranges: Vec<Option<Range<usize>>>,
    persistent_size: usize,
    node_storage: Vec<NodeStorage>,
    temporary_size: usize,
}

impl CpuProgram {
    #[tracing::instrument(skip(lowered), fields(nodes = lowered.nodes.len()))]
    pub(crate) fn compile(lowered: &LoweredGraph) -> Result<Self> {
        let constant_lengths: Vec<usize> = lowered
            .input_slots
            .iter()
            .filter(|slot| slot.is_constant())
            .map(|slot| slot.byte_length())
            .collect();
        let constants = AlignedLayout::new(constant_lengths, PLAN_ALIGNMENT)?;
        let mut constant_range = constants.ranges().iter().cloned();
        let constant_ranges = lowered
            .input_slots
            .iter()
            .map(|slot| if slot.is_constant() { constant_range.next() } else { None })
            .collect();

        let mut temporary_lengths = Vec::new();
        for node in &lowered.nodes {
            if lowered.output_slot_of(node.id).is_none() {
                let length = node
                    .output
                    .total_bytes()
                    .ok_or_else(|| BackendError::Other(format!("node {} output overflows", node.label)))?;
                temporary_lengths.push(length);
            }
        }
        let temporaries = AlignedLayout::new(temporary_lengths, PLAN_ALIGNMENT)?;
        let mut temporary_range = temporaries.ranges().iter().cloned();
        let mut node_storage = Vec::with_capacity(lowered.nodes.len());
        for node in &lowered.nodes {
            let storage = match lowered.output_slot_of(node.id) {
                Some(slot) => NodeStorage::Output(slot),
                None => NodeStorage::Temporary(
                    temporary_range
                        .next()
                        .ok_or_else(|| BackendError::Other("temporary plan is short".into()))?,
                ),
            };
            node_storage.push(storage);
        }

        Ok(Self {
            lowered: lowered.clone(),
            constant_ranges,
            persistent_size: if constants.is_empty() { 0 } else { constants.allocation_size() },
            node_storage,
            temporary_size: if temporaries.is_empty() { 0 } else { temporaries.allocation_size() },
        })
    }

    /// Copy constants into the persistent buffer.
    pub(crate) fn initialize(&self, memory: &mut MemoryManager, bindings: &InitializeBindings) -> Result<()> {
        for (slot, range) in self.constant_ranges.iter().enumerate() {
            let Some(range) = range else { continue };
            let persistent = bindings
                .persistent
                .as_ref()
                .ok_or_else(|| BackendError::binding("constants need a persistent binding"))?;
            let source = bindings
                .constants
                .get(slot)
                .and_then(Option::as_ref)
                .ok_or_else(|| BackendError::binding(format!("constant slot {slot} is unbound")))?;
            let length = range.len();
            if source.length < length || persistent.length < range.end {
                return Err(BackendError::binding(format!(
                    "constant slot {slot} needs {length} bytes"
                )));
            }
            let bytes = memory.read(source.handle(), source.offset, length)?;
            memory.write(persistent.handle(), persistent.offset + range.start, &bytes)?;
        }
        Ok(())
    }

    /// Interpret every node in order.
    ///
    /// Nodes that only move data copy raw element bits. Integer nodes with
    /// an exact kernel compute in `i128`. Everything else computes in `f64`.
    pub(crate) fn execute(&self, memory: &mut MemoryManager, bindings: &ExecuteBindings) -> Result<()> {
        self.check_bindings(bindings)?;

        for (node, storage) in self.lowered.nodes.iter().zip(&self.node_storage) {
            let _span = perf_span!(node.kind.name());
            match Lane::of(node) {
                Lane::Bits => {
                    let inputs = self.load_inputs(memory, bindings, node, load_bits)?;
                    let values = kernels::run_bits(&node.kind, &inputs, &node.output.dimensions)?;
                    self.store(memory, bindings, node, storage, &values, store_bits)?;
                }
                Lane::Integer => {
                    let inputs = self.load_inputs(memory, bindings, node, load_integer)?;
                    let values = kernels::run_integer(&node.kind, &inputs, &node.output.dimensions)?;
                    self.store(memory, bindings, node, storage, &values, store_integer)?;
                }
                Lane::Float => {
                    let inputs = self.load_inputs(memory, bindings, node, load_element)?;
                    let values = kernels::run(&node.kind, &inputs, &node.output.dimensions)?;
                    self.store(memory, bindings, node, storage, &values, store_element)?;
                }
            }
        }
        Ok(())
    }

    fn check_bindings(&self, bindings: &ExecuteBindings) -> Result<()> {
        for (index, slot) in self.lowered.input_slots.iter().enumerate() {
            if slot.is_constant() {
                continue;
            }
            let binding = bindings
                .inputs
                .get(index)
                .and_then(Option::as_ref)
                .ok_or_else(|| BackendError::binding(format!("input slot {index} is unbound")))?;
            if binding.length < slot.byte_length() {
                return Err(BackendError::binding(format!(
                    "input slot {index} needs {} bytes, bound {}",
                    slot.byte_length(),
                    binding.length
                )));
            }
        }
        if bindings.outputs.len() != self.lowered.output_slots.len() {
            return Err(BackendError::binding(format!(
                "expected {} output bindings, got {}",
                self.lowered.output_slots.len(),
                bindings.outputs.len()
            )));
        }
        for (slot, binding) in self.lowered.output_slots.iter().zip(&bindings.outputs) {
            if binding.length < slot.byte_length() {
                return Err(BackendError::binding(format!(
                    "output {} needs {} bytes, bound {}",
                    slot.name,
                    slot.byte_length(),
                    binding.length
                )));
            }
        }
        if self.temporary_size > 0 && bindings.temporary.as_ref().is_none_or(|t| t.length < self.temporary_size) {
            return Err(BackendError::binding(format!(
                "program needs {} temporary bytes",
                self.temporary_size
            )));
        }
        Ok(())
    }

    fn storage_region<'b>(
        &self,
        bindings: &'b ExecuteBindings,
        storage: &NodeStorage,
    ) -> Result<(&'b BufferBinding, Range<usize>)> {
        match storage {
            NodeStorage::Output(slot) => {
                let binding = bindings
                    .outputs
                    .get(*slot)
                    .ok_or_else(|| BackendError::binding(format!("output slot {slot} is unbound")))?;
                Ok((binding, 0..binding.length))
            }
            NodeStorage::Temporary(range) => {
                let binding = bindings
                    .temporary
                    .as_ref()
                    .ok_or_else(|| BackendError::binding("temporary buffer is unbound"))?;
                Ok((binding, range.clone()))
            }
        }
    }

    fn load_inputs<T>(
        &self,
        memory: &MemoryManager,
        bindings: &ExecuteBindings,
        node: &Node,
        element: fn(DataType, &[u8]) -> T,
    ) -> Result<Vec<Tensor<T>>> {
        node.inputs
            .iter()
            .map(|input| {
                let bytes = self.input_bytes(memory, bindings, input)?;
                Ok(Tensor::new(input.desc.dimensions.clone(), load_view(bytes, &input.desc, element)?))
            })
            .collect()
    }

    fn input_bytes<'m>(
        &self,
        memory: &'m MemoryManager,
        bindings: &ExecuteBindings,
        input: &NodeOutput,
    ) -> Result<&'m [u8]> {
        let (binding, range) = match input.source {
            NodeSource::Slot(slot) => {
                let slot = slot as usize;
                match self.constant_ranges.get(slot) {
                    Some(Some(range)) => {
                        let persistent = bindings
                            .persistent
                            .as_ref()
                            .ok_or_else(|| BackendError::binding("persistent buffer is unbound"))?;
                        (persistent, range.clone())
                    }
                    _ => {
                        let binding = bindings
                            .inputs
                            .get(slot)
                            .and_then(Option::as_ref)
                            .ok_or_else(|| BackendError::binding(format!("input slot {slot} is unbound")))?;
                        (binding, 0..binding.length)
                    }
                }
            }
            NodeSource::Node(node) => {
                let storage = self
                    .node_storage
                    .get(node.index())
                    .ok_or_else(|| BackendError::binding(format!("unknown node {}", node.0)))?;
                self.storage_region(bindings, storage)?
            }
        };

        memory.bytes(binding.handle(), binding.offset + range.start, range.len())
    }

    fn store<T: Copy>(
        &self,
        memory: &mut MemoryManager,
        bindings: &ExecuteBindings,
        node: &Node,
        storage: &NodeStorage,
        values: &[T],
        element: fn(DataType, T, &mut [u8]),
    ) -> Result<()> {
        if values.len() != node.output.element_count() {
            return Err(BackendError::Other(format!(
                "{} produced {} values for {}",
                node.kind.name(),
                values.len(),
                node.output
            )));
        }
        let (binding, range) = self.storage_region(bindings, storage)?;
        let bytes = memory.bytes_mut(binding.handle(), binding.offset + range.start, range.len())?;
        store_view(bytes, &node.output, values, element)
    }
}

/// Element representation a node computes in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lane {
    Bits,
    Integer,
    Float,
}

impl Lane {
    fn of(node: &Node) -> Self {
        let output = node.output.data_type;
        if kernels::moves_bits(&node.kind) && node.inputs.iter().all(|input| input.desc.data_type == output) {
            Lane::Bits
        } else if !output.is_float()
            && node.inputs.iter().all(|input| !input.desc.data_type.is_float())
            && kernels::has_integer_kernel(&node.kind)
        {
            Lane::Integer
        } else {
            Lane::Float
        }
    }
}

impl CompiledProgram for CpuProgram {
    fn lowered(&self) -> &LoweredGraph {
        &self.lowered
    }

    fn persistent_buffer_size(&self) -> usize {
        self.persistent_size
    }

    fn temporary_buffer_size(&self) -> usize {
        self.temporary_size
    }
}

// ================================================================================================
// Strided element access
// ================================================================================================

/// Byte offset of every logical element of `desc`, in row-major order.
fn element_offsets(desc: &TensorDescriptor) -> Vec<usize> {
    let strides = desc.effective_strides();
    let element_size = desc.data_type.bytes_per_element();
    let mut offsets = Vec::with_capacity(desc.element_count());
    if desc.dimensions.iter().any(|&d| d == 0) {
        return offsets;
    }

    let rank = desc.rank();
    let mut index = vec![0u32; rank];
    loop {
        let element: usize = index
            .iter()
            .zip(&strides)
            .map(|(&i, &s)| i as usize * s as usize)
            .sum();
        offsets.push(element * element_size);

        // odometer increment, last axis fastest
        let mut axis = rank;
        loop {
            if axis == 0 {
                return offsets;
            }
            axis -= 1;
            index[axis] += 1;
            if index[axis] < desc.dimensions[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}

fn check_view(bytes: &[u8], desc: &TensorDescriptor) -> Result<()> {
    let needed = desc
        .total_bytes()
        .ok_or_else(|| BackendError::Other(format!("view {desc} overflows")))?;
    if needed > bytes.len() {
        return Err(BackendError::OutOfBounds {
            offset: 0,
            size: needed,
            limit: bytes.len(),
        });
    }
    Ok(())
}

fn load_view<T>(bytes: &[u8], desc: &TensorDescriptor, element: fn(DataType, &[u8]) -> T) -> Result<Vec<T>> {
    check_view(bytes, desc)?;
    let size = desc.data_type.bytes_per_element();
    Ok(element_offsets(desc)
        .into_iter()
        .map(|offset| element(desc.data_type, &bytes[offset..offset + size]))
        .collect())
}

fn store_view<T: Copy>(
    bytes: &mut [u8],
    desc: &TensorDescriptor,
    values: &[T],
    element: fn(DataType, T, &mut [u8]),
) -> Result<()> {
    check_view(bytes, desc)?;
    let size = desc.data_type.bytes_per_element();
    for (offset, &value) in element_offsets(desc).into_iter().zip(values) {
        element(desc.data_type, value, &mut bytes[offset..offset + size]);
    }
    Ok(())
}

fn load_element(data_type: DataType, bytes: &[u8]) -> f64 {
    match data_type {
        DataType::Float32 => bytemuck::pod_read_unaligned::<f32>(bytes) as f64,
        DataType::Float16 => f16::from_bits(bytemuck::pod_read_unaligned::<u16>(bytes)).to_f64(),
        DataType::Int32 => bytemuck::pod_read_unaligned::<i32>(bytes) as f64,
        DataType::Uint32 => bytemuck::pod_read_unaligned::<u32>(bytes) as f64,
        DataType::Int64 => bytemuck::pod_read_unaligned::<i64>(bytes) as f64,
        DataType::Uint64 => bytemuck::pod_read_unaligned::<u64>(bytes) as f64,
        DataType::Int8 => bytes[0] as i8 as f64,
        DataType::Uint8 => bytes[0] as f64,
    }
}

/// Float-to-integer stores truncate toward zero and saturate.
fn store_element(data_type: DataType, value: f64, bytes: &mut [u8]) {
    match data_type {
        DataType::Float32 => bytes.copy_from_slice(bytemuck::bytes_of(&(value as f32))),
        DataType::Float16 => bytes.copy_from_slice(bytemuck::bytes_of(&f16::from_f64(value).to_bits())),
        DataType::Int32 => bytes.copy_from_slice(bytemuck::bytes_of(&(value as i32))),
        DataType::Uint32 => bytes.copy_from_slice(bytemuck::bytes_of(&(value as u32))),
        DataType::Int64 => bytes.copy_from_slice(bytemuck::bytes_of(&(value as i64))),
        DataType::Uint64 => bytes.copy_from_slice(bytemuck::bytes_of(&(value as u64))),
        DataType::Int8 => bytes[0] = value as i8 as u8,
        DataType::Uint8 => bytes[0] = value as u8,
    }
}

/// Raw element bits, zero-extended.
fn load_bits(_: DataType, bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw[..bytes.len()].copy_from_slice(bytes);
    u64::from_ne_bytes(raw)
}

fn store_bits(_: DataType, bits: u64, bytes: &mut [u8]) {
    let length = bytes.len();
    bytes.copy_from_slice(&bits.to_ne_bytes()[..length]);
}

fn load_integer(data_type: DataType, bytes: &[u8]) -> i128 {
    match data_type {
        DataType::Int32 => bytemuck::pod_read_unaligned::<i32>(bytes).into(),
        DataType::Uint32 => bytemuck::pod_read_unaligned::<u32>(bytes).into(),
        DataType::Int64 => bytemuck::pod_read_unaligned::<i64>(bytes).into(),
        DataType::Uint64 => bytemuck::pod_read_unaligned::<u64>(bytes).into(),
        DataType::Int8 => (bytes[0] as i8).into(),
        DataType::Uint8 => bytes[0].into(),
        // integer nodes never read floats; truncate like a float-to-int cast
        DataType::Float32 | DataType::Float16 => load_element(data_type, bytes) as i128,
    }
}

/// Integer stores saturate to the range of `data_type`.
fn store_integer(data_type: DataType, value: i128, bytes: &mut [u8]) {
    fn saturate<T: TryFrom<i128> + bytemuck::Pod>(value: i128, min: T, max: T, bytes: &mut [u8]) {
        let narrowed = T::try_from(value).unwrap_or(if value < 0 { min } else { max });
        bytes.copy_from_slice(bytemuck::bytes_of(&narrowed));
    }
    match data_type {
        DataType::Int32 => saturate(value, i32::MIN, i32::MAX, bytes),
        DataType::Uint32 => saturate(value, u32::MIN, u32::MAX, bytes),
        DataType::Int64 => saturate(value, i64::MIN, i64::MAX, bytes),
        DataType::Uint64 => saturate(value, u64::MIN, u64::MAX, bytes),
        DataType::Int8 => saturate(value, i8::MIN, i8::MAX, bytes),
        DataType::Uint8 => saturate(value, u8::MIN, u8::MAX, bytes),
        DataType::Float32 | DataType::Float16 => store_element(data_type, value as f64, bytes),
    }
}
