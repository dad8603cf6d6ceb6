//! Execution context: graph compilation, compute and standalone buffers
//!
//! A [`Context`] serves every request against one adapter. Recording is
//! sequential: the command recorder sits behind a mutex that is released
//! before any fence wait, so independent requests overlap on the device.
//!
//! ```text
//! named inputs ─► upload ─► record(init?, execute, readback) ─► submit
//!                                                                  │
//! named outputs ◄─ split ◄─ read mapped ◄─────── await fence ◄─────┘
//! ```
//!
//! # Failure model
//!
//! - Protocol violations (`InvalidRequest`) are detected before anything is
//!   recorded.
//! - A recording or submission failure discards the recorder; the next
//!   request opens a fresh one.
//! - A faulted submission fails the request and invalidates the graph's
//!   initialisation, which the next compute records again.
//! - Allocation failure or a lost device fence loses the context; every
//!   later call fails with the loss reason.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::channel::oneshot;
use parking_lot::Mutex;
use webnn_backends::staging::{self, checked_align_up, OutputAllocation};
use webnn_backends::{
    Backend, BackendError, BarrierTransition, BufferBinding, CommandQueue, CommandRecorder, CompiledProgram,
    HeapType, InitializeBindings, LoweredGraph, ProgramKey, Resource, ResourceState,
};
use webnn_graph::{validate, GraphInfo, TensorDescriptor};
use webnn_tracing::performance::{record_compile, record_transfer, TransferDirection};

use crate::adapter::Adapter;
use crate::buffer::{Buffer, BUFFER_ALIGNMENT};
use crate::error::{Error, LostReason, Result};
use crate::graph::CompiledGraph;
use crate::properties::{ContextOptions, ContextProperties};

/// Tensor bytes keyed by input or output name.
pub type NamedBytes = HashMap<String, Vec<u8>>;

/// Standalone buffers keyed by input or output name.
pub type NamedBuffers = HashMap<String, Buffer>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Execution context over one adapter.
pub struct Context<B: Backend> {
    id: u64,
    adapter: Adapter<B>,
    options: ContextOptions,
    properties: ContextProperties,
    recorder: Mutex<Option<CommandRecorder<B::Program>>>,
    lost: Mutex<Option<LostReason>>,
}

impl<B: Backend> Context<B> {
    pub(crate) fn new(adapter: Adapter<B>, options: ContextOptions) -> Self {
        let properties = ContextProperties::from_capabilities(adapter.backend().capabilities());
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(context = id, backend = adapter.backend().name(), "context_created");
        Self {
            id,
            adapter,
            options,
            properties,
            recorder: Mutex::new(None),
            lost: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn adapter(&self) -> &Adapter<B> {
        &self.adapter
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn properties(&self) -> &ContextProperties {
        &self.properties
    }

    fn backend(&self) -> &Arc<B> {
        self.adapter.backend()
    }

    fn queue(&self) -> &CommandQueue<B> {
        self.adapter.queue()
    }

    /// Fence value of the most recent submission on the adapter queue.
    pub fn last_submitted_fence(&self) -> u64 {
        self.queue().last_submitted_fence()
    }

    pub fn completed_fence(&self) -> u64 {
        self.queue().completed_fence()
    }

    // ============================================================================================
    // Loss tracking
    // ============================================================================================

    /// Why the context was lost, if it was.
    pub fn lost_reason(&self) -> Option<LostReason> {
        if let Some(reason) = *self.lost.lock() {
            return Some(reason);
        }
        self.backend()
            .fence()
            .lost_reason()
            .map(|_| self.mark_lost(LostReason::DeviceRemoved))
    }

    pub fn is_lost(&self) -> bool {
        self.lost_reason().is_some()
    }

    /// Record the first loss reason; later ones are ignored.
    fn mark_lost(&self, reason: LostReason) -> LostReason {
        let mut lost = self.lost.lock();
        match *lost {
            Some(first) => first,
            None => {
                tracing::warn!(context = self.id, %reason, "context_lost");
                *lost = Some(reason);
                reason
            }
        }
    }

    fn ensure_alive(&self) -> Result<()> {
        match self.lost_reason() {
            Some(reason) => Err(Error::ContextLost(reason)),
            None => Ok(()),
        }
    }

    /// Convert a backend error, losing the context on device-level failure.
    fn fail(&self, err: BackendError) -> Error {
        match LostReason::from_backend(&err) {
            Some(reason) => Error::ContextLost(self.mark_lost(reason)),
            None => Error::from(err),
        }
    }

    fn check_graph(&self, graph: &CompiledGraph<B>) -> Result<()> {
        if graph.context_id() != self.id {
            return Err(Error::invalid_request("graph was created by another context"));
        }
        Ok(())
    }

    fn check_buffer(&self, buffer: &Buffer) -> Result<()> {
        if buffer.context_id() != self.id {
            return Err(Error::invalid_request("buffer was created by another context"));
        }
        Ok(())
    }

    // ============================================================================================
    // Recording
    // ============================================================================================

    /// Open the recorder, let `record` fill it, and submit.
    ///
    /// Returns what `record` produced and the submission's fence value. On
    /// any failure the recorder is discarded.
    fn record<T, F>(&self, record: F) -> Result<(T, u64)>
    where
        F: FnOnce(&mut CommandRecorder<B::Program>) -> webnn_backends::Result<T>,
    {
        let outcome = {
            let mut guard = self.recorder.lock();
            let recorder = guard.get_or_insert_with(CommandRecorder::new);
            recorder.on_completed(self.queue().completed_fence());
            let outcome = record_into(recorder, self.queue(), record);
            if outcome.is_err() {
                guard.take();
            }
            outcome
        };

        outcome.map_err(|err| {
            tracing::warn!(context = self.id, error = %err, "recorder_discarded");
            self.fail(err)
        })
    }

    /// Await `fence_value`; a faulted submission is an error.
    async fn wait(&self, fence_value: u64) -> Result<()> {
        self.queue().wait(fence_value).await.map_err(|err| self.fail(err))
    }

    /// Await `fence_value`, treating a faulted submission as finished.
    async fn wait_settled(&self, fence_value: u64) -> Result<()> {
        match self.queue().wait(fence_value).await {
            Ok(()) | Err(BackendError::ExecutionFault { .. }) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    // ============================================================================================
    // Graphs
    // ============================================================================================

    /// Validate, lower, compile and initialise `graph`.
    ///
    /// # Errors
    ///
    /// - `Validation` for a structurally invalid graph
    /// - `NotSupported` when the backend cannot express an operator
    /// - `Unknown` when uploading constants or initialising fails
    #[tracing::instrument(skip(self, graph), fields(context = self.id, operators = graph.operators.len()))]
    pub async fn create_graph(&self, graph: &GraphInfo) -> Result<CompiledGraph<B>> {
        let start = Instant::now();
        self.ensure_alive()?;
        self.queue().release_completed_resources();

        validate(graph)?;
        let lowered = self.backend().lower(graph).map_err(|err| self.fail(err))?;
        let program = self.compile(lowered).await?;
        let lowered = program.lowered();

        let constant_data = lowered
            .constant_slots()
            .map(|(_, slot)| {
                graph.constant_data(slot.operand).ok_or_else(|| {
                    Error::Device(BackendError::binding(format!("constant {} has no data", slot.operand)))
                })
            })
            .collect::<Result<Vec<&[u8]>>>()?;

        let persistent = self.allocate_state(program.persistent_buffer_size())?;
        let temporary = self.allocate_state(program.temporary_buffer_size())?;

        let backend = self.backend().as_ref();
        let mut constants: Vec<Option<BufferBinding>> = vec![None; lowered.input_slots.len()];
        if !constant_data.is_empty() || persistent.is_some() {
            let (staged, fence) = self.record(|recorder| {
                let staged = if constant_data.is_empty() {
                    None
                } else {
                    let staged = staging::upload(backend, recorder, &constant_data)?;
                    for ((slot, _), binding) in lowered.constant_slots().zip(&staged.bindings) {
                        constants[slot] = Some(binding.clone());
                    }
                    Some(staged)
                };
                recorder.initialize_operator(
                    Arc::clone(&program),
                    InitializeBindings {
                        constants: constants.clone(),
                        persistent: persistent.as_ref().map(Resource::whole),
                    },
                )?;
                Ok(staged)
            })?;
            if let Some(staged) = staged {
                self.queue().reference_until_completed(staged.staging);
            }
            self.wait(fence).await?;
        }

        let compiled = CompiledGraph::new(self.id, graph, Arc::clone(&program), constants, persistent, temporary);
        compiled.set_initialized(true);

        tracing::debug!(
            duration_us = start.elapsed().as_micros() as u64,
            nodes = program.lowered().nodes.len(),
            "graph_created"
        );
        Ok(compiled)
    }

    /// Compiled program for `lowered`, from the adapter cache if possible.
    async fn compile(&self, lowered: LoweredGraph) -> Result<Arc<B::Program>> {
        let start = Instant::now();
        let backend = self.backend();
        let key = ProgramKey::new(backend.name(), &lowered);
        let node_count = lowered.nodes.len();

        if let Some(program) = self.adapter.programs().get(&key) {
            record_compile(backend.name(), node_count, start.elapsed().as_micros() as u64, true);
            return Ok(program);
        }

        let compiled = if self.options.compile_on_worker {
            let (tx, rx) = oneshot::channel();
            let worker = Arc::clone(backend);
            rayon::spawn(move || {
                let _ = tx.send(worker.compile(&lowered));
            });
            rx.await
                .map_err(|_| Error::ContextLost(self.mark_lost(LostReason::Internal)))?
        } else {
            backend.compile(&lowered)
        };
        let program = compiled.map_err(|err| self.fail(err))?;
        let program = self.adapter.programs().insert(key, program);

        record_compile(backend.name(), node_count, start.elapsed().as_micros() as u64, false);
        Ok(program)
    }

    fn allocate_state(&self, size: usize) -> Result<Option<Resource>> {
        if size == 0 {
            return Ok(None);
        }
        self.backend()
            .create_buffer(size, HeapType::Default)
            .map(Some)
            .map_err(|err| self.fail(err))
    }

    /// Run `graph` on `inputs` and return every named output.
    ///
    /// All-or-nothing: either every output is returned or none is.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for a missing or unknown input name, a byte
    ///   length mismatch, or a graph from another context
    /// - `Unknown` for device faults and context loss
    #[tracing::instrument(skip_all, fields(context = self.id, inputs = inputs.len()))]
    pub async fn compute(&self, graph: &CompiledGraph<B>, inputs: &NamedBytes) -> Result<NamedBytes> {
        let start = Instant::now();
        self.ensure_alive()?;
        self.check_graph(graph)?;
        check_names("input", graph.inputs().map(|(name, _)| name), inputs)?;
        self.queue().release_completed_resources();

        let mut slots = Vec::new();
        let mut data = Vec::new();
        for (name, input) in graph.inputs() {
            let bytes = inputs
                .get(name)
                .ok_or_else(|| Error::invalid_request(format!("missing input '{name}'")))?;
            if bytes.len() != input.byte_length {
                return Err(Error::invalid_request(format!(
                    "input '{name}' has {} bytes, expected {}",
                    bytes.len(),
                    input.byte_length
                )));
            }
            if let Some(slot) = input.slot {
                slots.push(slot);
                data.push(bytes.as_slice());
            }
        }

        let backend = self.backend().as_ref();
        let reinitialize = graph.needs_initialization();
        let ((outputs, staged), fence) = self.record(|recorder| {
            if reinitialize {
                recorder.initialize_operator(Arc::clone(graph.program()), graph.initialize_bindings())?;
            }

            let mut bindings: Vec<Option<BufferBinding>> = vec![None; graph.input_slot_count()];
            let staged = if data.is_empty() {
                None
            } else {
                let staged = staging::upload(backend, recorder, &data)?;
                for (slot, binding) in slots.iter().zip(&staged.bindings) {
                    bindings[*slot] = Some(binding.clone());
                }
                Some(staged)
            };

            let outputs = OutputAllocation::new(backend, graph.outputs().iter().map(|output| output.byte_length))?;
            recorder.execute_operator(
                Arc::clone(graph.program()),
                graph.execute_bindings(bindings, outputs.bindings.clone()),
            )?;
            outputs.record_readback(recorder)?;
            Ok((outputs, staged))
        })?;
        if reinitialize {
            graph.set_initialized(true);
        }
        if let Some(staged) = staged {
            self.queue().reference_until_completed(staged);
        }

        if let Err(err) = self.wait(fence).await {
            graph.set_initialized(false);
            return Err(err);
        }

        let values = outputs.read(backend).map_err(|err| self.fail(err))?;
        let results = graph
            .outputs()
            .iter()
            .zip(values)
            .map(|(output, bytes)| (output.name.clone(), bytes))
            .collect();

        tracing::debug!(
            duration_us = start.elapsed().as_micros() as u64,
            fence_value = fence,
            reinitialized = reinitialize,
            "compute_complete"
        );
        Ok(results)
    }

    /// Bind standalone buffers to `graph` and submit one execution.
    ///
    /// Nothing is staged and nothing is awaited; every bound buffer records
    /// the submission's fence so later reads and writes wait for it.
    #[tracing::instrument(skip_all, fields(context = self.id, inputs = inputs.len(), outputs = outputs.len()))]
    pub fn dispatch(&self, graph: &CompiledGraph<B>, inputs: &NamedBuffers, outputs: &NamedBuffers) -> Result<()> {
        self.ensure_alive()?;
        self.check_graph(graph)?;
        check_names("input", graph.inputs().map(|(name, _)| name), inputs)?;
        check_names("output", graph.outputs().iter().map(|output| output.name.as_str()), outputs)?;

        let mut input_bindings = vec![None; graph.input_slot_count()];
        for (name, input) in graph.inputs() {
            let buffer = inputs
                .get(name)
                .ok_or_else(|| Error::invalid_request(format!("missing input '{name}'")))?;
            self.check_buffer(buffer)?;
            check_descriptor("input", name, buffer, &input.descriptor)?;
            if let Some(slot) = input.slot {
                input_bindings[slot] = Some(buffer.binding());
            }
        }

        let mut output_bindings = Vec::with_capacity(graph.outputs().len());
        let mut written: Vec<&Buffer> = Vec::new();
        for output in graph.outputs() {
            let buffer = outputs
                .get(&output.name)
                .ok_or_else(|| Error::invalid_request(format!("missing output '{}'", output.name)))?;
            self.check_buffer(buffer)?;
            check_descriptor("output", &output.name, buffer, &output.descriptor)?;
            if written.iter().any(|other| other.same_allocation(buffer))
                || inputs.values().any(|input| input.same_allocation(buffer))
            {
                return Err(Error::invalid_request(format!(
                    "output '{}' aliases another bound buffer",
                    output.name
                )));
            }
            written.push(buffer);
            output_bindings.push(buffer.binding());
        }

        let reinitialize = graph.needs_initialization();
        let ((), fence) = self.record(|recorder| {
            if reinitialize {
                recorder.initialize_operator(Arc::clone(graph.program()), graph.initialize_bindings())?;
            }
            recorder.execute_operator(
                Arc::clone(graph.program()),
                graph.execute_bindings(input_bindings, output_bindings),
            )
        })?;
        if reinitialize {
            graph.set_initialized(true);
        }

        for buffer in inputs.values().chain(outputs.values()) {
            buffer.record_submission(fence);
        }
        let initialized = graph.initialized_flag();
        self.queue().wait_async(fence, move |outcome| {
            if outcome.is_err() {
                initialized.store(false, Ordering::Release);
            }
        });

        tracing::debug!(fence_value = fence, "dispatch_submitted");
        Ok(())
    }

    // ============================================================================================
    // Buffers
    // ============================================================================================

    /// Allocate a standalone buffer for a tensor of `descriptor`'s shape.
    ///
    /// The allocation is the packed byte length rounded up to
    /// [`BUFFER_ALIGNMENT`]. Unified-memory devices allocate in the shared
    /// heap so reads and writes can map it directly.
    #[tracing::instrument(skip_all, fields(context = self.id, descriptor = %descriptor))]
    pub fn create_buffer(&self, descriptor: &TensorDescriptor) -> Result<Buffer> {
        self.ensure_alive()?;
        let descriptor = TensorDescriptor::new(descriptor.data_type, descriptor.dimensions.clone());
        let byte_length = descriptor
            .packed_byte_length()
            .and_then(|length| checked_align_up(length, BUFFER_ALIGNMENT).map(|size| (length, size)));
        let Some((byte_length, size)) = byte_length else {
            return Err(Error::invalid_request(format!("buffer {descriptor} is too large")));
        };

        let heap = if self.backend().capabilities().is_uma {
            HeapType::Shared
        } else {
            HeapType::Default
        };
        let resource = self
            .backend()
            .create_buffer(size, heap)
            .map_err(|err| self.fail(err))?;

        tracing::debug!(size, %heap, "buffer_created");
        Ok(Buffer::new(self.id, descriptor, byte_length, resource))
    }

    /// Replace the contents of `buffer` with `data`.
    ///
    /// On unified memory an idle buffer is written in place; a busy one is
    /// written once its last submission has finished. Otherwise the data is
    /// staged and copied on the queue, ordered after earlier submissions.
    #[tracing::instrument(skip_all, fields(context = self.id, bytes = data.len()))]
    pub async fn write_buffer(&self, buffer: &Buffer, data: &[u8]) -> Result<()> {
        self.ensure_alive()?;
        self.check_buffer(buffer)?;
        if data.len() != buffer.byte_length() {
            return Err(Error::invalid_request(format!(
                "write of {} bytes into a {}-byte buffer",
                data.len(),
                buffer.byte_length()
            )));
        }
        if data.is_empty() {
            return Ok(());
        }

        let start = Instant::now();
        let backend = self.backend().as_ref();
        if backend.capabilities().is_uma {
            let last = buffer.last_submission_fence();
            if last > self.completed_fence() {
                self.wait_settled(last).await?;
            }
            backend
                .write_mapped(buffer.resource(), 0, data)
                .map_err(|err| self.fail(err))?;
        } else {
            let (_, fence) = self.record(|recorder| {
                let staging = backend.create_buffer(data.len(), HeapType::Upload)?;
                backend.write_mapped(&staging, 0, data)?;
                let dst = buffer.resource();
                recorder.resource_barrier(vec![BarrierTransition::new(
                    dst,
                    ResourceState::Common,
                    ResourceState::CopyDest,
                )])?;
                recorder.copy_buffer_region(dst, 0, &staging, 0, data.len())?;
                recorder.resource_barrier(vec![BarrierTransition::new(
                    dst,
                    ResourceState::CopyDest,
                    ResourceState::Common,
                )])?;
                Ok(())
            })?;
            buffer.record_submission(fence);
        }

        record_transfer(data.len(), TransferDirection::Upload, start.elapsed().as_micros() as u64);
        Ok(())
    }

    /// Read the whole tensor held by `buffer`.
    ///
    /// On unified memory the shared allocation is mapped directly once its
    /// last submission has finished. Otherwise a readback copy is queued and
    /// awaited.
    #[tracing::instrument(skip_all, fields(context = self.id, bytes = buffer.byte_length()))]
    pub async fn read_buffer(&self, buffer: &Buffer) -> Result<Vec<u8>> {
        self.ensure_alive()?;
        self.check_buffer(buffer)?;
        let length = buffer.byte_length();
        if length == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let backend = self.backend().as_ref();
        let bytes = if backend.capabilities().is_uma {
            let last = buffer.last_submission_fence();
            if last > self.completed_fence() {
                self.wait_settled(last).await?;
            }
            backend
                .read_mapped(buffer.resource(), 0, length)
                .map_err(|err| self.fail(err))?
        } else {
            let (readback, fence) = self.record(|recorder| {
                let readback = backend.create_buffer(length, HeapType::Readback)?;
                let src = buffer.resource();
                recorder.resource_barrier(vec![BarrierTransition::new(
                    src,
                    ResourceState::Common,
                    ResourceState::CopySource,
                )])?;
                recorder.copy_buffer_region(&readback, 0, src, 0, length)?;
                recorder.resource_barrier(vec![BarrierTransition::new(
                    src,
                    ResourceState::CopySource,
                    ResourceState::Common,
                )])?;
                Ok(readback)
            })?;
            self.wait(fence).await?;
            backend
                .read_mapped(&readback, 0, length)
                .map_err(|err| self.fail(err))?
        };

        record_transfer(length, TransferDirection::Readback, start.elapsed().as_micros() as u64);
        Ok(bytes)
    }
}

impl<B: Backend> std::fmt::Debug for Context<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("backend", &self.backend().name())
            .field("lost", &*self.lost.lock())
            .finish()
    }
}

fn record_into<P, B, T, F>(
    recorder: &mut CommandRecorder<P>,
    queue: &CommandQueue<B>,
    record: F,
) -> webnn_backends::Result<(T, u64)>
where
    B: Backend<Program = P>,
    F: FnOnce(&mut CommandRecorder<P>) -> webnn_backends::Result<T>,
{
    recorder.open()?;
    let value = record(recorder)?;
    let fence = recorder.close_and_execute(queue)?;
    Ok((value, fence))
}

/// Every provided name is expected and every expected name is provided.
fn check_names<'a, T>(what: &str, expected: impl Iterator<Item = &'a str>, provided: &HashMap<String, T>) -> Result<()> {
    let expected: Vec<&str> = expected.collect();
    if let Some(name) = provided.keys().find(|name| !expected.contains(&name.as_str())) {
        return Err(Error::invalid_request(format!("unknown {what} '{name}'")));
    }
    if let Some(name) = expected.iter().find(|name| !provided.contains_key(**name)) {
        return Err(Error::invalid_request(format!("missing {what} '{name}'")));
    }
    Ok(())
}

fn check_descriptor(what: &str, name: &str, buffer: &Buffer, expected: &TensorDescriptor) -> Result<()> {
    let actual = buffer.descriptor();
    if actual.data_type != expected.data_type || actual.dimensions != expected.dimensions {
        return Err(Error::invalid_request(format!(
            "{what} '{name}' expects {expected}, buffer holds {actual}"
        )));
    }
    Ok(())
}
