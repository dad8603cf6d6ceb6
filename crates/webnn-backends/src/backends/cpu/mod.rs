//! CPU reference device
//!
//! The CPU backend behaves like an asynchronous accelerator: command lists
//! are handed to a device thread that executes them in submission order and
//! signals the queue fence afterwards. The host never sees results before
//! the fence says so.
//!
//! # Architecture
//!
//! ```text
//! CpuBackend
//! ├── MemoryManager  - heap-tagged buffers with usage-state tracking
//! ├── device thread  - FIFO command list execution, fence signalling
//! ├── DeviceGate     - pause/resume, to hold the fence back in tests
//! └── CpuProgram     - buffer plan + node interpreter
//! ```
//!
//! # Usage
//!
//! ```rust
//! use webnn_backends::{Backend, CpuBackend, CpuBackendOptions, HeapType};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = CpuBackend::new(CpuBackendOptions::default());
//! let buffer = backend.create_buffer(16, HeapType::Upload)?;
//! backend.write_mapped(&buffer, 0, &[1, 2, 3, 4])?;
//! # Ok(())
//! # }
//! ```

pub mod kernels;
pub(crate) mod memory;
mod program;

pub use memory::MemoryManager;
pub use program::CpuProgram;

use std::env;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, RwLock};
use webnn_graph::{DataType, SupportedDataTypes};
use webnn_tracing::perf_span;

use crate::backend::{Backend, BackendCapabilities, DataTypeLimits, HeapType, ResourceState};
use crate::command::{Command, CommandList, Fence};
use crate::error::{BackendError, Result};
use crate::lowering::LoweredGraph;
use crate::resource::{Resource, ResourceAllocator};
use memory::CpuAllocator;

/// Configuration of the CPU device.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuBackendOptions {
    /// Report unified memory: inputs are bound straight from upload memory
    /// and outputs live in the shared heap
    pub unified_memory: bool,
    /// Cap on live allocated bytes; `None` is unlimited
    pub memory_budget: Option<usize>,
    /// Element type comparison nodes produce natively
    pub native_boolean: DataType,
    pub data_type_limits: DataTypeLimits,
}

impl Default for CpuBackendOptions {
    fn default() -> Self {
        let float = SupportedDataTypes::float16_to_32();
        Self {
            unified_memory: false,
            memory_budget: None,
            native_boolean: DataType::Uint32,
            data_type_limits: DataTypeLimits::new()
                .with("conv2d", float)
                .with("gemm", float)
                .with("softmax", float)
                .with("average_pool2d", float)
                .with("resample2d", float),
        }
    }
}

impl CpuBackendOptions {
    /// Defaults overridden by `WEBNN_CPU_UMA` and `WEBNN_CPU_MEMORY_BUDGET`.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(uma) = env::var("WEBNN_CPU_UMA") {
            options.unified_memory = matches!(uma.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }

        if let Ok(budget) = env::var("WEBNN_CPU_MEMORY_BUDGET") {
            if let Ok(bytes) = budget.trim().parse::<usize>() {
                options.memory_budget = Some(bytes);
            }
        }

        options
    }

    pub fn with_unified_memory(mut self, unified_memory: bool) -> Self {
        self.unified_memory = unified_memory;
        self
    }

    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = Some(bytes);
        self
    }
}

/// Pause switch for the device thread.
#[derive(Default)]
struct DeviceGate {
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl DeviceGate {
    fn set(&self, paused: bool) {
        *self.paused.lock() = paused;
        if !paused {
            self.resumed.notify_all();
        }
    }

    fn wait_while_paused(&self) {
        let mut paused = self.paused.lock();
        while *paused {
            self.resumed.wait(&mut paused);
        }
    }
}

struct Submission {
    list: CommandList<CpuProgram>,
    fence_value: u64,
}

/// State shared with the device thread.
struct Device {
    memory: Arc<RwLock<MemoryManager>>,
    fence: Fence,
    gate: DeviceGate,
    injected_fault: Mutex<Option<String>>,
}

impl Device {
    fn run(&self, receiver: mpsc::Receiver<Submission>) {
        while let Ok(Submission { list, fence_value }) = receiver.recv() {
            self.gate.wait_while_paused();
            if self.fence.lost_reason().is_some() {
                // nothing completes on a lost device
                drop(list);
                continue;
            }

            let injected = self.injected_fault.lock().take();
            let outcome = match injected {
                Some(reason) => {
                    self.discard_persistent(&list);
                    Err(reason)
                }
                None => self.execute_list(&list).map_err(|error| error.to_string()),
            };

            // Resources are released through the memory lock; drop outside it.
            drop(list);

            match outcome {
                Ok(()) => self.fence.signal(fence_value),
                Err(reason) => {
                    tracing::warn!(fence_value, %reason, "submission_faulted");
                    self.fence.signal_with_fault(fence_value, reason);
                }
            }
        }
    }

    fn execute_list(&self, list: &CommandList<CpuProgram>) -> Result<()> {
        let _span = perf_span!("execute_list", threshold_us = 1_000);
        let mut memory = self.memory.write();
        for command in list.commands() {
            match command {
                Command::ResourceBarrier(transitions) => {
                    for transition in transitions {
                        memory.transition(transition.resource.handle(), transition.before, transition.after)?;
                    }
                }
                Command::CopyBufferRegion {
                    dst,
                    dst_offset,
                    src,
                    src_offset,
                    size,
                } => memory.copy_region(dst.handle(), *dst_offset, src.handle(), *src_offset, *size)?,
                Command::InitializeOperator { program, bindings } => program.initialize(&mut memory, bindings)?,
                Command::ExecuteOperator { program, bindings } => program.execute(&mut memory, bindings)?,
            }
        }
        Ok(())
    }

    /// Persistent state touched by a faulted submission is undefined; the
    /// CPU device models that by zeroing it.
    fn discard_persistent(&self, list: &CommandList<CpuProgram>) {
        let mut memory = self.memory.write();
        for command in list.commands() {
            let persistent = match command {
                Command::InitializeOperator { bindings, .. } => bindings.persistent.as_ref(),
                Command::ExecuteOperator { bindings, .. } => bindings.persistent.as_ref(),
                _ => None,
            };
            if let Some(binding) = persistent {
                if let Ok(bytes) = memory.bytes_mut(binding.handle(), binding.offset, binding.length) {
                    bytes.fill(0);
                }
            }
        }
    }
}

/// CPU backend
///
/// One instance is one device with one queue. Dropping the backend stops the
/// device thread after it drains the lists already submitted.
pub struct CpuBackend {
    capabilities: BackendCapabilities,
    device: Arc<Device>,
    allocator: Arc<dyn ResourceAllocator>,
    sender: Mutex<Option<mpsc::Sender<Submission>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CpuBackend {
    pub fn new(options: CpuBackendOptions) -> Self {
        let capabilities = BackendCapabilities {
            native_boolean: options.native_boolean,
            data_type_limits: options.data_type_limits,
            is_uma: options.unified_memory,
            ..BackendCapabilities::default()
        };
        let memory = Arc::new(RwLock::new(MemoryManager::new(options.memory_budget)));
        let device = Arc::new(Device {
            memory: Arc::clone(&memory),
            fence: Fence::new(),
            gate: DeviceGate::default(),
            injected_fault: Mutex::new(None),
        });

        let (sender, receiver) = mpsc::channel();
        let worker = {
            let device = Arc::clone(&device);
            thread::Builder::new()
                .name("webnn-cpu-device".into())
                .spawn(move || device.run(receiver))
        };
        let (sender, worker) = match worker {
            Ok(handle) => (Some(sender), Some(handle)),
            Err(error) => {
                device.fence.fail(format!("device thread failed to start: {error}"));
                (None, None)
            }
        };

        Self {
            capabilities,
            device,
            allocator: Arc::new(CpuAllocator { memory }),
            sender: Mutex::new(sender),
            worker: Mutex::new(worker),
        }
    }

    // ============================================================================================
    // Device control
    // ============================================================================================

    /// Hold execution: submitted lists queue up and the fence stops advancing.
    pub fn pause(&self) {
        self.device.gate.set(true);
    }

    pub fn resume(&self) {
        self.device.gate.set(false);
    }

    /// Make the next executed list fault instead of running.
    pub fn fail_next_submission(&self, reason: impl Into<String>) {
        *self.device.injected_fault.lock() = Some(reason.into());
    }

    /// Simulate device removal; the fence fails and later submissions error.
    pub fn remove_device(&self) {
        self.device.fence.fail("device removed");
    }

    // ============================================================================================
    // Introspection
    // ============================================================================================

    pub fn allocated_bytes(&self) -> usize {
        self.device.memory.read().allocated_bytes()
    }

    pub fn live_buffers(&self) -> usize {
        self.device.memory.read().live_buffers()
    }

    pub fn resource_state(&self, resource: &Resource) -> Result<ResourceState> {
        self.device.memory.read().state(resource.handle())
    }

    fn check_mapping(&self, resource: &Resource, write: bool) -> Result<()> {
        let heap = self.device.memory.read().heap(resource.handle())?;
        let mappable = if write {
            heap.is_cpu_writable()
        } else {
            heap.is_cpu_readable()
        };
        if !mappable {
            return Err(BackendError::ResourceMisuse {
                handle: resource.handle(),
                reason: format!(
                    "{heap} heap is not CPU-{}",
                    if write { "writable" } else { "readable" }
                ),
            });
        }
        Ok(())
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new(CpuBackendOptions::default())
    }
}

impl Drop for CpuBackend {
    fn drop(&mut self) {
        self.resume();
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl std::fmt::Debug for CpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuBackend")
            .field("capabilities", &self.capabilities)
            .field("fence", &self.device.fence)
            .finish_non_exhaustive()
    }
}

impl Backend for CpuBackend {
    type Program = CpuProgram;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn capabilities(&self) -> &BackendCapabilities {
        &self.capabilities
    }

    fn compile(&self, lowered: &LoweredGraph) -> Result<CpuProgram> {
        CpuProgram::compile(lowered)
    }

    fn create_buffer(&self, size: usize, heap: HeapType) -> Result<Resource> {
        if let Some(reason) = self.device.fence.lost_reason() {
            return Err(BackendError::DeviceLost(reason));
        }
        if heap == HeapType::Shared && !self.capabilities.is_uma {
            return Err(BackendError::Other("shared heap requires unified memory".into()));
        }
        let handle = self.device.memory.write().allocate(size, heap)?;
        Ok(Resource::new(handle, size, heap, Arc::clone(&self.allocator)))
    }

    fn write_mapped(&self, resource: &Resource, offset: usize, data: &[u8]) -> Result<()> {
        self.check_mapping(resource, true)?;
        self.device.memory.write().write(resource.handle(), offset, data)
    }

    fn read_mapped(&self, resource: &Resource, offset: usize, length: usize) -> Result<Vec<u8>> {
        self.check_mapping(resource, false)?;
        self.device.memory.read().read(resource.handle(), offset, length)
    }

    fn execute(&self, list: CommandList<CpuProgram>, fence_value: u64) -> Result<()> {
        if let Some(reason) = self.device.fence.lost_reason() {
            return Err(BackendError::DeviceLost(reason));
        }
        let sender = self.sender.lock();
        let sender = sender
            .as_ref()
            .ok_or_else(|| BackendError::DeviceLost("device thread is not running".into()))?;
        sender
            .send(Submission { list, fence_value })
            .map_err(|_| BackendError::DeviceLost("device thread exited".into()))
    }

    fn fence(&self) -> &Fence {
        &self.device.fence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{BarrierTransition, CommandQueue, CommandRecorder};
    use futures::executor::block_on;

    #[test]
    fn mapping_respects_heaps() {
        let backend = CpuBackend::default();
        let upload = backend.create_buffer(8, HeapType::Upload).unwrap();
        let device = backend.create_buffer(8, HeapType::Default).unwrap();
        backend.write_mapped(&upload, 0, &[1; 8]).unwrap();
        assert!(matches!(
            backend.write_mapped(&device, 0, &[1; 8]),
            Err(BackendError::ResourceMisuse { .. })
        ));
        assert!(matches!(
            backend.read_mapped(&upload, 0, 8),
            Err(BackendError::ResourceMisuse { .. })
        ));
        assert!(backend.create_buffer(8, HeapType::Shared).is_err());
    }

    #[test]
    fn dropping_resources_frees_memory() {
        let backend = CpuBackend::default();
        let buffer = backend.create_buffer(64, HeapType::Default).unwrap();
        let clone = buffer.clone();
        assert_eq!(backend.allocated_bytes(), 64);
        drop(buffer);
        assert_eq!(backend.live_buffers(), 1);
        drop(clone);
        assert_eq!(backend.allocated_bytes(), 0);
    }

    #[test]
    fn copies_run_on_the_device_thread() {
        let backend = Arc::new(CpuBackend::default());
        let queue = CommandQueue::new(Arc::clone(&backend));
        let upload = backend.create_buffer(4, HeapType::Upload).unwrap();
        let readback = backend.create_buffer(4, HeapType::Readback).unwrap();
        backend.write_mapped(&upload, 0, &[9, 8, 7, 6]).unwrap();

        let mut recorder = CommandRecorder::new();
        recorder.open().unwrap();
        recorder.copy_buffer_region(&readback, 0, &upload, 0, 4).unwrap();
        let fence = recorder.close_and_execute(&queue).unwrap();
        block_on(queue.wait(fence)).unwrap();

        assert_eq!(backend.read_mapped(&readback, 0, 4).unwrap(), vec![9, 8, 7, 6]);
    }

    #[test]
    fn barrier_mismatch_faults_the_submission() {
        let backend = Arc::new(CpuBackend::default());
        let queue = CommandQueue::new(Arc::clone(&backend));
        let buffer = backend.create_buffer(4, HeapType::Default).unwrap();

        let mut recorder = CommandRecorder::new();
        recorder.open().unwrap();
        recorder
            .resource_barrier(vec![BarrierTransition::new(
                &buffer,
                ResourceState::CopySource,
                ResourceState::Common,
            )])
            .unwrap();
        let fence = recorder.close_and_execute(&queue).unwrap();
        let err = block_on(queue.wait(fence)).unwrap_err();
        assert!(matches!(err, BackendError::ExecutionFault { fence_value, .. } if fence_value == fence));
        assert_eq!(backend.resource_state(&buffer).unwrap(), ResourceState::Common);
        // a fault is not a device loss
        assert!(backend.fence().lost_reason().is_none());
    }

    #[test]
    fn paused_device_holds_the_fence() {
        let backend = Arc::new(CpuBackend::default());
        let queue = CommandQueue::new(Arc::clone(&backend));
        backend.pause();

        let mut recorder = CommandRecorder::<CpuProgram>::new();
        recorder.open().unwrap();
        let fence = recorder.close_and_execute(&queue).unwrap();
        assert_eq!(fence, 1);
        assert_eq!(queue.completed_fence(), 0);

        backend.resume();
        block_on(queue.wait(fence)).unwrap();
        assert_eq!(queue.completed_fence(), 1);
    }

    #[test]
    fn removed_device_rejects_work() {
        let backend = CpuBackend::default();
        backend.remove_device();
        assert!(matches!(
            backend.create_buffer(4, HeapType::Upload),
            Err(BackendError::DeviceLost(_))
        ));
        assert_eq!(backend.fence().lost_reason().as_deref(), Some("device removed"));
    }

    #[test]
    fn budget_exhaustion_is_out_of_memory() {
        let backend = CpuBackend::new(CpuBackendOptions::default().with_memory_budget(32));
        let _held = backend.create_buffer(32, HeapType::Default).unwrap();
        let err = backend.create_buffer(1, HeapType::Default).unwrap_err();
        assert!(err.is_device_loss());
    }
}
