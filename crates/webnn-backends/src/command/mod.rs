//! Command recording, submission and completion tracking
//!
//! ```text
//!   CommandRecorder ──close_and_execute──▶ CommandQueue ──▶ Backend::execute
//!         ▲                                    │                  │
//!         │ open                   fence value │                  │ device timeline
//!         │                                    ▼                  ▼
//!       Context ◀────────── wait(fence) ◀──── Fence ◀──── signal(fence value)
//! ```

mod fence;
mod queue;
mod recorder;

use std::sync::Arc;

pub use fence::{Fence, FenceWaitError};
pub use queue::CommandQueue;
pub use recorder::{CommandRecorder, RecorderState};

use crate::backend::ResourceState;
use crate::resource::{BufferBinding, Resource};

/// One resource's usage-state transition.
#[derive(Debug, Clone)]
pub struct BarrierTransition {
    pub resource: Resource,
    pub before: ResourceState,
    pub after: ResourceState,
}

impl BarrierTransition {
    pub fn new(resource: &Resource, before: ResourceState, after: ResourceState) -> Self {
        Self {
            resource: resource.clone(),
            before,
            after,
        }
    }
}

/// Bindings for one-time program initialisation.
#[derive(Debug, Clone)]
pub struct InitializeBindings {
    /// Indexed by input slot; `Some` for constant slots
    pub constants: Vec<Option<BufferBinding>>,
    pub persistent: Option<BufferBinding>,
}

/// Bindings for one execution of a compiled program.
#[derive(Debug, Clone)]
pub struct ExecuteBindings {
    /// Indexed by input slot; `Some` for graph-input slots
    pub inputs: Vec<Option<BufferBinding>>,
    /// Indexed by output slot
    pub outputs: Vec<BufferBinding>,
    pub persistent: Option<BufferBinding>,
    pub temporary: Option<BufferBinding>,
}

/// A recorded device command.
#[derive(Debug)]
pub enum Command<P> {
    ResourceBarrier(Vec<BarrierTransition>),
    CopyBufferRegion {
        dst: Resource,
        dst_offset: usize,
        src: Resource,
        src_offset: usize,
        size: usize,
    },
    InitializeOperator {
        program: Arc<P>,
        bindings: InitializeBindings,
    },
    ExecuteOperator {
        program: Arc<P>,
        bindings: ExecuteBindings,
    },
}

/// Closed batch of commands ready for submission.
#[derive(Debug)]
pub struct CommandList<P> {
    commands: Vec<Command<P>>,
}

impl<P> CommandList<P> {
    pub(crate) fn new(commands: Vec<Command<P>>) -> Self {
        Self { commands }
    }

    pub fn commands(&self) -> &[Command<P>] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of resource references the list keeps alive.
    pub fn referenced_resources(&self) -> usize {
        self.commands
            .iter()
            .map(|command| match command {
                Command::ResourceBarrier(transitions) => transitions.len(),
                Command::CopyBufferRegion { .. } => 2,
                Command::InitializeOperator { bindings, .. } => {
                    bindings.constants.iter().flatten().count() + bindings.persistent.iter().count()
                }
                Command::ExecuteOperator { bindings, .. } => {
                    bindings.inputs.iter().flatten().count()
                        + bindings.outputs.len()
                        + bindings.persistent.iter().count()
                        + bindings.temporary.iter().count()
                }
            })
            .sum()
    }
}
