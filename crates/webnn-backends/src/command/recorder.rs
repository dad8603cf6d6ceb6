//! Checked command recording state machine

use std::fmt;
use std::sync::Arc;

use super::{BarrierTransition, Command, CommandList, CommandQueue, ExecuteBindings, InitializeBindings};
use crate::backend::Backend;
use crate::error::{BackendError, Result};
use crate::resource::{check_range, Resource};

/// `Closed → Recording → Executing → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    Closed,
    Recording,
    Executing,
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderState::Closed => "closed",
            RecorderState::Recording => "recording",
            RecorderState::Executing => "executing",
        };
        f.write_str(name)
    }
}

/// Accumulates commands for one batched submission.
///
/// A submitted list is owned by the device, so the recorder may be reopened
/// while its previous batch is still executing.
pub struct CommandRecorder<P> {
    state: RecorderState,
    commands: Vec<Command<P>>,
    submitted_fence: u64,
}

impl<P> CommandRecorder<P> {
    pub fn new() -> Self {
        Self {
            state: RecorderState::Closed,
            commands: Vec::new(),
            submitted_fence: 0,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Fence value of the last batch this recorder submitted.
    pub fn submitted_fence(&self) -> u64 {
        self.submitted_fence
    }

    /// Move from `Executing` to `Closed` once the device caught up.
    pub fn on_completed(&mut self, completed_fence: u64) {
        if self.state == RecorderState::Executing && completed_fence >= self.submitted_fence {
            self.state = RecorderState::Closed;
        }
    }

    pub fn open(&mut self) -> Result<()> {
        if self.state == RecorderState::Recording {
            return Err(BackendError::RecorderState {
                expected: RecorderState::Closed,
                actual: self.state,
            });
        }
        self.commands.clear();
        self.state = RecorderState::Recording;
        Ok(())
    }

    fn expect_recording(&self) -> Result<()> {
        if self.state != RecorderState::Recording {
            return Err(BackendError::RecorderState {
                expected: RecorderState::Recording,
                actual: self.state,
            });
        }
        Ok(())
    }

    pub fn resource_barrier(&mut self, transitions: Vec<BarrierTransition>) -> Result<()> {
        self.expect_recording()?;
        if !transitions.is_empty() {
            self.commands.push(Command::ResourceBarrier(transitions));
        }
        Ok(())
    }

    pub fn copy_buffer_region(
        &mut self,
        dst: &Resource,
        dst_offset: usize,
        src: &Resource,
        src_offset: usize,
        size: usize,
    ) -> Result<()> {
        self.expect_recording()?;
        check_range(dst_offset, size, dst.size())?;
        check_range(src_offset, size, src.size())?;
        self.commands.push(Command::CopyBufferRegion {
            dst: dst.clone(),
            dst_offset,
            src: src.clone(),
            src_offset,
            size,
        });
        Ok(())
    }

    pub fn initialize_operator(&mut self, program: Arc<P>, bindings: InitializeBindings) -> Result<()> {
        self.expect_recording()?;
        self.commands.push(Command::InitializeOperator { program, bindings });
        Ok(())
    }

    pub fn execute_operator(&mut self, program: Arc<P>, bindings: ExecuteBindings) -> Result<()> {
        self.expect_recording()?;
        self.commands.push(Command::ExecuteOperator { program, bindings });
        Ok(())
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    /// Close the batch, submit it, and return the fence value to wait on.
    pub fn close_and_execute<B>(&mut self, queue: &CommandQueue<B>) -> Result<u64>
    where
        B: Backend<Program = P>,
    {
        self.expect_recording()?;
        let list = CommandList::new(std::mem::take(&mut self.commands));
        self.state = RecorderState::Closed;
        let fence_value = queue.execute_command_list(list)?;
        self.submitted_fence = fence_value;
        self.state = RecorderState::Executing;
        Ok(fence_value)
    }
}

impl<P> Default for CommandRecorder<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BufferHandle, HeapType, ResourceState};
    use crate::resource::ResourceAllocator;

    struct NoopAllocator;

    impl ResourceAllocator for NoopAllocator {
        fn release(&self, _handle: BufferHandle) {}
    }

    fn resource(id: u64, size: usize) -> Resource {
        Resource::new(BufferHandle::new(id), size, HeapType::Default, Arc::new(NoopAllocator))
    }

    #[test]
    fn recording_requires_open() {
        let mut recorder = CommandRecorder::<()>::new();
        let buffer = resource(1, 16);
        let err = recorder
            .resource_barrier(vec![BarrierTransition::new(
                &buffer,
                ResourceState::Common,
                ResourceState::CopyDest,
            )])
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::RecorderState {
                expected: RecorderState::Recording,
                actual: RecorderState::Closed,
            }
        );
    }

    #[test]
    fn open_twice_is_rejected() {
        let mut recorder = CommandRecorder::<()>::new();
        recorder.open().unwrap();
        assert!(matches!(
            recorder.open(),
            Err(BackendError::RecorderState { actual: RecorderState::Recording, .. })
        ));
    }

    #[test]
    fn copy_is_bounds_checked() {
        let mut recorder = CommandRecorder::<()>::new();
        recorder.open().unwrap();
        let src = resource(1, 32);
        let dst = resource(2, 16);
        assert!(recorder.copy_buffer_region(&dst, 0, &src, 0, 16).is_ok());
        assert!(matches!(
            recorder.copy_buffer_region(&dst, 8, &src, 0, 16),
            Err(BackendError::OutOfBounds { .. })
        ));
        assert_eq!(recorder.command_count(), 1);
    }

    #[test]
    fn completion_closes_executing_recorder() {
        let mut recorder = CommandRecorder::<()>::new();
        recorder.state = RecorderState::Executing;
        recorder.submitted_fence = 3;
        recorder.on_completed(2);
        assert_eq!(recorder.state(), RecorderState::Executing);
        recorder.on_completed(3);
        assert_eq!(recorder.state(), RecorderState::Closed);
    }
}
