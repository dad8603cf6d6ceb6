//! Monotonic completion counter shared between the device and waiters

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

type Callback = Box<dyn FnOnce(Result<(), FenceWaitError>) + Send>;

/// Faults nobody has waited on yet are kept for late waiters, up to this many.
const RETAINED_FAULTS: usize = 64;

/// Why a fence wait did not complete normally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FenceWaitError {
    /// The fence will never advance again
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// The submission for this value completed with a fault
    #[error("submission {fence_value} faulted: {reason}")]
    Faulted { fence_value: u64, reason: String },
}

#[derive(Default)]
struct FenceState {
    waiters: Vec<(u64, Callback)>,
    faults: BTreeMap<u64, String>,
    lost: Option<String>,
}

/// Device completion fence.
///
/// The completed value only moves forward. Waiters register a callback for
/// a value and are invoked exactly once, on whichever thread advances the
/// fence past it (or immediately if it already has).
pub struct Fence {
    completed: AtomicU64,
    state: Mutex<FenceState>,
}

impl Fence {
    pub fn new() -> Self {
        Self {
            completed: AtomicU64::new(0),
            state: Mutex::new(FenceState::default()),
        }
    }

    /// Highest value the device has completed.
    pub fn completed_value(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn lost_reason(&self) -> Option<String> {
        self.state.lock().lost.clone()
    }

    /// Mark `value` complete. Lower values never move the fence back.
    pub fn signal(&self, value: u64) {
        self.advance(value, None);
    }

    /// Mark `value` complete but report `reason` to its waiters.
    pub fn signal_with_fault(&self, value: u64, reason: impl Into<String>) {
        self.advance(value, Some(reason.into()));
    }

    fn advance(&self, value: u64, fault: Option<String>) {
        let ready = {
            let mut state = self.state.lock();
            if let Some(reason) = fault {
                state.faults.insert(value, reason);
            }
            let completed = self.completed.fetch_max(value, Ordering::AcqRel).max(value);

            let (ready, pending): (Vec<_>, Vec<_>) =
                std::mem::take(&mut state.waiters).into_iter().partition(|(v, _)| *v <= completed);
            state.waiters = pending;

            let ready = ready
                .into_iter()
                .map(|(v, callback)| (v, Self::outcome(&state, v), callback))
                .collect::<Vec<_>>();
            for (v, _, _) in &ready {
                state.faults.remove(v);
            }
            while state.faults.len() > RETAINED_FAULTS {
                state.faults.pop_first();
            }
            ready
        };

        for (_, outcome, callback) in ready {
            callback(outcome);
        }
    }

    /// Permanently fail the fence; every pending and future wait errors.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let waiters = {
            let mut state = self.state.lock();
            if state.lost.is_none() {
                state.lost = Some(reason.clone());
            }
            std::mem::take(&mut state.waiters)
        };
        tracing::warn!(reason = %reason, "fence_failed");
        for (_, callback) in waiters {
            callback(Err(FenceWaitError::DeviceLost(reason.clone())));
        }
    }

    /// Call `callback` once `value` has completed.
    ///
    /// Never blocks; if `value` is already complete the callback runs on the
    /// calling thread before this returns.
    pub fn set_event_on_completion<F>(&self, value: u64, callback: F)
    where
        F: FnOnce(Result<(), FenceWaitError>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.state.lock();
            if let Some(reason) = &state.lost {
                Err(FenceWaitError::DeviceLost(reason.clone()))
            } else if self.completed_value() >= value {
                Self::outcome(&state, value)
            } else {
                state.waiters.push((value, Box::new(callback)));
                return;
            }
        };
        callback(outcome);
    }

    fn outcome(state: &FenceState, value: u64) -> Result<(), FenceWaitError> {
        match state.faults.get(&value) {
            Some(reason) => Err(FenceWaitError::Faulted {
                fence_value: value,
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Number of registered, not yet fired callbacks.
    pub fn pending_waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("completed", &self.completed_value())
            .finish_non_exhaustive()
    }
}
