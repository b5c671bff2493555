use std::sync::atomic::{AtomicU8, Ordering};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const RERUN_REQUESTED: u8 = 2;

/// Serializes a re-entrant long-running sync routine.
///
/// A trigger that arrives while a run is in progress is not queued: it flips
/// the rerun flag and returns, and the in-progress run starts one more pass
/// when it finishes. Any burst of triggers therefore coalesces into at most
/// one extra pass, and every trigger is honored by a pass that started at or
/// after it.
///
/// Intended use:
///
/// ```ignore
/// if !gate.try_begin() {
///     return Ok(()); // someone else is running and will rerun for us
/// }
/// loop {
///     let result = run_once().await;
///     if !gate.finish() {
///         break result;
///     }
/// }
/// ```
#[derive(Debug, Default)]
pub struct ResyncGate {
    state: AtomicU8,
}

impl ResyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the gate. Returns false if a run is already in progress, in
    /// which case the rerun flag has been set on the caller's behalf.
    pub fn try_begin(&self) -> bool {
        loop {
            match self.state.compare_exchange(
                IDLE,
                RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(RUNNING) => {
                    if self
                        .state
                        .compare_exchange(RUNNING, RERUN_REQUESTED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return false;
                    }
                    // Lost a race with finish() or another trigger; retry.
                }
                Err(RERUN_REQUESTED) => return false,
                Err(_) => unreachable!("invalid gate state"),
            }
        }
    }

    /// True if a trigger arrived since the current pass began. Long passes
    /// poll this to abort stale work early.
    pub fn rerun_requested(&self) -> bool {
        self.state.load(Ordering::Acquire) == RERUN_REQUESTED
    }

    /// Releases the gate. Returns true when a rerun was requested: the gate
    /// stays claimed across the handoff (so concurrent triggers keep
    /// coalescing) and the caller must run one more pass.
    pub fn finish(&self) -> bool {
        loop {
            match self.state.compare_exchange(
                RERUN_REQUESTED,
                RUNNING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(RUNNING) => {
                    if self
                        .state
                        .compare_exchange(RUNNING, IDLE, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        return false;
                    }
                }
                Err(IDLE) => return false,
                Err(_) => unreachable!("invalid gate state"),
            }
        }
    }
}
