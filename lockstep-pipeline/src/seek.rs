//! Seek rendezvous across the four stage threads.
//!
//! A seek must not truncate queues while any stage still holds pre-seek
//! state, so the controller and the four stage threads (acquire and decode,
//! one each per side) meet at an explicit rendezvous instead of polling ad
//! hoc flags:
//!
//! 1. The controller moves the coordinator to `Quiesce`.
//! 2. Each decode stage flushes its decoder and acknowledges.
//! 3. Each acquire stage acknowledges after its side's decode stage has,
//!    then idles.
//! 4. With all four acknowledgements in, the controller truncates every
//!    queue and moves to `Execute`; each acquire stage issues the seek on
//!    its own demuxer and reports the outcome.
//! 5. The controller collects both outcomes and releases everyone back to
//!    `Idle`.
//!
//! All transitions ride one mutex and one condvar, so correctness does not
//! depend on any stage's polling cadence.

use crate::error::SeekError;
use crate::pipeline::Side;
use lockstep_core::Timestamp;
use parking_lot::{Condvar, Mutex};
use std::time::Duration;

/// Pipeline stages participating in the rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    Acquire = 0,
    Decode = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Quiesce,
    Execute,
    Shutdown,
}

/// What a parked decode stage should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Parked {
    /// Still quiescing; keep the upstream queue drained and park again.
    Waiting,
    /// The seek finished; resume streaming.
    Released,
    /// The pipeline is tearing down.
    Shutdown,
}

/// What an acquire stage observed at the rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AcquireOrder {
    /// Issue this seek on the stage's own demuxer and report the outcome.
    PerformSeek {
        target: Timestamp,
        backward: bool,
    },
    /// The seek finished; resume streaming.
    Resume,
    /// The pipeline is tearing down.
    Shutdown,
}

struct SeekState {
    phase: Phase,
    target: Timestamp,
    backward: bool,
    /// Acknowledgement matrix, indexed `[stage][side]`.
    ready: [[bool; 2]; 2],
    /// Per-side seek outcome of the execute round.
    outcome: [Option<Result<(), SeekError>>; 2],
}

/// Condvar rendezvous shared by the controller and all stage threads.
pub(crate) struct SeekCoordinator {
    state: Mutex<SeekState>,
    changed: Condvar,
}

impl SeekCoordinator {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SeekState {
                phase: Phase::Idle,
                target: Timestamp::none(),
                backward: false,
                ready: [[false; 2]; 2],
                outcome: [None, None],
            }),
            changed: Condvar::new(),
        }
    }

    /// Controller: begin a seek. Returns `false` when one is already in
    /// flight or the coordinator is shut down.
    pub(crate) fn request(&self, target: Timestamp, backward: bool) -> bool {
        let mut state = self.state.lock();
        if state.phase != Phase::Idle {
            return false;
        }
        state.phase = Phase::Quiesce;
        state.target = target;
        state.backward = backward;
        state.ready = [[false; 2]; 2];
        state.outcome = [None, None];
        self.changed.notify_all();
        true
    }

    /// Check whether a seek is anywhere between request and release.
    pub(crate) fn active(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Quiesce | Phase::Execute)
    }

    /// Decode stage: should this side flush and acknowledge now?
    pub(crate) fn decode_should_quiesce(&self, side: Side) -> bool {
        let state = self.state.lock();
        state.phase == Phase::Quiesce && !state.ready[Stage::Decode as usize][side.index()]
    }

    /// Decode stage: acknowledge after flushing the decoder.
    pub(crate) fn decode_ack(&self, side: Side) {
        let mut state = self.state.lock();
        state.ready[Stage::Decode as usize][side.index()] = true;
        self.changed.notify_all();
    }

    /// Decode stage: park for up to `timeout` while the seek completes.
    pub(crate) fn decode_park(&self, timeout: Duration) -> Parked {
        let mut state = self.state.lock();
        loop {
            match state.phase {
                Phase::Idle => return Parked::Released,
                Phase::Shutdown => return Parked::Shutdown,
                Phase::Quiesce | Phase::Execute => {
                    if self.changed.wait_for(&mut state, timeout).timed_out() {
                        return Parked::Waiting;
                    }
                }
            }
        }
    }

    /// Acquire stage: take part in the rendezvous.
    ///
    /// Blocks through the quiesce phase (acknowledging once this side's
    /// decode stage has), returns seek orders during the execute phase, and
    /// returns [`AcquireOrder::Resume`] when the controller releases.
    pub(crate) fn acquire_observe(&self, side: Side) -> AcquireOrder {
        let mut state = self.state.lock();
        loop {
            match state.phase {
                Phase::Idle => return AcquireOrder::Resume,
                Phase::Shutdown => return AcquireOrder::Shutdown,
                Phase::Quiesce => {
                    let decode_acked = state.ready[Stage::Decode as usize][side.index()];
                    let acquire_acked = state.ready[Stage::Acquire as usize][side.index()];
                    if decode_acked && !acquire_acked {
                        state.ready[Stage::Acquire as usize][side.index()] = true;
                        self.changed.notify_all();
                    }
                    self.changed.wait(&mut state);
                }
                Phase::Execute => {
                    if state.outcome[side.index()].is_none() {
                        return AcquireOrder::PerformSeek {
                            target: state.target,
                            backward: state.backward,
                        };
                    }
                    self.changed.wait(&mut state);
                }
            }
        }
    }

    /// Acquire stage: report the outcome of a seek order.
    pub(crate) fn report(&self, side: Side, result: Result<(), SeekError>) {
        let mut state = self.state.lock();
        state.outcome[side.index()] = Some(result);
        self.changed.notify_all();
    }

    /// Controller: wait up to `timeout` for all four acknowledgements.
    pub(crate) fn wait_all_ready_for(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.ready.iter().all(|stage| stage.iter().all(|&r| r)) {
                return true;
            }
            if state.phase != Phase::Quiesce {
                return false;
            }
            if self.changed.wait_for(&mut state, timeout).timed_out() {
                return false;
            }
        }
    }

    /// Controller: move to the execute phase with the given target. Also
    /// used for the restore round after a failed seek.
    pub(crate) fn execute(&self, target: Timestamp, backward: bool) {
        let mut state = self.state.lock();
        state.phase = Phase::Execute;
        state.target = target;
        state.backward = backward;
        state.outcome = [None, None];
        self.changed.notify_all();
    }

    /// Controller: wait up to `timeout` for both execute outcomes.
    pub(crate) fn wait_outcomes_for(
        &self,
        timeout: Duration,
    ) -> Option<[Result<(), SeekError>; 2]> {
        let mut state = self.state.lock();
        loop {
            if let (Some(left), Some(right)) = (&state.outcome[0], &state.outcome[1]) {
                return Some([left.clone(), right.clone()]);
            }
            if state.phase != Phase::Execute {
                return None;
            }
            if self.changed.wait_for(&mut state, timeout).timed_out() {
                return None;
            }
        }
    }

    /// Controller: release every stage back to streaming.
    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        if state.phase != Phase::Shutdown {
            state.phase = Phase::Idle;
        }
        state.ready = [[false; 2]; 2];
        state.outcome = [None, None];
        self.changed.notify_all();
    }

    /// Wake every parked stage for teardown. Terminal.
    pub(crate) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.phase = Phase::Shutdown;
        self.changed.notify_all();
    }
}
