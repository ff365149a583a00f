//! Per-side acquire and decode stage threads.
//!
//! Each side runs two OS threads: acquire reads packets from the demuxer
//! into the packet queue, decode turns packets into converted frames on the
//! frame queue. Both cooperate with the seek rendezvous and exit when their
//! queues are cancelled or the coordinator shuts down. Within a side, packet
//! and frame order is preserved end to end: single producer, single consumer,
//! FIFO queues.

use crate::error::PipelineError;
use crate::pipeline::Side;
use crate::seek::{AcquireOrder, Parked, SeekCoordinator};
use crate::source::{FrameConverter, FrameDecoder, PacketSource};
use lockstep_core::{BoundedQueue, Frame, Packet, PopResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// How long a stage waits on its queue before re-checking the seek state.
const POLL: Duration = Duration::from_millis(5);

/// First collaborator failure observed anywhere in the pipeline.
///
/// Stages record the error and cancel their own side's queues; the control
/// loop picks it up on the next tick, cancels everything else, and surfaces
/// it to the caller exactly once.
#[derive(Default)]
pub(crate) struct Failure {
    slot: Mutex<Option<PipelineError>>,
}

impl Failure {
    pub(crate) fn set(&self, error: PipelineError) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    pub(crate) fn take(&self) -> Option<PipelineError> {
        self.slot.lock().take()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }
}

/// Everything an acquire stage thread needs.
pub(crate) struct AcquireStage {
    pub side: Side,
    pub source: Box<dyn PacketSource>,
    pub packets: Arc<BoundedQueue<Packet>>,
    pub seek: Arc<SeekCoordinator>,
    pub failure: Arc<Failure>,
}

impl AcquireStage {
    /// Thread body: demuxer → packet queue.
    pub(crate) fn run(mut self) {
        debug!(side = ?self.side, "acquire stage started");
        let mut at_eof = false;
        loop {
            if self.seek.active() {
                match self.seek.acquire_observe(self.side) {
                    AcquireOrder::PerformSeek { target, backward } => {
                        trace!(side = ?self.side, %target, backward, "executing seek");
                        let result = self.source.seek(target, backward);
                        if result.is_ok() {
                            at_eof = false;
                        }
                        self.seek.report(self.side, result);
                    }
                    AcquireOrder::Resume => continue,
                    AcquireOrder::Shutdown => break,
                }
                continue;
            }
            if self.packets.is_quit() {
                break;
            }
            if at_eof {
                // idle at end of stream; a backward seek may revive us
                std::thread::sleep(POLL);
                continue;
            }

            match self.source.read_packet() {
                Ok(Some(packet)) => {
                    let weight = packet.size().max(1);
                    if !self.packets.push(packet, weight) && self.packets.is_quit() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!(side = ?self.side, "acquire stage reached end of stream");
                    self.packets.mark_finished();
                    at_eof = true;
                }
                Err(error) => {
                    warn!(side = ?self.side, %error, "acquire stage failed");
                    self.failure.set(error);
                    self.packets.mark_quit();
                    break;
                }
            }
        }
        debug!(side = ?self.side, "acquire stage exited");
    }
}

/// Everything a decode stage thread needs.
pub(crate) struct DecodeStage {
    pub side: Side,
    pub decoder: Box<dyn FrameDecoder>,
    pub converter: Box<dyn FrameConverter>,
    pub packets: Arc<BoundedQueue<Packet>>,
    pub frames: Arc<BoundedQueue<Frame>>,
    pub seek: Arc<SeekCoordinator>,
    pub failure: Arc<Failure>,
}

impl DecodeStage {
    /// Thread body: packet queue → decoder → converter → frame queue.
    pub(crate) fn run(mut self) {
        debug!(side = ?self.side, "decode stage started");
        let mut at_eof = false;
        loop {
            if self.seek.decode_should_quiesce(self.side) {
                self.decoder.flush();
                self.seek.decode_ack(self.side);
                let released = loop {
                    match self.seek.decode_park(POLL) {
                        // queued packets are doomed; keep draining so the
                        // acquire side cannot wedge inside push
                        Parked::Waiting => while self.packets.try_pop().is_some() {},
                        Parked::Released => break true,
                        Parked::Shutdown => break false,
                    }
                };
                if !released {
                    break;
                }
                at_eof = false;
                continue;
            }
            if self.frames.is_quit() || self.packets.is_quit() {
                break;
            }
            if at_eof {
                // idle at end of stream; a backward seek may revive us
                std::thread::sleep(POLL);
                continue;
            }

            match self.packets.pop_for(POLL) {
                PopResult::Item(packet) => {
                    if !self.decode_one(&packet) {
                        break;
                    }
                }
                PopResult::TimedOut => continue,
                PopResult::Finished => {
                    if !self.drain_decoder() {
                        break;
                    }
                    self.frames.mark_finished();
                    debug!(side = ?self.side, "decode stage drained");
                    at_eof = true;
                }
                PopResult::Quit => break,
            }
        }
        self.frames.mark_quit();
        debug!(side = ?self.side, "decode stage exited");
    }

    /// Send one packet through decoder and converter. Returns `false` when
    /// the stage should exit.
    fn decode_one(&mut self, packet: &Packet) -> bool {
        loop {
            match self.decoder.send(packet) {
                Ok(true) => break,
                Ok(false) => {
                    // decoder congested: drain before re-sending
                    if !self.forward_frames() {
                        return false;
                    }
                }
                Err(error) => {
                    warn!(side = ?self.side, %error, "decode stage failed");
                    self.failure.set(error);
                    self.packets.mark_quit();
                    self.frames.mark_quit();
                    return false;
                }
            }
        }
        self.forward_frames()
    }

    /// Receive every ready frame, convert, and enqueue. Returns `false` when
    /// the stage should exit.
    fn forward_frames(&mut self) -> bool {
        loop {
            match self.decoder.receive() {
                Ok(Some(frame)) => {
                    let out = self.converter.convert(&frame);
                    let weight = out.total_size().max(1);
                    if !self.frames.push(out, weight) {
                        // refused: either quit (exit) or a seek reset the
                        // queue mid-push (frame is doomed anyway)
                        if self.frames.is_quit() {
                            return false;
                        }
                    }
                }
                Ok(None) => return true,
                Err(error) => {
                    warn!(side = ?self.side, %error, "decoder receive failed");
                    self.failure.set(error);
                    self.packets.mark_quit();
                    self.frames.mark_quit();
                    return false;
                }
            }
        }
    }

    /// Flush the decoder tail at end of stream. Returns `false` when the
    /// stage should exit.
    fn drain_decoder(&mut self) -> bool {
        let ok = self.forward_frames();
        self.decoder.flush();
        ok
    }
}
