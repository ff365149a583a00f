//! Dual-stream pipeline orchestration.
//!
//! Owns the per-side stage threads, the bounded queues between them, and the
//! presentation/control loop that runs on the caller's thread via
//! [`step`](DualStreamPipeline::step) or [`run`](DualStreamPipeline::run).

use crate::analysis::FrameAnalyzer;
use crate::error::{PipelineError, Result};
use crate::history::{FrameHistory, HistoryConfig};
use crate::seek::SeekCoordinator;
use crate::source::{EventSink, PresentationView, UserIntent};
use crate::stage::{AcquireStage, DecodeStage, Failure};
use crate::sync::{drift_action, DriftAction, FrameTimer, SyncConfig};
use lockstep_core::{BoundedQueue, Duration, Frame, Packet, PopResult, Timestamp};
use lockstep_parallel::{PoolConfig, WorkerPool};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

/// How long one presentation tick waits for a frame before giving up.
const POP_WAIT: StdDuration = StdDuration::from_millis(10);
/// Controller wait granularity during the seek rendezvous.
const WAIT_TICK: StdDuration = StdDuration::from_millis(2);

/// Stream side identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// The first input.
    Left,
    /// The second input.
    Right,
}

impl Side {
    /// Both sides, left first.
    pub const BOTH: [Side; 2] = [Side::Left, Side::Right];

    /// Array index for this side.
    pub fn index(self) -> usize {
        match self {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    /// The opposite side.
    pub fn other(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

/// Per-side lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Created but not started.
    Idle,
    /// Stage threads running, frames flowing.
    Streaming,
    /// A seek rendezvous is in flight.
    Seeking,
    /// Upstream is exhausted; remaining frames drain.
    Draining,
    /// Fully stopped.
    Closed,
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Drift and pacing parameters.
    pub sync: SyncConfig,
    /// Presented-frame history depth.
    pub history: HistoryConfig,
    /// Analysis worker pool.
    pub pool: PoolConfig,
    /// Weight limit of each packet queue, bytes.
    pub packet_queue_bytes: usize,
    /// Weight limit of each frame queue, bytes.
    pub frame_queue_bytes: usize,
    /// Number of per-frame difference scores kept for statistics.
    pub analysis_window: usize,
    /// Rows per dynamic analysis work unit.
    pub analysis_chunk_rows: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            history: HistoryConfig::default(),
            pool: PoolConfig::default(),
            packet_queue_bytes: 4 << 20,
            frame_queue_bytes: 64 << 20,
            analysis_window: 120,
            analysis_chunk_rows: 16,
        }
    }
}

/// The collaborators for one side of the pipeline.
pub struct StreamInput {
    /// Demuxer.
    pub source: Box<dyn crate::source::PacketSource>,
    /// Decoder.
    pub decoder: Box<dyn crate::source::FrameDecoder>,
    /// Pixel converter toward the presentation format.
    pub converter: Box<dyn crate::source::FrameConverter>,
}

/// Everything the control loop tracks for one side.
struct SideRuntime {
    packets: Arc<BoundedQueue<Packet>>,
    frames: Arc<BoundedQueue<Frame>>,
    state: StreamState,
    current_pts: Timestamp,
    /// Microseconds between the last two presented frames.
    last_delta_us: i64,
    history: FrameHistory,
    acquire: Option<JoinHandle<()>>,
    decode: Option<JoinHandle<()>>,
}

impl SideRuntime {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            packets: Arc::new(BoundedQueue::new(config.packet_queue_bytes)),
            frames: Arc::new(BoundedQueue::new(config.frame_queue_bytes)),
            state: StreamState::Idle,
            current_pts: Timestamp::none(),
            last_delta_us: 0,
            history: FrameHistory::new(config.history.depth),
            acquire: None,
            decode: None,
        }
    }
}

/// Two synchronized media streams behind one presentation loop.
pub struct DualStreamPipeline {
    config: PipelineConfig,
    sides: [SideRuntime; 2],
    inputs: Option<[StreamInput; 2]>,
    seek: Arc<SeekCoordinator>,
    failure: Arc<Failure>,
    timer: FrameTimer,
    pool: WorkerPool,
    analyzer: FrameAnalyzer,
    playing: bool,
    swapped: bool,
    transient_error: Option<String>,
}

impl DualStreamPipeline {
    /// Create a pipeline over two inputs. Stage threads start on
    /// [`start`](Self::start) (or implicitly on [`run`](Self::run)).
    pub fn new(config: PipelineConfig, left: StreamInput, right: StreamInput) -> Self {
        let timer = FrameTimer::new(&config.sync);
        let pool = WorkerPool::with_config(&config.pool);
        let analyzer = FrameAnalyzer::new(config.analysis_window, config.analysis_chunk_rows);
        Self {
            sides: [SideRuntime::new(&config), SideRuntime::new(&config)],
            inputs: Some([left, right]),
            seek: Arc::new(SeekCoordinator::new()),
            failure: Arc::new(Failure::default()),
            timer,
            pool,
            analyzer,
            playing: false,
            swapped: false,
            transient_error: None,
            config,
        }
    }

    /// Current state of one side.
    pub fn state(&self, side: Side) -> StreamState {
        self.sides[side.index()].state
    }

    /// Current presentation position of one side.
    pub fn position(&self, side: Side) -> Timestamp {
        self.sides[side.index()].current_pts
    }

    /// Check if the presentation loop is advancing.
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Spawn the four stage threads and begin streaming.
    pub fn start(&mut self) -> Result<()> {
        let Some(inputs) = self.inputs.take() else {
            return Err(PipelineError::AlreadyRunning);
        };
        let [left, right] = inputs;
        self.spawn_side(Side::Left, left)?;
        self.spawn_side(Side::Right, right)?;
        self.playing = true;
        info!("dual-stream pipeline started");
        Ok(())
    }

    fn spawn_side(&mut self, side: Side, input: StreamInput) -> Result<()> {
        let runtime = &mut self.sides[side.index()];

        let acquire = AcquireStage {
            side,
            source: input.source,
            packets: Arc::clone(&runtime.packets),
            seek: Arc::clone(&self.seek),
            failure: Arc::clone(&self.failure),
        };
        runtime.acquire = Some(
            thread::Builder::new()
                .name(format!("lockstep-acquire-{}", side.label()))
                .spawn(move || acquire.run())?,
        );

        let decode = DecodeStage {
            side,
            decoder: input.decoder,
            converter: input.converter,
            packets: Arc::clone(&runtime.packets),
            frames: Arc::clone(&runtime.frames),
            seek: Arc::clone(&self.seek),
            failure: Arc::clone(&self.failure),
        };
        runtime.decode = Some(
            thread::Builder::new()
                .name(format!("lockstep-decode-{}", side.label()))
                .spawn(move || decode.run())?,
        );

        runtime.state = StreamState::Streaming;
        Ok(())
    }

    /// Run one presentation tick: poll input, advance frames per the drift
    /// rule, refresh the sink. Returns `false` once both sides are closed.
    pub fn step(&mut self, sink: &mut dyn EventSink) -> Result<bool> {
        if self.sides.iter().any(|s| s.state == StreamState::Idle) {
            return Err(PipelineError::NotRunning);
        }
        if let Some(error) = self.failure.take() {
            warn!(%error, "collaborator failure, cancelling pipeline");
            self.close();
            return Err(error);
        }

        match sink.poll_input() {
            UserIntent::None => {}
            UserIntent::TogglePlayback => {
                self.playing = !self.playing;
                self.timer.reset();
            }
            UserIntent::StepForward => self.frame_step_forward(),
            UserIntent::StepBack => {
                self.playing = false;
                for runtime in &mut self.sides {
                    runtime.history.step_back();
                }
            }
            UserIntent::SeekRelative { millis } => self.seek_relative(millis),
            UserIntent::SwapSides => self.swapped = !self.swapped,
            UserIntent::Quit => {
                self.close();
                self.refresh(sink);
                return Ok(false);
            }
        }

        if self.playing {
            self.advance_tick();
        }
        self.refresh(sink);

        Ok(!self.sides.iter().all(|s| s.state == StreamState::Closed))
    }

    /// Drive [`step`](Self::step) until both sides close or the sink quits.
    pub fn run(&mut self, sink: &mut dyn EventSink) -> Result<()> {
        if self.inputs.is_some() {
            self.start()?;
        }
        while self.step(sink)? {}
        Ok(())
    }

    /// Cancel every queue, release the stage threads, and join them.
    /// Idempotent.
    pub fn close(&mut self) {
        for runtime in &self.sides {
            runtime.packets.mark_quit();
            runtime.frames.mark_quit();
        }
        self.seek.shutdown();
        for runtime in &mut self.sides {
            if let Some(handle) = runtime.acquire.take() {
                let _ = handle.join();
            }
            if let Some(handle) = runtime.decode.take() {
                let _ = handle.join();
            }
            runtime.state = StreamState::Closed;
        }
        if self.playing {
            debug!("pipeline closed");
        }
        self.playing = false;
    }

    /// One frame forward: browse toward the live edge, or step playback by a
    /// single frame when already there.
    fn frame_step_forward(&mut self) {
        self.playing = false;
        let at_live = self.sides.iter().all(|s| s.history.is_live());
        if at_live {
            self.advance(Side::Left);
            self.advance(Side::Right);
        } else {
            for runtime in &mut self.sides {
                runtime.history.step_forward();
            }
        }
    }

    /// Advance per the drift rule: both sides together when within
    /// tolerance, otherwise only the lagging side, unpaced, until it has
    /// caught up.
    fn advance_tick(&mut self) {
        let left_live = self.sides[0].state != StreamState::Closed;
        let right_live = self.sides[1].state != StreamState::Closed;

        let action = match (left_live, right_live) {
            (true, true) => drift_action(
                self.sides[0].current_pts,
                self.sides[1].current_pts,
                self.config.sync.tolerance_us,
            ),
            (true, false) => DriftAction::AdvanceLeft,
            (false, true) => DriftAction::AdvanceRight,
            (false, false) => return,
        };

        match action {
            DriftAction::Together => {
                let left = self.advance(Side::Left);
                let right = self.advance(Side::Right);
                if left && right {
                    self.analyze_presented();
                }
                self.pace();
            }
            DriftAction::AdvanceLeft => {
                self.advance(Side::Left);
                if !right_live {
                    self.pace();
                }
            }
            DriftAction::AdvanceRight => {
                self.advance(Side::Right);
                if !left_live {
                    self.pace();
                }
            }
        }
    }

    /// Pop and present one frame for a side. Returns `true` when a frame was
    /// presented.
    fn advance(&mut self, side: Side) -> bool {
        let runtime = &mut self.sides[side.index()];
        if runtime.state == StreamState::Closed {
            return false;
        }
        if runtime.state == StreamState::Streaming && runtime.frames.is_finished() {
            runtime.state = StreamState::Draining;
        }
        match runtime.frames.pop_for(POP_WAIT) {
            PopResult::Item(frame) => {
                let pts = frame.pts;
                if runtime.current_pts.is_valid() && pts.is_valid() {
                    runtime.last_delta_us = (pts - runtime.current_pts).to_micros().max(0);
                }
                if pts.is_valid() {
                    runtime.current_pts = pts;
                }
                runtime.history.record(frame);
                true
            }
            PopResult::Finished => {
                if runtime.state != StreamState::Closed {
                    debug!(side = side.label(), "stream drained");
                    runtime.state = StreamState::Closed;
                }
                false
            }
            PopResult::Quit => {
                runtime.state = StreamState::Closed;
                false
            }
            PopResult::TimedOut => false,
        }
    }

    /// Fold the freshly presented pair into the difference window.
    fn analyze_presented(&mut self) {
        let left = self.sides[0].history.current();
        let right = self.sides[1].history.current();
        if let (Some(left), Some(right)) = (left, right) {
            self.analyzer.record(&self.pool, &left.frame, &right.frame);
        }
    }

    /// Sleep toward the next tick, paced by the leading side's inter-frame
    /// delta.
    fn pace(&mut self) {
        let leader = if self.sides[0].current_pts >= self.sides[1].current_pts {
            0
        } else {
            1
        };
        let mut delta_us = self.sides[leader].last_delta_us;
        if delta_us <= 0 {
            delta_us = self.config.sync.tolerance_us;
        }
        self.timer.pace(StdDuration::from_micros(delta_us as u64));
    }

    /// Seek both sides relative to the leading side's position.
    fn seek_relative(&mut self, millis: i64) {
        let position = self.sides[0]
            .current_pts
            .max(self.sides[1].current_pts);
        let position = if position.is_valid() {
            position
        } else {
            Timestamp::from_millis(0)
        };
        let mut target = position + Duration::from_millis(millis);
        if target.to_millis().unwrap_or(0) < 0 {
            target = Timestamp::from_millis(0);
        }
        self.perform_seek(target, millis < 0, position);
    }

    /// Run the full seek protocol: quiesce all four stages, truncate every
    /// queue, execute on both demuxers, recover locally on failure.
    fn perform_seek(&mut self, target: Timestamp, backward: bool, previous: Timestamp) {
        if !self.seek.request(target, backward) {
            return;
        }
        debug!(%target, backward, "seek requested");
        for runtime in &mut self.sides {
            if runtime.state != StreamState::Closed {
                runtime.state = StreamState::Seeking;
            }
        }

        // rendezvous: wait for all four acknowledgements, draining the frame
        // queues so a decode stage blocked mid-push can reach its checkpoint
        let quiesced = loop {
            if self.failure.is_set() {
                break false;
            }
            if self.seek.wait_all_ready_for(WAIT_TICK) {
                break true;
            }
            for runtime in &self.sides {
                while runtime.frames.try_pop().is_some() {}
            }
        };
        if !quiesced {
            self.seek.finish();
            self.resume_after_seek(previous);
            return;
        }

        // commit point: every stage is parked, buffered data is stale
        for runtime in &self.sides {
            runtime.packets.reset();
            runtime.frames.reset();
        }

        self.seek.execute(target, backward);
        let Some(outcomes) = self.wait_outcomes() else {
            self.seek.finish();
            self.resume_after_seek(previous);
            return;
        };

        let final_position = match outcomes.iter().find_map(|o| o.as_ref().err()) {
            None => {
                debug!(%target, "seek committed");
                target
            }
            Some(error) => {
                // unreachable target: restore the pre-seek position on both
                // demuxers and surface a transient message
                warn!(%error, "seek failed, restoring previous position");
                self.transient_error = Some(error.to_string());
                if previous.is_valid() {
                    self.seek.execute(previous, true);
                    let _ = self.wait_outcomes();
                }
                previous
            }
        };

        self.seek.finish();
        self.resume_after_seek(final_position);
    }

    fn wait_outcomes(&self) -> Option<[std::result::Result<(), crate::error::SeekError>; 2]> {
        loop {
            if self.failure.is_set() {
                return None;
            }
            if let Some(outcomes) = self.seek.wait_outcomes_for(WAIT_TICK) {
                return Some(outcomes);
            }
        }
    }

    fn resume_after_seek(&mut self, position: Timestamp) {
        for runtime in &mut self.sides {
            // a backward seek revives even a drained side; its stage threads
            // idle at end of stream rather than exiting
            runtime.state = StreamState::Streaming;
            runtime.current_pts = position;
            runtime.last_delta_us = 0;
        }
        self.timer.reset();
    }

    /// Hand the current state to the sink.
    fn refresh(&mut self, sink: &mut dyn EventSink) {
        let (left_index, right_index) = if self.swapped { (1, 0) } else { (0, 1) };
        let left = self.sides[left_index].history.current();
        let right = self.sides[right_index].history.current();
        let view = PresentationView {
            left: left.map(|p| &p.frame),
            right: right.map(|p| &p.frame),
            left_pts: left
                .map(|p| p.pts)
                .unwrap_or(self.sides[left_index].current_pts),
            right_pts: right
                .map(|p| p.pts)
                .unwrap_or(self.sides[right_index].current_pts),
            browse_offset: self.sides[0].history.cursor(),
            history_len: self.sides[0].history.len(),
            playing: self.playing,
            difference: self.analyzer.stats(),
            error_message: self.transient_error.take(),
        };
        sink.refresh(&view);
    }
}

impl Drop for DualStreamPipeline {
    fn drop(&mut self) {
        self.close();
    }
}
