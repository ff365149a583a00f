//! Dual-stream pipeline integration tests.
//!
//! Drives the full pipeline with mock collaborators to verify drift
//! correction, the seek rendezvous, browsing, and cancellation.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lockstep_core::{Frame, Packet, PixelFormat, TimeBase, Timestamp};
use lockstep_pipeline::*;

// =============================================================================
// Mock Implementations
// =============================================================================

/// Scripted packet source: `frame_count` packets spaced `interval_ms` apart
/// starting at `start_ms`, with recordable, optionally failing seeks.
struct MockSource {
    frame_count: usize,
    interval_ms: i64,
    start_ms: i64,
    position: usize,
    fail_forward_seeks: bool,
    seeks: Arc<Mutex<Vec<(i64, bool)>>>,
    packets_read: Arc<AtomicUsize>,
}

impl MockSource {
    fn new(frame_count: usize, interval_ms: i64, start_ms: i64) -> Self {
        Self {
            frame_count,
            interval_ms,
            start_ms,
            position: 0,
            fail_forward_seeks: false,
            seeks: Arc::new(Mutex::new(Vec::new())),
            packets_read: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn failing_forward_seeks(mut self) -> Self {
        self.fail_forward_seeks = true;
        self
    }

    fn seek_log(&self) -> Arc<Mutex<Vec<(i64, bool)>>> {
        Arc::clone(&self.seeks)
    }
}

impl PacketSource for MockSource {
    fn read_packet(&mut self) -> Result<Option<Packet>> {
        if self.position >= self.frame_count {
            return Ok(None);
        }
        let pts = Timestamp::from_millis(self.start_ms + self.position as i64 * self.interval_ms);
        self.position += 1;
        self.packets_read.fetch_add(1, Ordering::SeqCst);
        Ok(Some(Packet::new(vec![0u8; 64]).with_pts(pts)))
    }

    fn seek(&mut self, target: Timestamp, backward: bool) -> std::result::Result<(), SeekError> {
        let target_ms = target.to_millis().unwrap_or(0);
        self.seeks.lock().push((target_ms, backward));
        if self.fail_forward_seeks && !backward {
            return Err(SeekError::PastEnd);
        }
        let index = (target_ms - self.start_ms).max(0) / self.interval_ms.max(1);
        self.position = (index as usize).min(self.frame_count);
        Ok(())
    }

    fn time_base(&self) -> TimeBase {
        TimeBase::MILLISECONDS
    }

    fn stream_index(&self) -> u32 {
        0
    }
}

/// 1:1 packet-to-frame decoder producing gray frames of a fixed size.
struct MockDecoder {
    width: u32,
    height: u32,
    ready: VecDeque<Frame>,
    sends: usize,
    congest_every: Option<usize>,
    fail_at_send: Option<usize>,
    frames_decoded: Arc<AtomicUsize>,
}

impl MockDecoder {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ready: VecDeque::new(),
            sends: 0,
            congest_every: None,
            fail_at_send: None,
            frames_decoded: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn congested_every(mut self, n: usize) -> Self {
        self.congest_every = Some(n);
        self
    }

    fn failing_at(mut self, n: usize) -> Self {
        self.fail_at_send = Some(n);
        self
    }
}

impl FrameDecoder for MockDecoder {
    fn send(&mut self, packet: &Packet) -> Result<bool> {
        self.sends += 1;
        if let Some(fail_at) = self.fail_at_send {
            if self.sends >= fail_at {
                return Err(PipelineError::Decode("mock decoder failure".into()));
            }
        }
        if let Some(every) = self.congest_every {
            if self.sends % every == 0 && !self.ready.is_empty() {
                return Ok(false);
            }
        }
        let frame = Frame::new(self.width, self.height, PixelFormat::Gray8).with_pts(packet.pts);
        self.ready.push_back(frame);
        self.frames_decoded.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn receive(&mut self) -> Result<Option<Frame>> {
        Ok(self.ready.pop_front())
    }

    fn flush(&mut self) {
        self.ready.clear();
    }
}

/// Identity converter.
struct MockConverter;

impl FrameConverter for MockConverter {
    fn convert(&mut self, frame: &Frame) -> Frame {
        frame.clone()
    }
}

fn input(source: MockSource, decoder: MockDecoder) -> StreamInput {
    StreamInput {
        source: Box::new(source),
        decoder: Box::new(decoder),
        converter: Box::new(MockConverter),
    }
}

fn simple_input(frame_count: usize, interval_ms: i64, start_ms: i64) -> StreamInput {
    input(
        MockSource::new(frame_count, interval_ms, start_ms),
        MockDecoder::new(16, 16),
    )
}

/// One recorded refresh.
#[derive(Debug, Clone)]
struct ViewRecord {
    left_ms: Option<i64>,
    right_ms: Option<i64>,
    left_width: Option<u32>,
    browse_offset: usize,
    error: Option<String>,
}

/// Sink that replays a script of intents and records every view.
struct ScriptedSink {
    script: VecDeque<UserIntent>,
    views: Vec<ViewRecord>,
    polls: usize,
    max_ticks: usize,
}

impl ScriptedSink {
    fn new(script: Vec<UserIntent>, max_ticks: usize) -> Self {
        Self {
            script: script.into(),
            views: Vec::new(),
            polls: 0,
            max_ticks,
        }
    }

    fn idle(max_ticks: usize) -> Self {
        Self::new(Vec::new(), max_ticks)
    }

    fn presented(&self) -> Vec<(i64, i64)> {
        let mut pairs = Vec::new();
        for view in &self.views {
            if let (Some(l), Some(r)) = (view.left_ms, view.right_ms) {
                if pairs.last() != Some(&(l, r)) {
                    pairs.push((l, r));
                }
            }
        }
        pairs
    }
}

impl EventSink for ScriptedSink {
    fn poll_input(&mut self) -> UserIntent {
        self.polls += 1;
        if self.polls > self.max_ticks {
            return UserIntent::Quit;
        }
        self.script.pop_front().unwrap_or(UserIntent::None)
    }

    fn refresh(&mut self, view: &PresentationView<'_>) {
        self.views.push(ViewRecord {
            left_ms: view.left_pts.to_millis(),
            right_ms: view.right_pts.to_millis(),
            left_width: view.left.map(|f| f.width()),
            browse_offset: view.browse_offset,
            error: view.error_message.clone(),
        });
    }
}

fn fast_config() -> PipelineConfig {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    PipelineConfig {
        analysis_window: 16,
        ..PipelineConfig::default()
    }
}

// =============================================================================
// Playback
// =============================================================================

#[test]
fn test_runs_to_completion_and_closes() {
    let mut pipeline = DualStreamPipeline::new(
        fast_config(),
        simple_input(10, 20, 0),
        simple_input(10, 20, 0),
    );
    let mut sink = ScriptedSink::idle(500);

    pipeline.run(&mut sink).expect("pipeline runs cleanly");

    assert_eq!(pipeline.state(Side::Left), StreamState::Closed);
    assert_eq!(pipeline.state(Side::Right), StreamState::Closed);
    let pairs = sink.presented();
    // both sides ended on the final frame, and the gap never exceeded one
    // frame interval plus the drift tolerance along the way
    assert_eq!(pairs.last(), Some(&(180, 180)));
    assert!(pairs.iter().all(|(l, r)| (l - r).abs() <= 20 + 17));
}

#[test]
fn test_congested_decoder_delivers_everything() {
    let left = input(
        MockSource::new(12, 20, 0),
        MockDecoder::new(16, 16).congested_every(3),
    );
    let mut pipeline =
        DualStreamPipeline::new(fast_config(), left, simple_input(12, 20, 0));
    let mut sink = ScriptedSink::idle(500);

    pipeline.run(&mut sink).expect("pipeline runs cleanly");
    assert_eq!(sink.presented().last(), Some(&(220, 220)));
}

// =============================================================================
// Drift correction
// =============================================================================

#[test]
fn test_lagging_side_catches_up_alone() {
    // the left side starts 50 ms behind; tolerance is 1/60 s
    let mut pipeline = DualStreamPipeline::new(
        fast_config(),
        simple_input(40, 20, 1000),
        simple_input(40, 20, 1050),
    );
    let mut sink = ScriptedSink::idle(600);

    pipeline.run(&mut sink).expect("pipeline runs cleanly");
    let pairs = sink.presented();
    assert!(!pairs.is_empty());

    let tolerance = 1000 / 60 + 1;
    // once a side has played out its last frame the other finishes alone;
    // the catch-up rule only binds while both sides still advance
    let left_final = pairs.iter().map(|p| p.0).max().unwrap();
    let right_final = pairs.iter().map(|p| p.1).max().unwrap();
    for window in pairs.windows(2) {
        let (al, ar) = window[0];
        let (bl, br) = window[1];
        if al == left_final || ar == right_final {
            continue;
        }
        if (al - ar).abs() > tolerance {
            // out of tolerance: only the lagging side may move
            if al < ar {
                assert_eq!(ar, br, "leading right side advanced during catch-up");
                assert!(bl > al, "lagging left side failed to advance");
            } else {
                assert_eq!(al, bl, "leading left side advanced during catch-up");
                assert!(br > ar, "lagging right side failed to advance");
            }
        }
    }
    // the gap eventually closes and stays closed
    let (l, r) = *pairs.last().unwrap();
    assert!((l - r).abs() <= tolerance);
}

// =============================================================================
// Seeking
// =============================================================================

#[test]
fn test_seek_truncates_and_resumes_at_target() {
    let left_source = MockSource::new(100, 20, 0);
    let right_source = MockSource::new(100, 20, 0);
    let left_seeks = left_source.seek_log();
    let right_seeks = right_source.seek_log();

    let mut pipeline = DualStreamPipeline::new(
        fast_config(),
        input(left_source, MockDecoder::new(16, 16)),
        input(right_source, MockDecoder::new(16, 16)),
    );

    let mut script = vec![UserIntent::None; 5];
    script.push(UserIntent::SeekRelative { millis: 400 });
    let mut sink = ScriptedSink::new(script, 60);

    pipeline.run(&mut sink).expect("pipeline runs cleanly");

    // both demuxers saw exactly one forward seek, to the same target
    let left_seeks = left_seeks.lock();
    let right_seeks = right_seeks.lock();
    assert_eq!(left_seeks.len(), 1);
    assert_eq!(&*left_seeks, &*right_seeks);
    let (target_ms, backward) = left_seeks[0];
    assert!(!backward);
    assert!((400..=700).contains(&target_ms));

    // the queues were truncated at the commit: nothing between the pre-seek
    // position and the target was ever presented
    let pairs = sink.presented();
    assert!(pairs
        .iter()
        .all(|&(l, _)| l <= target_ms - 400 + 100 || l >= target_ms));
    // and playback resumed exactly at the target
    assert!(pairs.iter().any(|&(l, r)| l == target_ms && r == target_ms));
}

#[test]
fn test_unreachable_forward_seek_recovers() {
    let left_source = MockSource::new(200, 20, 0).failing_forward_seeks();
    let right_source = MockSource::new(200, 20, 0).failing_forward_seeks();
    let left_seeks = left_source.seek_log();

    let mut pipeline = DualStreamPipeline::new(
        fast_config(),
        input(left_source, MockDecoder::new(16, 16)),
        input(right_source, MockDecoder::new(16, 16)),
    );

    let mut script = vec![UserIntent::None; 4];
    script.push(UserIntent::SeekRelative { millis: 1000 });
    let mut sink = ScriptedSink::new(script, 40);

    pipeline.run(&mut sink).expect("seek failure is recovered");

    // the failed forward seek was followed by a backward restore
    let seeks = left_seeks.lock();
    assert!(seeks.len() >= 2, "expected forward seek plus restore");
    assert!(!seeks[0].1, "first seek must be forward");
    assert!(seeks[1].1, "restore must seek backward");

    // a transient message surfaced, then playback kept going
    assert!(sink.views.iter().any(|v| v.error.is_some()));
    let errors = sink.views.iter().filter(|v| v.error.is_some()).count();
    assert_eq!(errors, 1, "error surfaces exactly once");
    let pairs = sink.presented();
    assert!(pairs.len() > 2, "playback continued after the failed seek");
}

// =============================================================================
// Pause, browse, swap
// =============================================================================

#[test]
fn test_pause_and_browse_history() {
    let mut script = vec![UserIntent::None; 6];
    script.push(UserIntent::TogglePlayback); // pause
    script.push(UserIntent::StepBack);
    script.push(UserIntent::StepBack);
    script.push(UserIntent::StepForward);
    let mut sink = ScriptedSink::new(script, 12);

    let mut pipeline = DualStreamPipeline::new(
        fast_config(),
        simple_input(60, 20, 0),
        simple_input(60, 20, 0),
    );
    pipeline.run(&mut sink).expect("pipeline runs cleanly");

    // two steps back, one forward: cursor ends one behind the live edge
    let last = sink.views.last().expect("views recorded");
    assert_eq!(last.browse_offset, 1);

    // browsing walked to older presented frames without re-decoding
    let offsets: Vec<usize> = sink.views.iter().map(|v| v.browse_offset).collect();
    assert!(offsets.contains(&2));
    let browsing: Vec<&ViewRecord> = sink
        .views
        .iter()
        .filter(|v| v.browse_offset > 0)
        .collect();
    assert!(!browsing.is_empty());
    for view in browsing {
        // a browsed view shows an older pts than the live edge
        let live_ms = sink
            .views
            .iter()
            .filter(|v| v.browse_offset == 0)
            .filter_map(|v| v.left_ms)
            .max()
            .unwrap();
        assert!(view.left_ms.unwrap() < live_ms);
    }
}

#[test]
fn test_swap_sides_exchanges_views() {
    // the sides are distinguishable by frame size
    let left = input(MockSource::new(60, 20, 0), MockDecoder::new(16, 16));
    let right = input(MockSource::new(60, 20, 0), MockDecoder::new(24, 24));

    let mut script = vec![UserIntent::None; 4];
    script.push(UserIntent::SwapSides);
    let mut sink = ScriptedSink::new(script, 10);

    let mut pipeline = DualStreamPipeline::new(fast_config(), left, right);
    pipeline.run(&mut sink).expect("pipeline runs cleanly");

    let widths: Vec<Option<u32>> = sink.views.iter().map(|v| v.left_width).collect();
    assert!(widths.contains(&Some(16)), "left view before the swap");
    assert!(widths.contains(&Some(24)), "right stream shown left after swap");
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn test_decode_error_cancels_whole_pipeline() {
    let left = input(
        MockSource::new(100, 20, 0),
        MockDecoder::new(16, 16).failing_at(5),
    );
    let mut pipeline =
        DualStreamPipeline::new(fast_config(), left, simple_input(100, 20, 0));
    let mut sink = ScriptedSink::idle(200);

    let result = pipeline.run(&mut sink);
    let error = result.expect_err("decoder failure must surface");
    assert!(matches!(error, PipelineError::Decode(_)));
    assert!(!error.is_recoverable());

    // teardown joined every stage thread and closed both sides
    assert_eq!(pipeline.state(Side::Left), StreamState::Closed);
    assert_eq!(pipeline.state(Side::Right), StreamState::Closed);
}

#[test]
fn test_quit_intent_closes_cleanly() {
    let mut pipeline = DualStreamPipeline::new(
        fast_config(),
        simple_input(1000, 20, 0),
        simple_input(1000, 20, 0),
    );
    let mut sink = ScriptedSink::new(vec![UserIntent::None; 3], 4);

    pipeline.run(&mut sink).expect("quit is not an error");
    assert_eq!(pipeline.state(Side::Left), StreamState::Closed);
    assert_eq!(pipeline.state(Side::Right), StreamState::Closed);
}

#[test]
fn test_step_before_start_fails() {
    let mut pipeline = DualStreamPipeline::new(
        fast_config(),
        simple_input(10, 20, 0),
        simple_input(10, 20, 0),
    );
    let mut sink = ScriptedSink::idle(10);
    let result = pipeline.step(&mut sink);
    assert!(matches!(result, Err(PipelineError::NotRunning)));
}
