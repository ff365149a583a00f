//! Collaborator interfaces at the pipeline boundary.
//!
//! Demultiplexing, decoding, pixel conversion, and presentation are external
//! concerns. The pipeline talks to them through these traits and owns none
//! of their implementation.

use crate::analysis::DifferenceStats;
use crate::error::{Result, SeekError};
use lockstep_core::{Frame, Packet, TimeBase, Timestamp};

/// Demuxer side of an acquire stage: a packet stream with seeking.
pub trait PacketSource: Send {
    /// Read the next packet, `None` at end of stream.
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Seek to the target time. `backward` selects the nearest preceding
    /// sync point instead of the nearest following one.
    fn seek(&mut self, target: Timestamp, backward: bool) -> std::result::Result<(), SeekError>;

    /// Time base of the selected stream.
    fn time_base(&self) -> TimeBase;

    /// Index of the selected stream within the container.
    fn stream_index(&self) -> u32;
}

/// Decoder side of a decode stage.
pub trait FrameDecoder: Send {
    /// Feed a packet. `false` means the decoder is congested: drain frames
    /// with [`receive`](Self::receive) and send the same packet again.
    fn send(&mut self, packet: &Packet) -> Result<bool>;

    /// Drain one decoded frame if available.
    fn receive(&mut self) -> Result<Option<Frame>>;

    /// Drop all buffered decoder state (used when seeking).
    fn flush(&mut self);
}

/// Pixel-format/colorspace conversion toward the presentation format.
pub trait FrameConverter: Send {
    /// Convert a decoded frame to the presentation format.
    fn convert(&mut self, frame: &Frame) -> Frame;
}

/// What the user asked for on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserIntent {
    /// Nothing.
    #[default]
    None,
    /// Toggle between playing and paused.
    TogglePlayback,
    /// Seek relative to the current position.
    SeekRelative {
        /// Signed offset in milliseconds.
        millis: i64,
    },
    /// Step one presented frame forward within the history.
    StepForward,
    /// Step one presented frame backward within the history.
    StepBack,
    /// Exchange which stream is shown on which side.
    SwapSides,
    /// Tear the pipeline down.
    Quit,
}

/// Snapshot handed to the sink on every refresh.
#[derive(Debug)]
pub struct PresentationView<'a> {
    /// Frame currently shown for the left side, if any.
    pub left: Option<&'a Frame>,
    /// Frame currently shown for the right side, if any.
    pub right: Option<&'a Frame>,
    /// Left side's presentation position.
    pub left_pts: Timestamp,
    /// Right side's presentation position.
    pub right_pts: Timestamp,
    /// How far back from the live edge the browse cursor sits (0 = live).
    pub browse_offset: usize,
    /// Number of browsable frames in the history.
    pub history_len: usize,
    /// Whether the pipeline is advancing.
    pub playing: bool,
    /// Sliding statistics of the per-frame difference score.
    pub difference: Option<DifferenceStats>,
    /// Transient, user-visible error (cleared after one refresh).
    pub error_message: Option<String>,
}

/// Presentation/UI collaborator: input polling and display refresh.
pub trait EventSink {
    /// Collect the user's intent for this tick.
    fn poll_input(&mut self) -> UserIntent;

    /// Present the current state.
    fn refresh(&mut self, view: &PresentationView<'_>);
}
