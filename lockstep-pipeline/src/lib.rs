//! # Lockstep Pipeline
//!
//! Dual-stream synchronized playback: two independent media inputs move
//! through acquire → decode → convert stage threads into bounded queues, and
//! a presentation loop on the caller's thread pops matched frames, corrects
//! PTS drift between the sides, buffers presented frames for browsing, and
//! coordinates barrier-synchronized seeks across all four stage threads.
//!
//! Demuxing, decoding, and pixel conversion are collaborator traits; this
//! crate owns only the orchestration.

mod analysis;
mod error;
mod history;
mod pipeline;
mod seek;
mod source;
mod stage;
mod sync;

pub use analysis::{DifferenceStats, FrameAnalyzer};
pub use error::{PipelineError, Result, SeekError};
pub use history::{FrameHistory, HistoryConfig, PresentedFrame};
pub use pipeline::{
    DualStreamPipeline, PipelineConfig, Side, StreamInput, StreamState,
};
pub use source::{
    EventSink, FrameConverter, FrameDecoder, PacketSource, PresentationView, UserIntent,
};
pub use sync::{drift_action, DriftAction, FrameTimer, SyncConfig};
