//! Presented-frame history and browsing.
//!
//! Every frame the presentation loop shows is pushed to the front of a
//! bounded ring, newest first. A browse cursor lets the caller step backward
//! and forward through what was already decoded without touching the
//! decoders; recording a new live frame snaps the cursor back to the edge.

use lockstep_core::{Frame, RingBuffer, Timestamp};
use serde::{Deserialize, Serialize};

/// History configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of presented frames kept browsable per side.
    pub depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { depth: 32 }
    }
}

/// A frame as it was presented, with its position.
#[derive(Debug, Clone)]
pub struct PresentedFrame {
    /// The presented frame.
    pub frame: Frame,
    /// Its presentation timestamp.
    pub pts: Timestamp,
}

/// Bounded newest-first history of presented frames with a browse cursor.
#[derive(Debug)]
pub struct FrameHistory {
    ring: RingBuffer<PresentedFrame>,
    /// Steps back from the live edge; 0 is the most recent frame.
    cursor: usize,
}

impl FrameHistory {
    /// Create a history keeping at most `depth` frames.
    pub fn new(depth: usize) -> Self {
        Self {
            ring: RingBuffer::new(depth),
            cursor: 0,
        }
    }

    /// Record a newly presented frame; the oldest entry falls out when the
    /// ring is full. Snaps the browse cursor to the live edge.
    pub fn record(&mut self, frame: Frame) {
        let pts = frame.pts;
        self.ring.push_front(PresentedFrame { frame, pts });
        self.cursor = 0;
    }

    /// The frame under the browse cursor.
    pub fn current(&self) -> Option<&PresentedFrame> {
        self.ring.get(self.cursor)
    }

    /// Move one frame further into the past. Returns `false` at the oldest
    /// retained frame.
    pub fn step_back(&mut self) -> bool {
        if self.cursor + 1 < self.ring.len() {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    /// Move one frame toward the live edge. Returns `false` when already
    /// there.
    pub fn step_forward(&mut self) -> bool {
        if self.cursor > 0 {
            self.cursor -= 1;
            true
        } else {
            false
        }
    }

    /// Check if the cursor sits at the live edge.
    pub fn is_live(&self) -> bool {
        self.cursor == 0
    }

    /// Current cursor offset from the live edge.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Number of retained frames.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Check if nothing was presented yet.
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Drop all retained frames.
    pub fn clear(&mut self) {
        self.ring.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockstep_core::PixelFormat;

    fn frame_at(millis: i64) -> Frame {
        Frame::new(4, 4, PixelFormat::Gray8).with_pts(Timestamp::from_millis(millis))
    }

    #[test]
    fn test_newest_first() {
        let mut history = FrameHistory::new(4);
        history.record(frame_at(0));
        history.record(frame_at(40));
        assert_eq!(
            history.current().map(|p| p.pts),
            Some(Timestamp::from_millis(40))
        );
    }

    #[test]
    fn test_overflow_discards_oldest() {
        let mut history = FrameHistory::new(2);
        history.record(frame_at(0));
        history.record(frame_at(40));
        history.record(frame_at(80));
        assert_eq!(history.len(), 2);
        assert!(history.step_back());
        assert_eq!(
            history.current().map(|p| p.pts),
            Some(Timestamp::from_millis(40))
        );
    }

    #[test]
    fn test_cursor_clamps_at_both_ends() {
        let mut history = FrameHistory::new(4);
        history.record(frame_at(0));
        history.record(frame_at(40));
        assert!(!history.step_forward()); // already live
        assert!(history.step_back());
        assert!(!history.step_back()); // oldest retained
        assert_eq!(history.cursor(), 1);
        assert!(history.step_forward());
        assert!(history.is_live());
    }

    #[test]
    fn test_record_snaps_cursor_to_live() {
        let mut history = FrameHistory::new(4);
        history.record(frame_at(0));
        history.record(frame_at(40));
        history.step_back();
        history.record(frame_at(80));
        assert!(history.is_live());
        assert_eq!(
            history.current().map(|p| p.pts),
            Some(Timestamp::from_millis(80))
        );
    }

    #[test]
    fn test_empty_history() {
        let mut history = FrameHistory::new(4);
        assert!(history.current().is_none());
        assert!(!history.step_back());
        assert!(!history.step_forward());
        assert!(history.is_empty());
    }
}
