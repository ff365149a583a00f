//! Row-parallel frame comparison.
//!
//! A cheap display aid, not a quality metric: the mean absolute luma
//! difference between the two presented frames, computed row-parallel on the
//! worker pool and folded into an order-statistics window so the sink can
//! show how the difference is trending.

use lockstep_core::{Frame, OrderStatWindow};
use lockstep_parallel::WorkerPool;
use std::sync::atomic::{AtomicU64, Ordering};

/// Sliding statistics over recent per-frame difference scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferenceStats {
    /// Smallest score in the window.
    pub min: f64,
    /// Median score in the window.
    pub median: f64,
    /// Largest score in the window.
    pub max: f64,
    /// Mean score over the window.
    pub average: f64,
}

/// Per-frame difference scoring with a bounded statistics window.
#[derive(Debug)]
pub struct FrameAnalyzer {
    window: OrderStatWindow<f64>,
    chunk_rows: usize,
}

impl FrameAnalyzer {
    /// Create an analyzer keeping the most recent `window_len` scores and
    /// claiming `chunk_rows` rows per dynamic work unit.
    pub fn new(window_len: usize, chunk_rows: usize) -> Self {
        Self {
            window: OrderStatWindow::new(window_len),
            chunk_rows: chunk_rows.max(1),
        }
    }

    /// Score a presented pair and fold the score into the window.
    ///
    /// Returns `None` without scoring when the frames have no comparable
    /// luma planes (size or format mismatch).
    pub fn record(&mut self, pool: &WorkerPool, left: &Frame, right: &Frame) -> Option<f64> {
        let score = luma_difference(pool, self.chunk_rows, left, right)?;
        self.window.push_back(score);
        Some(score)
    }

    /// Current window statistics, `None` before the first score.
    pub fn stats(&self) -> Option<DifferenceStats> {
        Some(DifferenceStats {
            min: *self.window.min().ok()?,
            median: *self.window.median().ok()?,
            max: *self.window.max().ok()?,
            average: self.window.average(),
        })
    }

    /// Number of scores currently in the window.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Check if no scores were recorded yet.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

/// Mean absolute difference of the luma planes, `0..=255`.
///
/// Rows are claimed dynamically off the pool's shared cursor; each worker
/// accumulates into its own slot so the hot loop never contends.
fn luma_difference(
    pool: &WorkerPool,
    chunk_rows: usize,
    left: &Frame,
    right: &Frame,
) -> Option<f64> {
    if left.width() != right.width() || left.height() != right.height() {
        return None;
    }
    let left_plane = left.plane(0)?;
    let right_plane = right.plane(0)?;
    let left_stride = left.stride(0);
    let right_stride = right.stride(0);
    let width = left.width() as usize;
    let height = left.height() as usize;
    if width == 0 || height == 0 {
        return None;
    }

    let partials: Vec<AtomicU64> = (0..pool.thread_count()).map(|_| AtomicU64::new(0)).collect();
    pool.run_dynamic_indexed(height, chunk_rows, |rank, start, end| {
        let mut acc = 0u64;
        for row in start..end {
            let l = &left_plane[row * left_stride..row * left_stride + width];
            let r = &right_plane[row * right_stride..row * right_stride + width];
            for (a, b) in l.iter().zip(r.iter()) {
                acc += u64::from(a.abs_diff(*b));
            }
        }
        partials[rank].fetch_add(acc, Ordering::Relaxed);
    });

    let total: u64 = partials.iter().map(|p| p.load(Ordering::Relaxed)).sum();
    Some(total as f64 / (width * height) as f64)
}
