//! Drift correction and presentation pacing.
//!
//! Two rules keep the sides in lockstep. The drift rule decides, from the
//! sides' latest presentation timestamps, whether both advance or the lagging
//! side catches up alone. The frame timer paces the together case: it sleeps
//! roughly the leading side's inter-frame delta, with a PID loop absorbing
//! scheduler jitter so the sleep error does not accumulate.

use lockstep_core::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Default drift tolerance: one tick at 60 Hz, in microseconds.
pub const DEFAULT_TOLERANCE_US: i64 = 1_000_000 / 60;

/// Synchronization configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Maximum PTS gap tolerated before single-side catch-up, microseconds.
    pub tolerance_us: i64,
    /// Proportional gain of the pacing loop.
    pub timer_kp: f64,
    /// Integral gain of the pacing loop.
    pub timer_ki: f64,
    /// Derivative gain of the pacing loop.
    pub timer_kd: f64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tolerance_us: DEFAULT_TOLERANCE_US,
            timer_kp: 0.5,
            timer_ki: 0.1,
            timer_kd: 0.05,
        }
    }
}

/// Which stream the next tick should advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftAction {
    /// Both sides are within tolerance; advance together, paced.
    Together,
    /// The left side lags; advance it alone, unpaced.
    AdvanceLeft,
    /// The right side lags; advance it alone, unpaced.
    AdvanceRight,
}

/// Decide which side advances given the sides' latest timestamps.
///
/// A side without a valid timestamp has not presented anything yet and
/// counts as lagging unboundedly: it advances alone until it has a position
/// to compare.
pub fn drift_action(left: Timestamp, right: Timestamp, tolerance_us: i64) -> DriftAction {
    let (left_us, right_us) = match (left.to_micros(), right.to_micros()) {
        (None, None) => return DriftAction::Together,
        (None, Some(_)) => return DriftAction::AdvanceLeft,
        (Some(_), None) => return DriftAction::AdvanceRight,
        (Some(l), Some(r)) => (l, r),
    };
    let gap = left_us - right_us;
    if gap < -tolerance_us {
        DriftAction::AdvanceLeft
    } else if gap > tolerance_us {
        DriftAction::AdvanceRight
    } else {
        DriftAction::Together
    }
}

/// PID-damped frame pacing timer.
///
/// Owned by the pipeline and passed into the presentation loop; holds no
/// global state. `pace` sleeps so that consecutive calls land approximately
/// `target` apart, correcting for the measured error of previous ticks.
#[derive(Debug)]
pub struct FrameTimer {
    kp: f64,
    ki: f64,
    kd: f64,
    integral: f64,
    last_error: f64,
    last_target: f64,
    last_tick: Option<Instant>,
}

impl FrameTimer {
    /// Longest sleep one tick will take, seconds.
    const MAX_SLEEP_S: f64 = 0.25;
    /// Integral windup clamp, seconds.
    const MAX_INTEGRAL_S: f64 = 0.5;

    /// Create a timer from the sync configuration.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            kp: config.timer_kp,
            ki: config.timer_ki,
            kd: config.timer_kd,
            integral: 0.0,
            last_error: 0.0,
            last_target: 0.0,
            last_tick: None,
        }
    }

    /// Sleep toward the next presentation instant.
    pub fn pace(&mut self, target: Duration) {
        let target_s = target.as_secs_f64().min(Self::MAX_SLEEP_S);
        let now = Instant::now();

        let adjust = match self.last_tick {
            None => 0.0,
            Some(last) => {
                // positive error: the previous tick ran long
                let error = (now - last).as_secs_f64() - self.last_target;
                self.integral =
                    (self.integral + error).clamp(-Self::MAX_INTEGRAL_S, Self::MAX_INTEGRAL_S);
                let derivative = error - self.last_error;
                self.last_error = error;
                -(self.kp * error + self.ki * self.integral + self.kd * derivative)
            }
        };

        let sleep_s = (target_s + adjust).clamp(0.0, Self::MAX_SLEEP_S);
        if sleep_s > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(sleep_s));
        }
        self.last_tick = Some(Instant::now());
        self.last_target = target_s;
    }

    /// Forget accumulated timing state (after a seek or pause).
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.last_tick = None;
        self.last_target = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_together_within_tolerance() {
        let left = Timestamp::from_millis(1000);
        let right = Timestamp::from_millis(1010);
        assert_eq!(
            drift_action(left, right, DEFAULT_TOLERANCE_US),
            DriftAction::Together
        );
    }

    #[test]
    fn test_lagging_left_advances_alone() {
        let left = Timestamp::from_millis(1000);
        let right = Timestamp::from_millis(1050);
        assert_eq!(
            drift_action(left, right, DEFAULT_TOLERANCE_US),
            DriftAction::AdvanceLeft
        );
    }

    #[test]
    fn test_lagging_right_advances_alone() {
        let left = Timestamp::from_millis(1050);
        let right = Timestamp::from_millis(1000);
        assert_eq!(
            drift_action(left, right, DEFAULT_TOLERANCE_US),
            DriftAction::AdvanceRight
        );
    }

    #[test]
    fn test_side_without_position_counts_as_lagging() {
        assert_eq!(
            drift_action(Timestamp::none(), Timestamp::from_millis(1), 0),
            DriftAction::AdvanceLeft
        );
        assert_eq!(
            drift_action(Timestamp::from_millis(1), Timestamp::none(), 0),
            DriftAction::AdvanceRight
        );
        assert_eq!(
            drift_action(Timestamp::none(), Timestamp::none(), 0),
            DriftAction::Together
        );
    }

    #[test]
    fn test_timer_sleeps_roughly_target() {
        let mut timer = FrameTimer::new(&SyncConfig::default());
        let start = Instant::now();
        timer.pace(Duration::from_millis(10));
        timer.pace(Duration::from_millis(10));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(10));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn test_timer_reset_clears_state() {
        let mut timer = FrameTimer::new(&SyncConfig::default());
        timer.pace(Duration::from_millis(1));
        timer.reset();
        assert!(timer.last_tick.is_none());
    }
}
