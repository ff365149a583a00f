//! # Lockstep Core
//!
//! Core building blocks for the lockstep media pipeline:
//! - Error handling types
//! - Timestamp and time base arithmetic
//! - Frame and packet value types
//! - Fixed-capacity ring buffer
//! - Order-statistics sliding window
//! - Weight-bounded blocking queue

pub mod error;
pub mod frame;
pub mod packet;
pub mod queue;
pub mod rational;
pub mod ring;
pub mod timestamp;
pub mod window;

pub use error::{Error, Result};
pub use frame::{Frame, FrameBuffer, FrameFlags, PixelFormat};
pub use packet::{Packet, PacketFlags};
pub use queue::{BoundedQueue, PopResult};
pub use rational::Rational;
pub use ring::RingBuffer;
pub use timestamp::{Duration, TimeBase, Timestamp};
pub use window::{OrderStatWindow, WindowItem};
