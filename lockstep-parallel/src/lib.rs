//! # Lockstep Parallel
//!
//! A fixed-size, reusable worker pool for row-oriented per-frame work.
//!
//! Worker threads are spawned once and parked between jobs; a job splits
//! `[0, total)` either statically into even contiguous ranges or dynamically
//! via chunk claiming from a shared cursor. Submission blocks until every
//! participating worker has finished, so borrowed job data stays valid for
//! exactly the duration of the call.

pub mod config;
pub mod pool;

pub use config::PoolConfig;
pub use pool::WorkerPool;
