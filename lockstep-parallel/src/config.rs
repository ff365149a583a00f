//! Worker pool configuration.

use serde::{Deserialize, Serialize};

/// Configuration for a [`WorkerPool`](crate::WorkerPool).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of worker threads (0 = one per available hardware thread).
    pub num_threads: usize,
    /// Default row chunk size for dynamic jobs.
    pub chunk_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            chunk_size: 16,
        }
    }
}

impl PoolConfig {
    /// Create a configuration with an explicit thread count.
    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads,
            ..Default::default()
        }
    }

    /// The thread count a pool built from this configuration will use.
    pub fn effective_threads(&self) -> usize {
        if self.num_threads == 0 {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(1)
        } else {
            self.num_threads
        }
        .max(1)
    }
}
