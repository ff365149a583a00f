//! Reusable worker pool executing row-range jobs.

use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

use crate::config::PoolConfig;

/// Type-erased job entry point: `(data, worker_rank, start, end)`.
type JobFn = unsafe fn(*const (), usize, usize, usize);

/// One submitted job, shared with the workers for the duration of the call.
struct Job {
    data: *const (),
    call: JobFn,
    total: usize,
    /// Chunk size for dynamic partitioning; 0 selects the static even split.
    chunk: usize,
    /// Workers taking part; ranks at or above this sit the job out.
    participants: usize,
    /// Sequence number so idle workers can tell a new job from one they
    /// already ran.
    seq: u64,
}

// The submitting thread owns the closure behind `data` and blocks on the
// completion barrier before returning, so the pointer outlives every use.
unsafe impl Send for Job {}

struct State {
    job: Option<Job>,
    /// Participating workers that have not yet finished the current job.
    running: usize,
    /// First panic payload captured from a job callback.
    panic: Option<Box<dyn Any + Send>>,
    next_seq: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    /// Workers park here between jobs.
    job_ready: Condvar,
    /// The submitter parks here until the barrier empties.
    job_done: Condvar,
    /// Next unclaimed unit for dynamic jobs.
    cursor: AtomicUsize,
}

/// Fixed-size pool of reusable worker threads for row-range jobs.
///
/// Threads are created once and parked between jobs; only dropping the pool
/// joins them. Jobs are submitted through `&self`: all mutable bookkeeping
/// lives behind the pool's own lock.
pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Create a pool with one worker per available hardware thread.
    pub fn new() -> Self {
        Self::with_config(&PoolConfig::default())
    }

    /// Create a pool with an explicit worker count (minimum 1).
    pub fn with_threads(num_threads: usize) -> Self {
        Self::with_config(&PoolConfig::with_threads(num_threads))
    }

    /// Create a pool from a configuration.
    pub fn with_config(config: &PoolConfig) -> Self {
        let count = config.effective_threads();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                job: None,
                running: 0,
                panic: None,
                next_seq: 1,
                shutdown: false,
            }),
            job_ready: Condvar::new(),
            job_done: Condvar::new(),
            cursor: AtomicUsize::new(0),
        });

        let workers = (0..count)
            .map(|rank| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("lockstep-worker-{rank}"))
                    .spawn(move || worker_loop(&shared, rank))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        debug!(threads = count, "worker pool started");
        Self { shared, workers }
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Split `[0, total)` into `min(threads, total)` contiguous ranges of
    /// near-equal size and run `f(start, end)` on each from its own worker.
    ///
    /// Blocks until every participating range has completed. Workers beyond
    /// `min(threads, total)` sit this job out.
    pub fn run_static<F>(&self, total: usize, f: F)
    where
        F: Fn(usize, usize) + Sync,
    {
        self.submit(total, 0, &|_rank, start, end| f(start, end));
    }

    /// Like [`run_static`](Self::run_static), additionally passing the
    /// worker's rank as the first callback argument.
    pub fn run_static_indexed<F>(&self, total: usize, f: F)
    where
        F: Fn(usize, usize, usize) + Sync,
    {
        self.submit(total, 0, &f);
    }

    /// Workers repeatedly claim `chunk`-sized ranges of `[0, total)` from a
    /// shared cursor until it is exhausted, running `f(start, end)` on each.
    ///
    /// Load-balances uneven per-row cost; every index is visited exactly
    /// once. Blocks until the cursor is drained and all claims finished.
    pub fn run_dynamic<F>(&self, total: usize, chunk: usize, f: F)
    where
        F: Fn(usize, usize) + Sync,
    {
        self.submit(total, chunk.max(1), &|_rank, start, end| f(start, end));
    }

    /// Like [`run_dynamic`](Self::run_dynamic), additionally passing the
    /// worker's rank as the first callback argument.
    pub fn run_dynamic_indexed<F>(&self, total: usize, chunk: usize, f: F)
    where
        F: Fn(usize, usize, usize) + Sync,
    {
        self.submit(total, chunk.max(1), &f);
    }

    fn submit<F>(&self, total: usize, chunk: usize, f: &F)
    where
        F: Fn(usize, usize, usize) + Sync,
    {
        /// Monomorphic trampoline recovering the closure from the erased
        /// pointer.
        unsafe fn call<F: Fn(usize, usize, usize) + Sync>(
            data: *const (),
            rank: usize,
            start: usize,
            end: usize,
        ) {
            let f = unsafe { &*(data.cast::<F>()) };
            f(rank, start, end);
        }

        if total == 0 {
            return;
        }
        let participants = if chunk == 0 {
            self.workers.len().min(total)
        } else {
            self.workers.len()
        };

        let mut state = self.shared.state.lock();
        // single submitter in normal use; serialize just in case
        while state.job.is_some() {
            self.shared.job_done.wait(&mut state);
        }

        self.shared.cursor.store(0, Ordering::Relaxed);
        let seq = state.next_seq;
        state.next_seq += 1;
        state.job = Some(Job {
            data: (f as *const F).cast(),
            call: call::<F>,
            total,
            chunk,
            participants,
            seq,
        });
        state.running = participants;
        self.shared.job_ready.notify_all();

        while state.running > 0 {
            self.shared.job_done.wait(&mut state);
        }
        state.job = None;
        let payload = state.panic.take();
        drop(state);
        self.shared.job_done.notify_all();

        if let Some(payload) = payload {
            panic::resume_unwind(payload);
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.job_ready.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Contiguous range of the static split for one worker.
///
/// Ranges differ in size by at most one; earlier workers absorb the
/// remainder.
fn static_range(total: usize, participants: usize, rank: usize) -> (usize, usize) {
    let base = total / participants;
    let extra = total % participants;
    let start = rank * base + rank.min(extra);
    let len = base + usize::from(rank < extra);
    (start, start + len)
}

fn worker_loop(shared: &Shared, rank: usize) {
    let mut last_seq = 0u64;
    loop {
        let (data, call, total, chunk, participants, seq) = {
            let mut state = shared.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                match &state.job {
                    Some(job) if job.seq != last_seq => {
                        break (
                            job.data,
                            job.call,
                            job.total,
                            job.chunk,
                            job.participants,
                            job.seq,
                        )
                    }
                    _ => shared.job_ready.wait(&mut state),
                }
            }
        };
        last_seq = seq;
        if rank >= participants {
            // fewer work items than workers: this one sits the job out
            continue;
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            if chunk == 0 {
                let (start, end) = static_range(total, participants, rank);
                if start < end {
                    unsafe { call(data, rank, start, end) };
                }
            } else {
                loop {
                    let start = shared.cursor.fetch_add(chunk, Ordering::Relaxed);
                    if start >= total {
                        break;
                    }
                    let end = (start + chunk).min(total);
                    unsafe { call(data, rank, start, end) };
                }
            }
        }));

        let mut state = shared.state.lock();
        if let Err(payload) = result {
            if state.panic.is_none() {
                state.panic = Some(payload);
            }
        }
        state.running -= 1;
        if state.running == 0 {
            shared.job_done.notify_all();
        }
    }
}
