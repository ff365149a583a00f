//! Weight-bounded blocking queue.
//!
//! The backpressure edge between pipeline stages. Each entry carries a
//! caller-supplied weight (bytes, typically), and the queue blocks producers
//! while the total weight would exceed the limit. End of stream is graceful:
//! `mark_finished` lets consumers drain what remains; `mark_quit` is the hard
//! cancel that wakes every waiter immediately and is terminal.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Outcome of a bounded-wait pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopResult<T> {
    /// An item was dequeued.
    Item(T),
    /// The wait expired with nothing available.
    TimedOut,
    /// The queue is empty and no more items will arrive.
    Finished,
    /// The queue was cancelled.
    Quit,
}

struct Shared<T> {
    items: VecDeque<(T, usize)>,
    total_weight: usize,
    finished: bool,
    quit: bool,
}

/// Thread-safe FIFO bounded by total entry weight.
pub struct BoundedQueue<T> {
    shared: Mutex<Shared<T>>,
    limit: usize,
    /// Producers wait here for weight headroom.
    space: Condvar,
    /// Consumers wait here for items.
    avail: Condvar,
}

impl<T> BoundedQueue<T> {
    /// Create a queue admitting entries up to `limit` total weight.
    pub fn new(limit: usize) -> Self {
        Self {
            shared: Mutex::new(Shared {
                items: VecDeque::new(),
                total_weight: 0,
                finished: false,
                quit: false,
            }),
            limit,
            space: Condvar::new(),
            avail: Condvar::new(),
        }
    }

    /// Enqueue an item, blocking while admission would exceed the weight
    /// limit.
    ///
    /// Returns `false` without enqueuing once the queue is finished or quit.
    pub fn push(&self, item: T, weight: usize) -> bool {
        let mut shared = self.shared.lock();
        loop {
            if shared.quit || shared.finished {
                return false;
            }
            if shared.total_weight + weight <= self.limit {
                break;
            }
            self.space.wait(&mut shared);
        }
        shared.items.push_back((item, weight));
        shared.total_weight += weight;
        self.avail.notify_one();
        true
    }

    /// Dequeue an item, blocking while the queue is empty.
    ///
    /// Returns `None` once the queue is quit, or when it is empty and
    /// finished (remaining items always drain first).
    pub fn pop(&self) -> Option<T> {
        let mut shared = self.shared.lock();
        loop {
            if shared.quit {
                return None;
            }
            if let Some((item, weight)) = shared.items.pop_front() {
                shared.total_weight -= weight;
                self.space.notify_one();
                return Some(item);
            }
            if shared.finished {
                return None;
            }
            self.avail.wait(&mut shared);
        }
    }

    /// Dequeue an item, waiting at most `timeout`.
    pub fn pop_for(&self, timeout: Duration) -> PopResult<T> {
        let mut shared = self.shared.lock();
        loop {
            if shared.quit {
                return PopResult::Quit;
            }
            if let Some((item, weight)) = shared.items.pop_front() {
                shared.total_weight -= weight;
                self.space.notify_one();
                return PopResult::Item(item);
            }
            if shared.finished {
                return PopResult::Finished;
            }
            if self.avail.wait_for(&mut shared, timeout).timed_out() {
                return PopResult::TimedOut;
            }
        }
    }

    /// Dequeue an item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        let mut shared = self.shared.lock();
        let (item, weight) = shared.items.pop_front()?;
        shared.total_weight -= weight;
        self.space.notify_one();
        Some(item)
    }

    /// Signal that no more items will be produced; consumers drain the
    /// remainder and then observe end-of-stream instead of blocking.
    pub fn mark_finished(&self) {
        let mut shared = self.shared.lock();
        shared.finished = true;
        self.avail.notify_all();
        self.space.notify_all();
    }

    /// Cancel the queue, waking every waiter. Terminal and idempotent.
    pub fn mark_quit(&self) {
        let mut shared = self.shared.lock();
        shared.quit = true;
        self.avail.notify_all();
        self.space.notify_all();
    }

    /// Discard all queued items and reopen the stream for new production.
    ///
    /// Used when a seek commits: buffered data belongs to the old position
    /// and an exhausted stream may become live again. `quit` stays set.
    pub fn reset(&self) {
        let mut shared = self.shared.lock();
        shared.items.clear();
        shared.total_weight = 0;
        shared.finished = false;
        self.space.notify_all();
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    /// Check if no items are queued.
    pub fn is_empty(&self) -> bool {
        self.shared.lock().items.is_empty()
    }

    /// Total weight of queued items.
    pub fn total_weight(&self) -> usize {
        self.shared.lock().total_weight
    }

    /// The weight limit.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Check if the producer marked end of stream.
    pub fn is_finished(&self) -> bool {
        self.shared.lock().finished
    }

    /// Check if the queue was cancelled.
    pub fn is_quit(&self) -> bool {
        self.shared.lock().quit
    }
}
