//! The MultiQueue: a relaxed concurrent priority queue.
//!
//! The queue owns `C * num_threads` sequential d-ary heaps ("local queues"),
//! each guarded by a try-lock and summarized by an atomic top-key cache that
//! can be read without the lock. Operations go through per-worker handles:
//! a push inserts into a randomly chosen (sticky) local queue, a pop samples
//! two top-key caches and extracts from the queue with the smaller minimum.
//! The popped key is therefore near the global minimum in expectation, not
//! necessarily equal to it.
//!
//! Handles additionally buffer recent insertions and deletions and reuse
//! their chosen queue indices for a few operations (stickiness) to cut down
//! on lock traffic and cache misses.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::heap::{DaryHeap, Element};
use crate::rng::Xorshift64;
use crate::{ConcurrentPriorityQueue, QueueHandle};

/// Top-key cache value of an empty local queue. Compares greater than every
/// user key.
pub const EMPTY_KEY: u64 = u64::MAX;
/// Second reserved key, kept out of user workloads so the queue may use it
/// as an internal marker.
pub const GUARD_KEY: u64 = u64::MAX - 1;
/// Largest key a workload may insert.
pub const MAX_USER_KEY: u64 = u64::MAX - 2;

const HEAP_DEGREE: usize = 8;

// Random retries before a push falls back to scanning every queue for an
// unlocked one.
const PUSH_RETRIES: usize = 8;
// Resamples before a pop gives up on sampling and scans instead.
const POP_RETRIES: usize = 64;
// Full passes of the empty protocol before an uncertified scan returns
// empty anyway.
const EMPTY_SCAN_ROUNDS: usize = 16;

/// Tuning knobs of the queue. The relaxation bound depends on `c` and
/// `stickiness` together with the buffer sizes, never on the queue length.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local queues per worker thread.
    pub c: usize,
    /// Operations a handle keeps reusing its chosen queue indices for.
    pub stickiness: u32,
    /// Capacity of the per-handle insertion ring; 0 disables it.
    pub insertion_buffer_size: usize,
    /// Capacity of the per-handle deletion buffer; 0 disables batching.
    pub deletion_buffer_size: usize,
    /// How far the relocked top key may exceed the losing candidate's
    /// observed key before the pop resamples.
    pub pop_slack: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            c: 4,
            stickiness: 8,
            insertion_buffer_size: 16,
            deletion_buffer_size: 16,
            pop_slack: 0,
        }
    }
}

/// One internal priority queue: try-lock, top-key cache, heap.
///
/// Aligned to two cache lines so concurrently written queues never share a
/// line. Invariant: while the lock is free, `top_key` holds the true minimum
/// key of the heap, or `EMPTY_KEY` if the heap is empty.
#[repr(align(128))]
struct LocalQueue {
    lock: AtomicBool,
    top_key: AtomicU64,
    heap: UnsafeCell<DaryHeap<HEAP_DEGREE>>,
}

// The heap is only touched while holding the try-lock.
unsafe impl Sync for LocalQueue {}

impl LocalQueue {
    fn new() -> Self {
        Self {
            lock: AtomicBool::new(false),
            top_key: AtomicU64::new(EMPTY_KEY),
            heap: UnsafeCell::new(DaryHeap::new()),
        }
    }

    #[inline]
    fn top(&self) -> u64 {
        self.top_key.load(Ordering::Acquire)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }

    #[inline]
    fn try_lock(&self) -> Option<QueueGuard<'_>> {
        if self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            Some(QueueGuard { queue: self })
        } else {
            None
        }
    }
}

/// Exclusive access to a locked local queue. Dropping the guard publishes
/// the new top key with release semantics and then frees the lock, so the
/// cache invariant holds whenever the lock is observed free.
struct QueueGuard<'a> {
    queue: &'a LocalQueue,
}

impl QueueGuard<'_> {
    #[inline]
    fn heap(&mut self) -> &mut DaryHeap<HEAP_DEGREE> {
        unsafe { &mut *self.queue.heap.get() }
    }

    #[inline]
    fn min_key(&mut self) -> u64 {
        self.heap().peek().map_or(EMPTY_KEY, |(key, _)| key)
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        let top = self.min_key();
        self.queue.top_key.store(top, Ordering::Release);
        self.queue.lock.store(false, Ordering::Release);
    }
}

/// The relaxed concurrent priority queue.
pub struct MultiQueue {
    queues: Box<[LocalQueue]>,
    config: Config,
    seed: u64,
    num_threads: usize,
}

impl MultiQueue {
    pub fn new(num_threads: usize, seed: u64) -> Self {
        Self::with_config(num_threads, seed, Config::default())
    }

    pub fn with_config(num_threads: usize, seed: u64, config: Config) -> Self {
        assert!(num_threads > 0, "queue needs at least one worker");
        assert!(config.c > 0, "queues-per-thread factor must be positive");
        let num_queues = config.c * num_threads;
        let queues = (0..num_queues).map(|_| LocalQueue::new()).collect();
        Self {
            queues,
            config,
            seed,
            num_threads,
        }
    }

    pub fn num_queues(&self) -> usize {
        self.queues.len()
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Creates the access object for worker `thread_id`. Each call returns a
    /// fresh handle; a handle belongs to exactly one worker and is not
    /// thread-safe itself.
    pub fn get_handle(&self, thread_id: usize) -> Handle<'_> {
        assert!(thread_id < self.num_threads);
        let mut rng = Xorshift64::seeded(self.seed, thread_id as u64);
        let push_idx = rng.next_index(self.queues.len());
        let pop_idx = rng.next_index(self.queues.len());
        Handle {
            mq: self,
            id: thread_id,
            rng,
            stickiness_left: self.config.stickiness,
            push_idx,
            pop_idx,
            insertion_buffer: Vec::with_capacity(self.config.insertion_buffer_size),
            deletion_buffer: Vec::with_capacity(self.config.deletion_buffer_size),
        }
    }
}

impl ConcurrentPriorityQueue for MultiQueue {
    type Handle<'a>
        = Handle<'a>
    where
        Self: 'a;

    fn get_handle(&self, thread_id: usize) -> Handle<'_> {
        MultiQueue::get_handle(self, thread_id)
    }
}

/// Per-worker access object.
///
/// Carries the worker's RNG, the sticky queue indices, and the optional
/// insertion/deletion buffers. Obtained from [`MultiQueue::get_handle`].
pub struct Handle<'a> {
    mq: &'a MultiQueue,
    id: usize,
    rng: Xorshift64,
    stickiness_left: u32,
    push_idx: usize,
    pop_idx: usize,
    // Pending insertions, oldest first.
    insertion_buffer: Vec<Element>,
    // Extracted batch, sorted by key descending so the minimum pops off the
    // end.
    deletion_buffer: Vec<Element>,
}

impl Handle<'_> {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Inserts the pair. Never fails.
    pub fn push(&mut self, element: Element) {
        debug_assert!(element.0 <= MAX_USER_KEY, "reserved sentinel key pushed");
        let capacity = self.mq.config.insertion_buffer_size;
        if capacity > 0 {
            if self.insertion_buffer.len() == capacity {
                self.flush_insertion_buffer();
            }
            self.insertion_buffer.push(element);
        } else {
            self.push_direct(element);
        }
    }

    /// Removes an element with relaxed priority, or certifies the queue
    /// empty.
    pub fn try_pop(&mut self) -> Option<Element> {
        if !self.insertion_buffer.is_empty() {
            self.flush_insertion_buffer();
        }
        if let Some(element) = self.deletion_buffer.pop() {
            return Some(element);
        }
        self.pop_sampled()
    }

    /// Like [`Handle::try_pop`], but scans the whole queue array in a fixed
    /// order instead of sampling. Used to certify emptiness before a worker
    /// declares itself idle: every queue is observed either empty while
    /// unlocked or inspected under its lock.
    pub fn extract_from_partition(&mut self) -> Option<Element> {
        if !self.insertion_buffer.is_empty() {
            self.flush_insertion_buffer();
        }
        if let Some(element) = self.deletion_buffer.pop() {
            return Some(element);
        }
        for queue in self.mq.queues.iter() {
            loop {
                if !queue.is_locked() && queue.top() == EMPTY_KEY {
                    break;
                }
                if let Some(mut guard) = queue.try_lock() {
                    if let Some(element) = guard.heap().pop_min() {
                        self.refill_deletion_buffer(&mut guard);
                        return Some(element);
                    }
                    break;
                }
                std::thread::yield_now();
            }
        }
        None
    }

    fn push_direct(&mut self, element: Element) {
        loop {
            for attempt in 0..PUSH_RETRIES {
                let idx = self.sticky_push_index(attempt > 0);
                if let Some(mut guard) = self.mq.queues[idx].try_lock() {
                    guard.heap().push(element);
                    return;
                }
            }
            // Everything sampled was contended; take the first queue that
            // yields its lock.
            for queue in self.mq.queues.iter() {
                if let Some(mut guard) = queue.try_lock() {
                    guard.heap().push(element);
                    return;
                }
            }
            std::thread::yield_now();
        }
    }

    fn flush_insertion_buffer(&mut self) {
        while !self.insertion_buffer.is_empty() {
            for attempt in 0.. {
                let idx = self.sticky_push_index(attempt > 0);
                if let Some(mut guard) = self.mq.queues[idx].try_lock() {
                    let heap = guard.heap();
                    for element in self.insertion_buffer.drain(..) {
                        heap.push(element);
                    }
                    break;
                }
                if attempt >= PUSH_RETRIES {
                    std::thread::yield_now();
                }
            }
        }
    }

    fn pop_sampled(&mut self) -> Option<Element> {
        let num_queues = self.mq.queues.len();
        for _ in 0..POP_RETRIES {
            let (first, second) = self.pop_candidates(num_queues);
            let key_first = self.mq.queues[first].top();
            let key_second = self.mq.queues[second].top();
            // Ties break towards the lower index.
            let first_wins =
                key_first < key_second || (key_first == key_second && first < second);
            let (winner, winner_key, loser_key) = if first_wins {
                (first, key_first, key_second)
            } else {
                (second, key_second, key_first)
            };
            if winner_key == EMPTY_KEY {
                return self.pop_scan_all();
            }
            if let Some(mut guard) = self.mq.queues[winner].try_lock() {
                let current = guard.min_key();
                if current == EMPTY_KEY {
                    drop(guard);
                    self.refresh_pop_index();
                    continue;
                }
                // The minimum may have been taken while we were locking; if
                // the queue is now clearly worse than the candidate we
                // rejected, try again.
                if current > winner_key
                    && current > loser_key.saturating_add(self.mq.config.pop_slack)
                {
                    drop(guard);
                    self.refresh_pop_index();
                    continue;
                }
                let element = guard.heap().pop_min();
                self.refill_deletion_buffer(&mut guard);
                drop(guard);
                self.pop_idx = winner;
                return element;
            }
            self.refresh_pop_index();
        }
        self.pop_scan_all()
    }

    /// The empty protocol. Repeatedly scans every queue in index order until
    /// one pass either yields an element or observes every queue empty.
    fn pop_scan_all(&mut self) -> Option<Element> {
        for _ in 0..EMPTY_SCAN_ROUNDS {
            let mut certified = true;
            for queue in self.mq.queues.iter() {
                if !queue.is_locked() && queue.top() == EMPTY_KEY {
                    continue;
                }
                match queue.try_lock() {
                    Some(mut guard) => {
                        if let Some(element) = guard.heap().pop_min() {
                            self.refill_deletion_buffer(&mut guard);
                            return Some(element);
                        }
                    }
                    None => certified = false,
                }
            }
            if certified {
                return None;
            }
            std::thread::yield_now();
        }
        None
    }

    fn refill_deletion_buffer(&mut self, guard: &mut QueueGuard<'_>) {
        let capacity = self.mq.config.deletion_buffer_size;
        if capacity == 0 {
            return;
        }
        debug_assert!(self.deletion_buffer.is_empty());
        let heap = guard.heap();
        while self.deletion_buffer.len() < capacity {
            match heap.pop_min() {
                Some(element) => self.deletion_buffer.push(element),
                None => break,
            }
        }
        // pop_min drained in ascending order; keep the minimum at the back.
        self.deletion_buffer.reverse();
    }

    fn sticky_push_index(&mut self, force_refresh: bool) -> usize {
        if force_refresh || self.stickiness_left == 0 {
            self.push_idx = self.rng.next_index(self.mq.queues.len());
            self.stickiness_left = self.mq.config.stickiness;
        }
        self.stickiness_left = self.stickiness_left.saturating_sub(1);
        self.push_idx
    }

    fn refresh_pop_index(&mut self) {
        self.pop_idx = self.rng.next_index(self.mq.queues.len());
        self.stickiness_left = self.mq.config.stickiness;
    }

    /// While sticky, compares the remembered index against one fresh sample;
    /// otherwise draws two distinct fresh indices.
    fn pop_candidates(&mut self, num_queues: usize) -> (usize, usize) {
        if num_queues == 1 {
            return (0, 0);
        }
        if self.stickiness_left > 0 {
            self.stickiness_left -= 1;
            let mut other = self.rng.next_index(num_queues);
            while other == self.pop_idx {
                other = self.rng.next_index(num_queues);
            }
            (self.pop_idx, other)
        } else {
            self.stickiness_left = self.mq.config.stickiness;
            let first = self.rng.next_index(num_queues);
            let mut second = self.rng.next_index(num_queues);
            while second == first {
                second = self.rng.next_index(num_queues);
            }
            self.pop_idx = first;
            (first, second)
        }
    }
}

impl Drop for Handle<'_> {
    // Buffered elements still belong to the queue; hand them back so no
    // element is lost when a worker retires its handle.
    fn drop(&mut self) {
        self.flush_insertion_buffer();
        while let Some(element) = self.deletion_buffer.pop() {
            self.push_direct(element);
        }
    }
}

impl QueueHandle for Handle<'_> {
    fn push(&mut self, element: Element) {
        Handle::push(self, element)
    }

    fn try_pop(&mut self) -> Option<Element> {
        Handle::try_pop(self)
    }
}
