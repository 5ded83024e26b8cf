//! Benchmark harness for relaxed concurrent priority queues.
//!
//! The core is the [`MultiQueue`], a relaxed concurrent priority queue built
//! from many try-locked sequential heaps. Around it sit a thread
//! coordinator for reproducible measured phases, a parallel single-source
//! shortest-path engine that uses the queue as its work bag, and workload
//! generators for the throughput and stress drivers.

pub mod coordination;
pub mod error;
pub mod graph;
pub mod heap;
pub mod multiqueue;
pub mod rng;
pub mod sssp;
pub mod workload;

pub use coordination::{Context, ThreadCoordinator};
pub use error::BenchError;
pub use graph::Graph;
pub use multiqueue::{Config, Handle, MultiQueue, EMPTY_KEY, GUARD_KEY, MAX_USER_KEY};
pub use sssp::SsspEngine;

/// Contract every queue implementation offers to the drivers. Alternative
/// queues (k-LSM, CAPQ, Linden, spray list wrappers) plug in here without
/// touching the benchmarks.
pub trait ConcurrentPriorityQueue: Sync {
    type Handle<'a>: QueueHandle
    where
        Self: 'a;

    /// Per-worker access object. A handle is owned by exactly one worker
    /// thread for the duration of a phase.
    fn get_handle(&self, thread_id: usize) -> Self::Handle<'_>;
}

/// Operations a worker performs through its handle.
pub trait QueueHandle {
    /// Inserts a `(key, value)` pair. Cannot fail.
    fn push(&mut self, element: (u64, u64));

    /// Removes some pair near the current minimum, or returns `None` after
    /// observing the queue empty.
    fn try_pop(&mut self) -> Option<(u64, u64)>;
}
