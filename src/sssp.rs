//! Parallel single-source shortest paths over a [`MultiQueue`] work bag.
//!
//! Workers run Dijkstra-style relaxations: pop a `(distance, node)` pair,
//! discard it if stale, otherwise relax the node's out-edges with a
//! CAS-decrease on the shared distance array and push every improved target
//! back into the queue. The relaxed pop order is harmless because distances
//! only ever decrease and stale entries are skipped.
//!
//! Termination is detected cooperatively. A worker that misses repeatedly
//! first *probes* (thorough scan of the whole queue array), then goes
//! *idle*. The global idle counter sums one per prober and two per idler;
//! when it reaches `2 * num_threads` every worker is idle with a certified
//! empty queue and the computation is done. A worker that produces new work
//! while others are idle wakes them before the counter can fill up.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::coordination::{Context, ThreadCoordinator};
use crate::graph::{Graph, UNREACHED};
use crate::heap::Element;
use crate::multiqueue::{Handle, MultiQueue};

const ACTIVE: u32 = 0;
const PROBING: u32 = 1;
const IDLE: u32 = 2;
const WAKEUP: u32 = 3;

/// Pop retries (with yields) before a worker enters the probing state.
const POP_RETRIES: usize = 400;

/// One tentative distance, padded to two cache lines; neighbors of a hot
/// node would otherwise share lines under heavy relaxation traffic.
#[repr(align(128))]
struct Distance {
    value: AtomicU32,
}

#[repr(align(128))]
struct IdleSlot {
    state: AtomicU32,
}

#[repr(align(128))]
struct PaddedCounter {
    value: AtomicUsize,
}

struct ProtocolState {
    idle_slots: Box<[IdleSlot]>,
    idle_counter: PaddedCounter,
    num_processed: AtomicUsize,
}

impl ProtocolState {
    fn new(num_threads: usize) -> Self {
        Self {
            idle_slots: (0..num_threads)
                .map(|_| IdleSlot {
                    state: AtomicU32::new(ACTIVE),
                })
                .collect(),
            idle_counter: PaddedCounter {
                value: AtomicUsize::new(0),
            },
            num_processed: AtomicUsize::new(0),
        }
    }
}

enum Miss {
    Found(Element),
    Retry,
    Terminate,
}

#[derive(Debug)]
pub struct SsspResult {
    pub time: Duration,
    pub processed_nodes: usize,
    /// Equals `2 * num_threads` after a clean termination.
    pub final_idle_counter: usize,
}

/// One shortest-path computation. Create a fresh engine per run; the
/// distance array is initialized once at construction.
pub struct SsspEngine<'g> {
    graph: &'g Graph,
    distances: Box<[Distance]>,
}

impl<'g> SsspEngine<'g> {
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            distances: (0..graph.num_nodes())
                .map(|_| Distance {
                    value: AtomicU32::new(UNREACHED),
                })
                .collect(),
        }
    }

    pub fn distance(&self, node: u32) -> u32 {
        self.distances[node as usize].value.load(Ordering::Relaxed)
    }

    pub fn distances(&self) -> Vec<u32> {
        self.distances
            .iter()
            .map(|d| d.value.load(Ordering::Relaxed))
            .collect()
    }

    /// Runs the computation on `num_threads` pinned workers and returns
    /// wall time, processed-node count, and the final idle counter.
    pub fn run(&self, pq: &MultiQueue, source: u32, num_threads: usize) -> SsspResult {
        let state = ProtocolState::new(num_threads);
        let coordinator = ThreadCoordinator::new(num_threads);
        let started = coordinator.run(
            |ctx| self.worker(&ctx, pq, source, &state),
            |c| {
                c.wait_until_notified();
                let started = Instant::now();
                c.start();
                started
            },
        );
        SsspResult {
            time: started.elapsed(),
            processed_nodes: state.num_processed.load(Ordering::Relaxed),
            final_idle_counter: state.idle_counter.value.load(Ordering::Relaxed),
        }
    }

    fn worker(&self, ctx: &Context<'_>, pq: &MultiQueue, source: u32, state: &ProtocolState) {
        let mut handle = pq.get_handle(ctx.id());
        let mut local_processed = 0usize;
        if ctx.is_main() {
            self.distances[source as usize]
                .value
                .store(0, Ordering::Relaxed);
            handle.push((0, u64::from(source)));
        }
        ctx.synchronize(|| {
            eprintln!("Calculating shortest paths...");
            ctx.notify_coordinator();
        });
        ctx.wait_for_start();
        loop {
            let element = match handle.try_pop() {
                Some(element) => element,
                None => match self.handle_miss(&mut handle, ctx, state) {
                    Miss::Found(element) => element,
                    Miss::Retry => continue,
                    Miss::Terminate => break,
                },
            };
            self.process(element, &mut handle, ctx, state, &mut local_processed);
        }
        state
            .num_processed
            .fetch_add(local_processed, Ordering::Relaxed);
    }

    fn process(
        &self,
        (key, value): Element,
        handle: &mut Handle<'_>,
        ctx: &Context<'_>,
        state: &ProtocolState,
        local_processed: &mut usize,
    ) {
        let node = value as u32;
        let current = self.distances[node as usize].value.load(Ordering::Relaxed);
        if key > u64::from(current) {
            // Stale entry; the node was reopened with a smaller distance.
            return;
        }
        *local_processed += 1;
        let mut pushed = false;
        for edge in self.graph.outgoing(node) {
            let candidate = current.saturating_add(edge.weight);
            if candidate >= UNREACHED {
                continue;
            }
            let cell = &self.distances[edge.target as usize].value;
            let mut observed = cell.load(Ordering::Relaxed);
            while observed > candidate {
                match cell.compare_exchange_weak(
                    observed,
                    candidate,
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        handle.push((u64::from(candidate), u64::from(edge.target)));
                        pushed = true;
                        break;
                    }
                    Err(now) => observed = now,
                }
            }
        }
        if pushed && state.idle_counter.value.load(Ordering::Acquire) > 0 {
            self.wake_idle_workers(ctx.id(), state);
        }
    }

    fn handle_miss(
        &self,
        handle: &mut Handle<'_>,
        ctx: &Context<'_>,
        state: &ProtocolState,
    ) -> Miss {
        for _ in 0..POP_RETRIES {
            if let Some(element) = handle.try_pop() {
                return Miss::Found(element);
            }
            std::thread::yield_now();
        }
        let id = ctx.id();
        state.idle_slots[id].state.store(PROBING, Ordering::Release);
        state.idle_counter.value.fetch_add(1, Ordering::Release);
        if let Some(element) = handle.extract_from_partition() {
            state.idle_counter.value.fetch_sub(1, Ordering::Release);
            state.idle_slots[id].state.store(ACTIVE, Ordering::Release);
            return Miss::Found(element);
        }
        if self.idle(id, ctx.num_threads(), state) {
            Miss::Terminate
        } else {
            Miss::Retry
        }
    }

    /// Second half of the two-step idle transition; the worker now
    /// contributes 2 to the counter. Returns true when the whole
    /// computation has terminated.
    fn idle(&self, id: usize, num_threads: usize, state: &ProtocolState) -> bool {
        state.idle_slots[id].state.store(IDLE, Ordering::Release);
        state.idle_counter.value.fetch_add(1, Ordering::Release);
        loop {
            if state.idle_counter.value.load(Ordering::Acquire) == 2 * num_threads {
                return true;
            }
            if state.idle_slots[id].state.load(Ordering::Acquire) == ACTIVE {
                return false;
            }
            std::thread::yield_now();
        }
    }

    /// Releases every idle worker. A worker observed probing is waited out;
    /// it will either find work itself or settle into idle and get the
    /// wakeup here.
    fn wake_idle_workers(&self, own_id: usize, state: &ProtocolState) {
        for (i, slot) in state.idle_slots.iter().enumerate() {
            if i == own_id {
                continue;
            }
            let observed = loop {
                match slot.state.compare_exchange_weak(
                    IDLE,
                    WAKEUP,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break IDLE,
                    Err(seen) if seen == ACTIVE || seen == WAKEUP => break seen,
                    Err(_) => std::thread::yield_now(),
                }
            };
            if observed == IDLE {
                state.idle_counter.value.fetch_sub(2, Ordering::Release);
                slot.state.store(ACTIVE, Ordering::Release);
            }
        }
    }
}
