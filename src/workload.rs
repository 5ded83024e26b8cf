//! Workload generation and execution for the throughput and stress drivers.
//!
//! Key streams are generated up front, per worker, from a seed derived from
//! `(global_seed, thread_id)`, so a run is reproducible for a fixed
//! configuration. The execution functions drive a queue handle through the
//! generated stream inside the coordinator's synchronized phases.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::coordination::Context;
use crate::error::BenchError;
use crate::multiqueue::MAX_USER_KEY;
use crate::QueueHandle;

/// Derives the per-worker RNG seed from the global seed.
pub fn thread_seed(seed: u64, thread_id: usize) -> u64 {
    seed.wrapping_mul(0x9E3779B97F4A7C15)
        .wrapping_add(thread_id as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkMode {
    Mixed,
    Split,
}

impl WorkMode {
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'm' => Some(Self::Mixed),
            's' => Some(Self::Split),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Mixed => "mixed",
            Self::Split => "split",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementDistribution {
    Uniform,
    Ascending,
    Descending,
}

impl ElementDistribution {
    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'u' => Some(Self::Uniform),
            'a' => Some(Self::Ascending),
            'd' => Some(Self::Descending),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Ascending => "ascending",
            Self::Descending => "descending",
        }
    }
}

/// Generates worker `thread_id`'s slice of the global key stream.
///
/// Uniform keys come from `rng`; the monotone distributions are pure
/// functions of the global element index, spreading `[min_key, max_key]`
/// evenly over `per_thread * num_threads` elements.
pub fn generate_keys(
    rng: &mut StdRng,
    distribution: ElementDistribution,
    min_key: u64,
    max_key: u64,
    thread_id: usize,
    per_thread: usize,
    num_threads: usize,
) -> Vec<u64> {
    let total = per_thread * num_threads;
    let start = thread_id * per_thread;
    let range = u128::from(max_key - min_key) + 1;
    match distribution {
        ElementDistribution::Uniform => (0..per_thread)
            .map(|_| rng.gen_range(min_key..=max_key))
            .collect(),
        ElementDistribution::Ascending => (start..start + per_thread)
            .map(|i| min_key + (i as u128 * range / total as u128) as u64)
            .collect(),
        ElementDistribution::Descending => (start..start + per_thread)
            .map(|i| min_key + ((total - i - 1) as u128 * range / total as u128) as u64)
            .collect(),
    }
}

/// Prefills the queue with `count` uniform keys inside a synchronized
/// phase.
pub fn prefill<H: QueueHandle>(
    ctx: &Context<'_>,
    handle: &mut H,
    rng: &mut StdRng,
    count: usize,
    min_key: u64,
    max_key: u64,
) {
    ctx.execute_synchronized(|| {
        for _ in 0..count {
            let key = rng.gen_range(min_key..=max_key);
            handle.push((key, key));
        }
    });
}

/// Aggregated outcome of a throughput run, updated concurrently by the
/// workers.
#[derive(Debug)]
pub struct ThroughputResult {
    start_ns: AtomicU64,
    end_ns: AtomicU64,
    num_failed_pops: AtomicU64,
    num_pops: AtomicU64,
}

impl Default for ThroughputResult {
    fn default() -> Self {
        Self {
            start_ns: AtomicU64::new(u64::MAX),
            end_ns: AtomicU64::new(0),
            num_failed_pops: AtomicU64::new(0),
            num_pops: AtomicU64::new(0),
        }
    }
}

impl ThroughputResult {
    /// Folds one worker's `(start, end)` ticks into the envelope.
    pub fn update_work_time(&self, (start, end): (u64, u64)) {
        self.start_ns.fetch_min(start, Ordering::Relaxed);
        self.end_ns.fetch_max(end, Ordering::Relaxed);
    }

    /// Envelope over all workers: earliest start to latest end.
    pub fn work_time(&self) -> Duration {
        let start = self.start_ns.load(Ordering::Relaxed);
        let end = self.end_ns.load(Ordering::Relaxed);
        Duration::from_nanos(end.saturating_sub(start))
    }

    pub fn failed_pops(&self) -> u64 {
        self.num_failed_pops.load(Ordering::Relaxed)
    }

    pub fn pops(&self) -> u64 {
        self.num_pops.load(Ordering::Relaxed)
    }
}

/// Mixed mode: every worker alternates `push(key)` with a pop that retries
/// until it succeeds, over its slice of the key stream.
pub fn execute_mixed<H: QueueHandle>(
    ctx: &Context<'_>,
    handle: &mut H,
    keys: &[u64],
    result: &ThroughputResult,
) {
    let mut failed_pops = 0u64;
    let mut pops = 0u64;
    let work_time = ctx.execute_synchronized_blockwise(keys.len(), |start, count| {
        for &key in &keys[start..start + count] {
            handle.push((key, key));
            while handle.try_pop().is_none() {
                failed_pops += 1;
            }
            pops += 1;
        }
    });
    result.num_failed_pops.fetch_add(failed_pops, Ordering::Relaxed);
    result.num_pops.fetch_add(pops, Ordering::Relaxed);
    result.update_work_time(work_time);
}

/// Split mode, push side: drain the key stream blockwise.
pub fn execute_split_push<H: QueueHandle>(
    ctx: &Context<'_>,
    handle: &mut H,
    keys: &[u64],
    result: &ThroughputResult,
) {
    let work_time = ctx.execute_synchronized_blockwise(keys.len(), |start, count| {
        for &key in &keys[start..start + count] {
            handle.push((key, key));
        }
    });
    result.update_work_time(work_time);
}

/// Split mode, pop side: pop until the global count reaches `target`.
/// Batches are folded in with a single fetch-add whose return value decides
/// termination, so the final batch is counted exactly once.
pub fn execute_split_pop<H: QueueHandle>(
    ctx: &Context<'_>,
    handle: &mut H,
    result: &ThroughputResult,
    target: u64,
) {
    let mut failed_pops = 0u64;
    let work_time = ctx.execute_synchronized(|| loop {
        let mut batch = 0u64;
        while handle.try_pop().is_some() {
            batch += 1;
        }
        failed_pops += 1;
        if batch == 0 {
            if result.num_pops.load(Ordering::Relaxed) >= target {
                break;
            }
        } else if result.num_pops.fetch_add(batch, Ordering::Relaxed) + batch >= target {
            break;
        }
    });
    result.num_failed_pops.fetch_add(failed_pops, Ordering::Relaxed);
    result.update_work_time(work_time);
}

/// Throughput driver configuration, validated before any thread starts.
#[derive(Debug, Clone)]
pub struct ThroughputSettings {
    pub num_threads: usize,
    pub prefill_per_thread: usize,
    pub elements_per_thread: usize,
    pub work_mode: WorkMode,
    pub num_push_threads: usize,
    pub element_distribution: ElementDistribution,
    pub min_key: u64,
    pub max_key: u64,
    pub seed: u64,
}

impl ThroughputSettings {
    pub fn validate(&self) -> Result<(), BenchError> {
        if self.num_threads == 0 {
            return Err(BenchError::Config("need at least one thread".into()));
        }
        if self.min_key > self.max_key {
            return Err(BenchError::Config(format!(
                "min key {} exceeds max key {}",
                self.min_key, self.max_key
            )));
        }
        if self.max_key > MAX_USER_KEY {
            return Err(BenchError::Config(format!(
                "max key {} collides with the reserved sentinel keys",
                self.max_key
            )));
        }
        if self.work_mode == WorkMode::Split {
            if self.num_push_threads > self.num_threads {
                return Err(BenchError::Config(format!(
                    "{} push threads but only {} threads",
                    self.num_push_threads, self.num_threads
                )));
            }
            if self.num_push_threads == 0 && self.elements_per_thread > 0 {
                return Err(BenchError::Config(
                    "split mode with elements to push but no push threads".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPolicy {
    Uniform,
    Split,
    Producer,
    Alternating,
}

impl InsertPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "uniform" => Some(Self::Uniform),
            "split" => Some(Self::Split),
            "producer" => Some(Self::Producer),
            "alternating" => Some(Self::Alternating),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Split => "split",
            Self::Producer => "producer",
            Self::Alternating => "alternating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDistribution {
    Uniform,
    Ascending,
    Descending,
    Dijkstra,
    ThreadId,
}

impl KeyDistribution {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "uniform" => Some(Self::Uniform),
            "ascending" => Some(Self::Ascending),
            "descending" => Some(Self::Descending),
            "dijkstra" => Some(Self::Dijkstra),
            "threadid" => Some(Self::ThreadId),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Ascending => "ascending",
            Self::Descending => "descending",
            Self::Dijkstra => "dijkstra",
            Self::ThreadId => "threadid",
        }
    }
}

/// Stress-test step configuration.
#[derive(Debug, Clone)]
pub struct InsertConfig {
    pub policy: InsertPolicy,
    pub key_distribution: KeyDistribution,
    pub min_key: u64,
    pub max_key: u64,
    pub dijkstra_min_increase: u64,
    pub dijkstra_max_increase: u64,
}

impl Default for InsertConfig {
    fn default() -> Self {
        Self {
            policy: InsertPolicy::Uniform,
            key_distribution: KeyDistribution::Uniform,
            min_key: 0,
            max_key: MAX_USER_KEY,
            dijkstra_min_increase: 1,
            dijkstra_max_increase: 100,
        }
    }
}

/// Per-worker stress workload: decides for every step whether it is a push
/// or a pop, and which key a push uses.
pub struct InsertingStrategy {
    id: usize,
    num_threads: usize,
    config: InsertConfig,
    rng: StdRng,
    toggle: bool,
    running_key: u64,
}

impl InsertingStrategy {
    pub fn new(id: usize, num_threads: usize, config: InsertConfig, seed: u64) -> Self {
        let running_key = match config.key_distribution {
            KeyDistribution::Descending => config.max_key,
            _ => config.min_key,
        };
        Self {
            id,
            num_threads,
            config,
            rng: StdRng::seed_from_u64(seed),
            toggle: false,
            running_key,
        }
    }

    /// True when the next step is an insertion.
    pub fn next_is_insert(&mut self) -> bool {
        match self.config.policy {
            InsertPolicy::Uniform => self.rng.gen(),
            InsertPolicy::Split => self.id < (self.num_threads + 1) / 2,
            InsertPolicy::Producer => self.id == 0,
            InsertPolicy::Alternating => {
                self.toggle = !self.toggle;
                self.toggle
            }
        }
    }

    pub fn next_key(&mut self) -> u64 {
        let config = &self.config;
        match config.key_distribution {
            KeyDistribution::Uniform => self.rng.gen_range(config.min_key..=config.max_key),
            KeyDistribution::Ascending => {
                let key = self.running_key;
                self.running_key = if key == config.max_key {
                    config.min_key
                } else {
                    key + 1
                };
                key
            }
            KeyDistribution::Descending => {
                let key = self.running_key;
                self.running_key = if key == config.min_key {
                    config.max_key
                } else {
                    key - 1
                };
                key
            }
            KeyDistribution::Dijkstra => {
                let key = self.running_key;
                let increase = self
                    .rng
                    .gen_range(config.dijkstra_min_increase..=config.dijkstra_max_increase);
                self.running_key = key.saturating_add(increase).min(config.max_key);
                key
            }
            KeyDistribution::ThreadId => {
                (config.min_key + self.id as u64).min(config.max_key)
            }
        }
    }
}
