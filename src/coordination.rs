//! Worker thread coordination for measured benchmark phases.
//!
//! A [`ThreadCoordinator`] spawns one worker per configured thread, pins
//! worker `i` to core `i`, and gives every worker a [`Context`] with the
//! synchronization primitives the drivers build their phases from: a
//! leader-executes barrier, synchronized timed execution, and blockwise work
//! distribution over a shared cursor. The calling thread stays available as
//! the coordinator (it raises the start flag and, for timed runs, the stop
//! flag).

use std::sync::atomic::{compiler_fence, AtomicBool, AtomicUsize, Ordering};
use std::sync::{Barrier, Condvar, Mutex};
use std::time::Instant;

/// Elements claimed per `fetch_add` in blockwise execution.
pub const BLOCK_SIZE: usize = 4096;

struct Shared {
    num_threads: usize,
    barrier: Barrier,
    block_cursor: AtomicUsize,
    start_flag: AtomicBool,
    stop_flag: AtomicBool,
    notified: Mutex<bool>,
    notified_cv: Condvar,
    epoch: Instant,
}

pub struct ThreadCoordinator {
    shared: Shared,
}

impl ThreadCoordinator {
    pub fn new(num_threads: usize) -> Self {
        assert!(num_threads > 0);
        Self {
            shared: Shared {
                num_threads,
                barrier: Barrier::new(num_threads),
                block_cursor: AtomicUsize::new(0),
                start_flag: AtomicBool::new(false),
                stop_flag: AtomicBool::new(false),
                notified: Mutex::new(false),
                notified_cv: Condvar::new(),
                epoch: Instant::now(),
            },
        }
    }

    /// Runs `task` on `num_threads` pinned workers while `driver` runs on
    /// the calling thread. Returns the driver's result after every worker
    /// has joined.
    pub fn run<T, D, R>(&self, task: T, driver: D) -> R
    where
        T: Fn(Context<'_>) + Sync,
        D: FnOnce(&Self) -> R,
    {
        std::thread::scope(|scope| {
            let shared = &self.shared;
            let task = &task;
            for id in 0..shared.num_threads {
                scope.spawn(move || {
                    pin_current_thread(id);
                    task(Context { id, shared });
                });
            }
            driver(self)
        })
    }

    /// Blocks until a worker calls [`Context::notify_coordinator`].
    pub fn wait_until_notified(&self) {
        let mut notified = self.shared.notified.lock().unwrap();
        while !*notified {
            notified = self.shared.notified_cv.wait(notified).unwrap();
        }
        *notified = false;
    }

    /// Releases workers spinning in [`Context::wait_for_start`].
    pub fn start(&self) {
        self.shared.start_flag.store(true, Ordering::Release);
    }

    /// Asks workers to wind down; checked cooperatively via
    /// [`Context::stopped`].
    pub fn stop(&self) {
        self.shared.stop_flag.store(true, Ordering::Release);
    }

    /// Nanoseconds since the coordinator was created.
    pub fn tick(&self) -> u64 {
        self.shared.epoch.elapsed().as_nanos() as u64
    }
}

/// Per-worker view of the coordinator.
pub struct Context<'a> {
    id: usize,
    shared: &'a Shared,
}

impl Context<'_> {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn num_threads(&self) -> usize {
        self.shared.num_threads
    }

    /// The main worker executes the leader closures and seeds shared state.
    pub fn is_main(&self) -> bool {
        self.id == 0
    }

    /// Barrier where the main worker runs `f` before anyone proceeds.
    pub fn synchronize<F: FnOnce()>(&self, f: F) {
        self.shared.barrier.wait();
        if self.is_main() {
            f();
        }
        self.shared.barrier.wait();
    }

    /// Wakes the coordinator thread blocked in
    /// [`ThreadCoordinator::wait_until_notified`].
    pub fn notify_coordinator(&self) {
        let mut notified = self.shared.notified.lock().unwrap();
        *notified = true;
        self.shared.notified_cv.notify_one();
    }

    /// Spin until the coordinator raises the start flag.
    pub fn wait_for_start(&self) {
        while !self.shared.start_flag.load(Ordering::Relaxed) {
            std::hint::spin_loop();
        }
        std::sync::atomic::fence(Ordering::Acquire);
    }

    pub fn stopped(&self) -> bool {
        self.shared.stop_flag.load(Ordering::Relaxed)
    }

    /// Runs `f` inside a barrier-delimited region and returns this worker's
    /// `(start, end)` ticks. The fences keep the compiler from hoisting
    /// queue operations out of the measured region. Uses the same barrier
    /// protocol as [`Context::execute_synchronized_blockwise`], so workers
    /// of one phase may mix both calls.
    pub fn execute_synchronized<F: FnOnce()>(&self, f: F) -> (u64, u64) {
        self.synchronize(|| {});
        compiler_fence(Ordering::SeqCst);
        let start = self.tick();
        f();
        compiler_fence(Ordering::SeqCst);
        let end = self.tick();
        self.shared.barrier.wait();
        (start, end)
    }

    /// Cooperatively processes `[0, total)` in blocks of [`BLOCK_SIZE`].
    /// `f(lo, count)` is called for every block this worker claims. Returns
    /// this worker's `(start, end)` ticks; the caller aggregates the
    /// envelope over all workers.
    pub fn execute_synchronized_blockwise<F: FnMut(usize, usize)>(
        &self,
        total: usize,
        mut f: F,
    ) -> (u64, u64) {
        self.synchronize(|| self.shared.block_cursor.store(0, Ordering::Relaxed));
        compiler_fence(Ordering::SeqCst);
        let start = self.tick();
        loop {
            let lo = self.shared.block_cursor.fetch_add(BLOCK_SIZE, Ordering::Relaxed);
            if lo >= total {
                break;
            }
            let count = BLOCK_SIZE.min(total - lo);
            f(lo, count);
        }
        compiler_fence(Ordering::SeqCst);
        let end = self.tick();
        self.shared.barrier.wait();
        (start, end)
    }

    /// Nanoseconds since the coordinator epoch, from the monotonic clock.
    pub fn tick(&self) -> u64 {
        self.shared.epoch.elapsed().as_nanos() as u64
    }
}

/// Pins the calling thread to `core`. Benchmark boxes are expected to allow
/// affinity; restricted environments only lose the pinning, not the run.
pub fn pin_current_thread(core: usize) {
    #[cfg(target_os = "linux")]
    {
        use nix::sched::{sched_setaffinity, CpuSet};
        use nix::unistd::Pid;

        let mut cpu_set = CpuSet::new();
        match cpu_set.set(core) {
            Ok(()) => {
                if let Err(e) = sched_setaffinity(Pid::from_raw(0), &cpu_set) {
                    eprintln!("warning: could not pin thread to core {core}: {e}");
                }
            }
            Err(e) => eprintln!("warning: core {core} outside cpu set: {e}"),
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = core;
    }
}
