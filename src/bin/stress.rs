//! Long-running stress test for the relaxed priority queue.
//!
//! Every worker runs a randomized mix of pushes and pops, driven by an
//! insertion policy and a key distribution, until either a wall-clock
//! timeout fires or a minimum number of delete operations has completed.
//! With `-q` every operation is logged with a realtime tick so the
//! relaxation quality can be reconstructed offline.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use relaxed_queues::coordination::ThreadCoordinator;
use relaxed_queues::workload::{self, InsertConfig, InsertPolicy, InsertingStrategy, KeyDistribution};
use relaxed_queues::{BenchError, MultiQueue, MAX_USER_KEY};

// The value of a logged element packs its owner thread into the top bits so
// a deletion can be attributed without a lookup.
const BITS_FOR_THREAD_ID: u32 = 8;
const VALUE_MASK: u64 = (1u64 << (u64::BITS - BITS_FOR_THREAD_ID)) - 1;

const fn to_value(thread_id: usize, elem_id: u64) -> u64 {
    ((thread_id as u64) << (u64::BITS - BITS_FOR_THREAD_ID)) | (elem_id & VALUE_MASK)
}

const fn thread_of(value: u64) -> u64 {
    value >> (u64::BITS - BITS_FOR_THREAD_ID)
}

const fn elem_of(value: u64) -> u64 {
    value & VALUE_MASK
}

/// Realtime nanosecond tick, fenced so neighboring queue operations cannot
/// be reordered around the reading.
fn quality_tick() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_mm_lfence();
    }
    let ts = nix::time::clock_gettime(nix::time::ClockId::CLOCK_REALTIME)
        .expect("CLOCK_REALTIME unavailable");
    let tick = ts.tv_sec() as u64 * 1_000_000_000 + ts.tv_nsec() as u64;
    #[cfg(target_arch = "x86_64")]
    unsafe {
        core::arch::x86_64::_mm_lfence();
    }
    tick
}

#[derive(Default)]
struct WorkerLog {
    insertions: Vec<(u64, u64)>, // (tick, key)
    deletions: Vec<(u64, u64)>,  // (tick, value)
    failed_deletions: Vec<u64>,  // tick
}

#[derive(Parser)]
#[command(
    name = "stress",
    about = "Measures and records the performance of the relaxed priority queue under a randomized operation mix"
)]
struct Cli {
    /// Number of worker threads
    #[arg(short = 'j', long = "threads", default_value_t = 4)]
    threads: usize,

    /// Elements to prefill the queue with
    #[arg(short = 'p', long = "prefill", default_value_t = 1_000_000)]
    prefill: usize,

    /// Insert policy: uniform, split, producer, alternating
    #[arg(short = 'i', long = "insert", default_value = "uniform")]
    insert_policy: String,

    /// Key distribution: uniform, ascending, descending, dijkstra, threadid
    #[arg(short = 'e', long = "distribution", default_value = "uniform")]
    key_distribution: String,

    /// Smallest generated key
    #[arg(short = 'l', long = "min", default_value_t = 0)]
    min_key: u64,

    /// Largest generated key
    #[arg(short = 'm', long = "max", default_value_t = MAX_USER_KEY)]
    max_key: u64,

    /// Seed for all random streams
    #[arg(short = 's', long = "seed", default_value_t = 0)]
    seed: u64,

    /// Test timeout in milliseconds
    #[arg(short = 't', long = "time", default_value_t = 3000)]
    timeout_ms: u64,

    /// Stop after this many delete operations instead of the timeout
    #[arg(short = 'n', long = "deletions")]
    min_deletions: Option<u64>,

    /// Sleep up to this many nanoseconds between operations
    #[arg(short = 'w', long = "sleep", default_value_t = 0)]
    sleep_ns: u64,

    /// Log every operation for relaxation quality analysis
    #[arg(short = 'q', long = "quality")]
    quality: bool,

    /// Write results to this file instead of stdout
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

enum RunMode {
    Timeout(Duration),
    MinDeletions(u64),
}

fn run(cli: Cli) -> Result<(), BenchError> {
    if cli.threads == 0 {
        return Err(BenchError::Config("need at least one thread".into()));
    }
    if cli.min_key > cli.max_key {
        return Err(BenchError::Config(format!(
            "min key {} exceeds max key {}",
            cli.min_key, cli.max_key
        )));
    }
    if cli.max_key > MAX_USER_KEY {
        return Err(BenchError::Config(format!(
            "max key {} collides with the reserved sentinel keys",
            cli.max_key
        )));
    }
    if cli.quality && cli.threads >= (1usize << BITS_FOR_THREAD_ID) {
        return Err(BenchError::Config(format!(
            "quality logging packs the thread id into {BITS_FOR_THREAD_ID} bits, {} threads do not fit",
            cli.threads
        )));
    }
    let policy = InsertPolicy::from_name(&cli.insert_policy)
        .ok_or_else(|| BenchError::Config(format!("unknown insert policy '{}'", cli.insert_policy)))?;
    let key_distribution = KeyDistribution::from_name(&cli.key_distribution).ok_or_else(|| {
        BenchError::Config(format!("unknown key distribution '{}'", cli.key_distribution))
    })?;
    let insert_config = InsertConfig {
        policy,
        key_distribution,
        min_key: cli.min_key,
        max_key: cli.max_key,
        ..InsertConfig::default()
    };
    let mode = match cli.min_deletions {
        Some(n) => RunMode::MinDeletions(n),
        None => RunMode::Timeout(Duration::from_millis(cli.timeout_ms)),
    };

    eprintln!("Prefill size: {}", cli.prefill);
    match mode {
        RunMode::Timeout(d) => eprintln!("Test duration: {} ms", d.as_millis()),
        RunMode::MinDeletions(n) => eprintln!("Min deletions: {n}"),
    }
    eprintln!("Threads: {}", cli.threads);
    eprintln!("Insert policy: {}", policy.name());
    eprintln!("Key distribution: {}", key_distribution.name());
    eprintln!("Min key: {}", insert_config.min_key);
    eprintln!("Max key: {}", insert_config.max_key);
    eprintln!("Seed: {}", cli.seed);

    let pq = MultiQueue::new(cli.threads, cli.seed);
    let coordinator = ThreadCoordinator::new(cli.threads);

    let num_insertions = AtomicU64::new(0);
    let num_deletions = AtomicU64::new(0);
    let num_failed_deletions = AtomicU64::new(0);
    let num_delete_operations = AtomicU64::new(0);
    let logs: Mutex<Vec<Option<WorkerLog>>> =
        Mutex::new((0..cli.threads).map(|_| None).collect());

    let worker = |ctx: relaxed_queues::Context<'_>| {
        let id = ctx.id();
        let mut handle = pq.get_handle(id);
        let mut sleep_rng = StdRng::seed_from_u64(workload::thread_seed(cli.seed, id));
        let mut strategy = InsertingStrategy::new(
            id,
            cli.threads,
            insert_config.clone(),
            workload::thread_seed(cli.seed, id).wrapping_add(1),
        );
        let mut log = WorkerLog::default();
        let mut local_insertions = 0u64;
        let mut local_deletions = 0u64;
        let mut local_failed_deletions = 0u64;

        if ctx.is_main() && cli.prefill > 0 {
            eprint!("Prefilling...");
            for _ in 0..cli.prefill {
                let key = strategy.next_key();
                let value = if cli.quality {
                    let value = to_value(id, log.insertions.len() as u64);
                    log.insertions.push((0, key));
                    value
                } else {
                    key
                };
                handle.push((key, value));
            }
            eprintln!("done");
        }
        ctx.synchronize(|| {
            eprint!("Starting the stress test...");
            ctx.notify_coordinator();
        });
        ctx.wait_for_start();

        let keep_going = |ctx: &relaxed_queues::Context<'_>| match mode {
            RunMode::Timeout(_) => !ctx.stopped(),
            RunMode::MinDeletions(n) => num_delete_operations.load(Ordering::Relaxed) < n,
        };
        while keep_going(&ctx) {
            if strategy.next_is_insert() {
                let key = strategy.next_key();
                if cli.quality {
                    let value = to_value(id, log.insertions.len() as u64);
                    handle.push((key, value));
                    let tick = quality_tick();
                    log.insertions.push((tick, key));
                } else {
                    handle.push((key, key));
                }
                local_insertions += 1;
            } else {
                let popped = handle.try_pop();
                if cli.quality {
                    let tick = quality_tick();
                    match popped {
                        Some((_, value)) => {
                            log.deletions.push((tick, value));
                            num_delete_operations.fetch_add(1, Ordering::Relaxed);
                        }
                        None => {
                            log.failed_deletions.push(tick);
                            local_failed_deletions += 1;
                        }
                    }
                } else {
                    match popped {
                        Some(element) => {
                            std::hint::black_box(element);
                            num_delete_operations.fetch_add(1, Ordering::Relaxed);
                        }
                        None => local_failed_deletions += 1,
                    }
                }
                local_deletions += 1;
            }
            if cli.sleep_ns > 0 {
                std::thread::sleep(Duration::from_nanos(sleep_rng.gen_range(0..=cli.sleep_ns)));
            }
        }
        ctx.synchronize(|| eprintln!("done"));

        logs.lock().unwrap()[id] = Some(log);
        num_insertions.fetch_add(local_insertions, Ordering::Relaxed);
        num_deletions.fetch_add(local_deletions, Ordering::Relaxed);
        num_failed_deletions.fetch_add(local_failed_deletions, Ordering::Relaxed);
    };

    coordinator.run(worker, |c| {
        c.wait_until_notified();
        c.start();
        if let RunMode::Timeout(duration) = mode {
            std::thread::sleep(duration);
            c.stop();
        }
    });

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(std::io::stdout())),
    };
    if cli.quality {
        let logs = logs.lock().unwrap();
        writeln!(out, "{}", cli.threads)?;
        for (t, log) in logs.iter().enumerate() {
            let log = log.as_ref().expect("worker log missing");
            for &(tick, key) in &log.insertions {
                writeln!(out, "i {t} {tick} {key}")?;
            }
        }
        for (t, log) in logs.iter().enumerate() {
            let log = log.as_ref().expect("worker log missing");
            for &(tick, value) in &log.deletions {
                writeln!(out, "d {t} {tick} {} {}", thread_of(value), elem_of(value))?;
            }
        }
        for (t, log) in logs.iter().enumerate() {
            let log = log.as_ref().expect("worker log missing");
            for &tick in &log.failed_deletions {
                writeln!(out, "f {t} {tick}")?;
            }
        }
    } else {
        let insertions = num_insertions.load(Ordering::Relaxed);
        let deletions = num_deletions.load(Ordering::Relaxed);
        writeln!(out, "Insertions: {insertions}")?;
        writeln!(out, "Deletions: {deletions}")?;
        writeln!(
            out,
            "Failed deletions: {}",
            num_failed_deletions.load(Ordering::Relaxed)
        )?;
        if let RunMode::Timeout(duration) = mode {
            writeln!(
                out,
                "Ops/s: {:.1}",
                (insertions + deletions) as f64 / duration.as_secs_f64()
            )?;
        }
    }
    out.flush()?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
