//! Throughput benchmark for the relaxed priority queue.
//!
//! Workers prefill the queue, then run either a mixed phase (every worker
//! alternates push and pop over the shared key stream) or a split phase
//! (dedicated push and pop workers). The result row goes to stdout or
//! `-o PATH` as CSV; progress goes to stderr.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use relaxed_queues::coordination::ThreadCoordinator;
use relaxed_queues::workload::{
    self, ElementDistribution, ThroughputResult, ThroughputSettings, WorkMode,
};
use relaxed_queues::{BenchError, MultiQueue};

#[derive(Parser)]
#[command(
    name = "throughput",
    about = "Measures and records the throughput of the relaxed priority queue"
)]
struct Cli {
    /// Number of worker threads
    #[arg(short = 'j', long = "threads", default_value_t = 4)]
    threads: usize,

    /// Elements each worker inserts before the measured phase
    #[arg(short = 'p', long = "prefill", default_value_t = 1 << 20)]
    prefill: usize,

    /// Keys per thread in the measured phase
    #[arg(short = 'n', long = "keys", default_value_t = 1 << 24)]
    keys: usize,

    /// Work mode: [m]ixed or [s]plit
    #[arg(short = 'w', long = "work-mode", default_value_t = 'm')]
    work_mode: char,

    /// Number of pushing threads in split mode
    #[arg(short = 'i', long = "push-threads", default_value_t = 1)]
    push_threads: usize,

    /// Element distribution: [u]niform, [a]scending, [d]escending
    #[arg(short = 'e', long = "element-distribution", default_value_t = 'u')]
    element_distribution: char,

    /// Smallest generated key
    #[arg(short = 'l', long = "min", default_value_t = 1)]
    min_key: u64,

    /// Largest generated key
    #[arg(short = 'm', long = "max", default_value_t = 1 << 30)]
    max_key: u64,

    /// Seed for all random streams
    #[arg(short = 's', long = "seed", default_value_t = 1)]
    seed: u64,

    /// Write the result row to this file instead of stdout
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,
}

fn settings_from_cli(cli: &Cli) -> Result<ThroughputSettings, BenchError> {
    let work_mode = WorkMode::from_code(cli.work_mode)
        .ok_or_else(|| BenchError::Config(format!("invalid work mode '{}'", cli.work_mode)))?;
    let element_distribution = ElementDistribution::from_code(cli.element_distribution)
        .ok_or_else(|| {
            BenchError::Config(format!(
                "invalid element distribution '{}'",
                cli.element_distribution
            ))
        })?;
    let settings = ThroughputSettings {
        num_threads: cli.threads,
        prefill_per_thread: cli.prefill,
        elements_per_thread: cli.keys,
        work_mode,
        num_push_threads: cli.push_threads,
        element_distribution,
        min_key: cli.min_key,
        max_key: cli.max_key,
        seed: cli.seed,
    };
    settings.validate()?;
    Ok(settings)
}

fn run(cli: Cli) -> Result<(), BenchError> {
    let settings = settings_from_cli(&cli)?;

    eprintln!("Threads: {}", settings.num_threads);
    eprintln!("Prefill per thread: {}", settings.prefill_per_thread);
    eprintln!("Elements per thread: {}", settings.elements_per_thread);
    if settings.work_mode == WorkMode::Split {
        eprintln!(
            "Work mode: {} ({} push)",
            settings.work_mode.name(),
            settings.num_push_threads
        );
    } else {
        eprintln!("Work mode: {}", settings.work_mode.name());
    }
    eprintln!("Element distribution: {}", settings.element_distribution.name());
    eprintln!("Min key: {}", settings.min_key);
    eprintln!("Max key: {}", settings.max_key);
    eprintln!("Seed: {}", settings.seed);

    eprint!("Generating keys...");
    let total = settings.num_threads * settings.elements_per_thread;
    let mut keys = Vec::with_capacity(total);
    for id in 0..settings.num_threads {
        let mut rng = StdRng::seed_from_u64(workload::thread_seed(settings.seed, id));
        keys.extend(workload::generate_keys(
            &mut rng,
            settings.element_distribution,
            settings.min_key,
            settings.max_key,
            id,
            settings.elements_per_thread,
            settings.num_threads,
        ));
    }
    eprintln!("done");

    let pq = MultiQueue::new(settings.num_threads, settings.seed);
    let result = ThroughputResult::default();
    let coordinator = ThreadCoordinator::new(settings.num_threads);

    let pop_target =
        ((settings.prefill_per_thread + settings.elements_per_thread) * settings.num_threads) as u64;

    coordinator.run(
        |ctx| {
            let mut handle = pq.get_handle(ctx.id());
            // Distinct stream from the one the key generation consumed.
            let mut rng = StdRng::seed_from_u64(workload::thread_seed(
                settings.seed,
                settings.num_threads + ctx.id(),
            ));
            ctx.synchronize(|| eprint!("Prefilling..."));
            workload::prefill(
                &ctx,
                &mut handle,
                &mut rng,
                settings.prefill_per_thread,
                settings.min_key,
                settings.max_key,
            );
            ctx.synchronize(|| {
                eprintln!("done");
                eprint!("Working...");
            });
            match settings.work_mode {
                WorkMode::Mixed => workload::execute_mixed(&ctx, &mut handle, &keys, &result),
                WorkMode::Split => {
                    if ctx.id() < settings.num_push_threads {
                        workload::execute_split_push(&ctx, &mut handle, &keys, &result);
                    } else {
                        workload::execute_split_pop(&ctx, &mut handle, &result, pop_target);
                    }
                }
            }
            ctx.synchronize(|| eprintln!("done"));
        },
        |_| (),
    );

    let work_time = result.work_time().as_secs_f64();
    eprintln!("Work time (s): {work_time:.3}");
    eprintln!("Failed pops: {}", result.failed_pops());

    let mut out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(File::create(path)?),
        None => Box::new(std::io::stdout()),
    };
    writeln!(
        out,
        "threads,prefill,operations,work-mode,push-threads,element-distribution,\
         min-key,max-key,seed,work-time-s,failed-pops,l1d-cache-misses,l2-cache-misses"
    )?;
    writeln!(
        out,
        "{},{},{},{},{},{},{},{},{},{:.3},{},n/a,n/a",
        settings.num_threads,
        settings.prefill_per_thread,
        settings.elements_per_thread,
        settings.work_mode.name(),
        settings.num_push_threads,
        settings.element_distribution.name(),
        settings.min_key,
        settings.max_key,
        settings.seed,
        work_time,
        result.failed_pops(),
    )?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
