//! Parallel single-source shortest-path benchmark.
//!
//! Reads a DIMACS graph and a reference solution, then solves the SSSP
//! problem from node 0 with doubling thread counts up to `-j`, verifying
//! the distance array against the solution after every run. One result
//! line per thread count: `threads time_ms processed_nodes`.

use std::path::PathBuf;

use clap::Parser;

use relaxed_queues::graph::{self, Graph};
use relaxed_queues::{BenchError, MultiQueue, SsspEngine};

#[derive(Parser)]
#[command(
    name = "shortest_path",
    about = "Measures and records the performance of relaxed priority queues in the SSSP problem"
)]
struct Cli {
    /// Maximum number of threads
    #[arg(short = 'j', long = "threads", default_value_t = 4)]
    threads: usize,

    /// The input graph
    #[arg(short = 'f', long = "file", default_value = "graph.gr")]
    graph_file: PathBuf,

    /// The reference shortest-path distances
    #[arg(short = 'c', long = "check", default_value = "solution.txt")]
    solution_file: PathBuf,

    /// Seed for the queue's random streams
    #[arg(short = 's', long = "seed", default_value_t = 1)]
    seed: u64,
}

fn run(cli: Cli) -> Result<(), BenchError> {
    if cli.threads == 0 {
        return Err(BenchError::Config("need at least one thread".into()));
    }
    eprintln!("Threads: {}", cli.threads);
    eprintln!("Graph file: {}", cli.graph_file.display());

    eprint!("Reading graph...");
    let graph = Graph::from_dimacs_file(&cli.graph_file)?;
    let solution = graph::read_solution_file(&cli.solution_file)?;
    if graph.num_nodes() != solution.len() {
        return Err(BenchError::Parse(format!(
            "graph has {} nodes but solution has {} entries",
            graph.num_nodes(),
            solution.len()
        )));
    }
    eprintln!("done");

    let mut threads = 1;
    while threads <= cli.threads {
        let engine = SsspEngine::new(&graph);
        let pq = MultiQueue::new(threads, cli.seed);
        let result = engine.run(&pq, 0, threads);
        for (node, &expected) in solution.iter().enumerate() {
            let got = engine.distance(node as u32);
            if got != expected {
                return Err(BenchError::Verification(format!(
                    "node {node}: distance {got}, solution says {expected} ({threads} threads)"
                )));
            }
        }
        println!(
            "{threads} {} {}",
            result.time.as_millis(),
            result.processed_nodes
        );
        threads *= 2;
    }
    eprintln!("Done");
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
