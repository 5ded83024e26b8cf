use std::io::Cursor;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use relaxed_queues::graph::{self, Graph, UNREACHED};
use relaxed_queues::{MultiQueue, SsspEngine};

/// Runs the parallel solver and checks the termination protocol settled
/// cleanly before returning the distances.
fn solve(graph: &Graph, source: u32, num_threads: usize) -> Vec<u32> {
    let engine = SsspEngine::new(graph);
    let pq = MultiQueue::new(num_threads, 7);
    let result = engine.run(&pq, source, num_threads);
    assert_eq!(
        result.final_idle_counter,
        2 * num_threads,
        "termination declared with workers unaccounted for"
    );
    assert!(result.processed_nodes > 0);
    engine.distances()
}

#[test]
fn trivial_single_node_graph() {
    let graph = Graph::from_edges(1, &[]);
    assert_eq!(solve(&graph, 0, 1), vec![0]);
    assert_eq!(solve(&graph, 0, 2), vec![0]);
}

#[test]
fn four_node_cycle() {
    let graph = Graph::from_edges(4, &[(0, 1, 1), (1, 2, 2), (2, 3, 3), (3, 0, 4)]);
    for threads in 1..=4 {
        assert_eq!(solve(&graph, 0, threads), vec![0, 1, 3, 6]);
    }
}

#[test]
fn five_node_dag() {
    let graph = Graph::from_edges(
        5,
        &[
            (0, 1, 2),
            (0, 2, 5),
            (1, 2, 1),
            (1, 3, 4),
            (2, 3, 1),
            (3, 4, 3),
        ],
    );
    for threads in 1..=4 {
        assert_eq!(solve(&graph, 0, threads), vec![0, 2, 3, 4, 7]);
    }
}

#[test]
fn unreachable_nodes_keep_the_sentinel_distance() {
    let graph = Graph::from_edges(3, &[(0, 1, 5)]);
    assert_eq!(solve(&graph, 0, 2), vec![0, 5, UNREACHED]);
}

#[test]
fn random_graph_matches_sequential_dijkstra() {
    let mut rng = StdRng::seed_from_u64(2024);
    let num_nodes = 300u32;
    let mut arcs = Vec::new();
    // A ring so everything is reachable, plus random chords.
    for u in 0..num_nodes {
        arcs.push((u, (u + 1) % num_nodes, rng.gen_range(1..100)));
    }
    for _ in 0..2_000 {
        arcs.push((
            rng.gen_range(0..num_nodes),
            rng.gen_range(0..num_nodes),
            rng.gen_range(1..100),
        ));
    }
    let graph = Graph::from_edges(num_nodes as usize, &arcs);
    let expected = graph::sequential_dijkstra(&graph, 0);
    for threads in 1..=4 {
        assert_eq!(solve(&graph, 0, threads), expected, "{threads} threads");
    }
}

#[test]
fn repeated_runs_terminate() {
    // Termination detection must not depend on lucky scheduling.
    let graph = Graph::from_edges(4, &[(0, 1, 1), (1, 2, 2), (2, 3, 3), (3, 0, 4)]);
    for round in 0..20 {
        let engine = SsspEngine::new(&graph);
        let pq = MultiQueue::new(3, round);
        let result = engine.run(&pq, 0, 3);
        assert_eq!(result.final_idle_counter, 6);
    }
}

#[test]
fn parses_dimacs_with_comments_and_whitespace() {
    let input = "c test graph\nc another comment\n\np sp 3 3\na 1 2 4\n  a   2   3   5\na 1 3 10\n";
    let graph = Graph::from_dimacs(Cursor::new(input)).unwrap();
    assert_eq!(graph.num_nodes(), 3);
    assert_eq!(graph.num_edges(), 3);
    assert_eq!(graph::sequential_dijkstra(&graph, 0), vec![0, 4, 9]);
}

#[test]
fn rejects_unknown_line_type() {
    let input = "p sp 2 1\nx 1 2 3\n";
    assert!(Graph::from_dimacs(Cursor::new(input)).is_err());
}

#[test]
fn rejects_arc_before_header() {
    let input = "a 1 2 3\np sp 2 1\n";
    assert!(Graph::from_dimacs(Cursor::new(input)).is_err());
}

#[test]
fn rejects_duplicate_header() {
    let input = "p sp 2 1\np sp 2 1\na 1 2 3\n";
    assert!(Graph::from_dimacs(Cursor::new(input)).is_err());
}

#[test]
fn rejects_arc_count_mismatch() {
    let input = "p sp 2 2\na 1 2 3\n";
    assert!(Graph::from_dimacs(Cursor::new(input)).is_err());
}

#[test]
fn rejects_out_of_range_arc() {
    let input = "p sp 2 1\na 1 5 3\n";
    assert!(Graph::from_dimacs(Cursor::new(input)).is_err());
}

#[test]
fn reads_solution_files() {
    let input = "0 0\n1 4\n2 9\n";
    assert_eq!(graph::read_solution(Cursor::new(input)).unwrap(), vec![0, 4, 9]);
}

#[test]
fn sequential_dijkstra_handles_disconnected_nodes() {
    let graph = Graph::from_edges(3, &[(0, 1, 2)]);
    assert_eq!(graph::sequential_dijkstra(&graph, 0), vec![0, 2, UNREACHED]);
}
