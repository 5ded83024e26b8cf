//! Directed graphs in compressed sparse row form, read from DIMACS `.gr`
//! files, plus the sequential Dijkstra reference used for verification.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::BenchError;

/// Distance of a node no search has reached. The top of the range is kept
/// free so the value never collides with a real path length.
pub const UNREACHED: u32 = u32::MAX - 1;

#[derive(Debug, Clone, Copy)]
pub struct Edge {
    pub target: u32,
    pub weight: u32,
}

/// Adjacency in CSR form: `nodes[u]..nodes[u + 1]` indexes the out-edges of
/// `u` in `edges`.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<u32>,
    edges: Vec<Edge>,
}

impl Graph {
    /// Builds a graph from 0-based `(source, target, weight)` triples.
    pub fn from_edges(num_nodes: usize, arcs: &[(u32, u32, u32)]) -> Self {
        let mut per_node: Vec<Vec<Edge>> = vec![Vec::new(); num_nodes];
        for &(source, target, weight) in arcs {
            per_node[source as usize].push(Edge { target, weight });
        }
        Self::from_adjacency(per_node)
    }

    fn from_adjacency(per_node: Vec<Vec<Edge>>) -> Self {
        let mut nodes = Vec::with_capacity(per_node.len() + 1);
        nodes.push(0);
        let mut edges = Vec::new();
        for list in &per_node {
            edges.extend_from_slice(list);
            nodes.push(edges.len() as u32);
        }
        Self { nodes, edges }
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn outgoing(&self, node: u32) -> &[Edge] {
        let lo = self.nodes[node as usize] as usize;
        let hi = self.nodes[node as usize + 1] as usize;
        &self.edges[lo..hi]
    }

    /// Parses the DIMACS shortest-path format: `c` comment lines, exactly
    /// one `p sp <nodes> <arcs>` header, and 1-based `a <u> <v> <w>` arcs.
    /// Any other leading token is an error.
    pub fn from_dimacs<R: BufRead>(reader: R) -> Result<Self, BenchError> {
        let mut per_node: Option<Vec<Vec<Edge>>> = None;
        let mut num_arcs_declared = 0usize;
        let mut num_arcs = 0usize;
        for line in reader.lines() {
            let line = line?;
            let mut fields = line.split_whitespace();
            match fields.next() {
                None | Some("c") => continue,
                Some("p") => {
                    if per_node.is_some() {
                        return Err(BenchError::Parse("duplicate problem line".into()));
                    }
                    if fields.next() != Some("sp") {
                        return Err(BenchError::Parse("problem line is not 'p sp'".into()));
                    }
                    let num_nodes = parse_field(fields.next(), "node count")?;
                    num_arcs_declared = parse_field(fields.next(), "arc count")?;
                    per_node = Some(vec![Vec::new(); num_nodes]);
                }
                Some("a") => {
                    let per_node = per_node
                        .as_mut()
                        .ok_or_else(|| BenchError::Parse("arc before problem line".into()))?;
                    let source: usize = parse_field(fields.next(), "arc source")?;
                    let target: usize = parse_field(fields.next(), "arc target")?;
                    let weight: u32 = parse_field(fields.next(), "arc weight")?;
                    if source == 0 || source > per_node.len() || target == 0 || target > per_node.len() {
                        return Err(BenchError::Parse(format!(
                            "arc {source} -> {target} out of range"
                        )));
                    }
                    per_node[source - 1].push(Edge {
                        target: (target - 1) as u32,
                        weight,
                    });
                    num_arcs += 1;
                }
                Some(other) => {
                    return Err(BenchError::Parse(format!("unknown line type '{other}'")));
                }
            }
        }
        let per_node = per_node.ok_or_else(|| BenchError::Parse("missing problem line".into()))?;
        if num_arcs != num_arcs_declared {
            return Err(BenchError::Parse(format!(
                "header declares {num_arcs_declared} arcs, file has {num_arcs}"
            )));
        }
        Ok(Self::from_adjacency(per_node))
    }

    pub fn from_dimacs_file<P: AsRef<Path>>(path: P) -> Result<Self, BenchError> {
        Self::from_dimacs(BufReader::new(File::open(path)?))
    }
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, what: &str) -> Result<T, BenchError> {
    field
        .ok_or_else(|| BenchError::Parse(format!("missing {what}")))?
        .parse()
        .map_err(|_| BenchError::Parse(format!("invalid {what}")))
}

/// Reads a solution file of `node distance` pairs, in node order.
pub fn read_solution<R: BufRead>(reader: R) -> Result<Vec<u32>, BenchError> {
    let mut solution = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let Some(_node) = fields.next() else { continue };
        let distance: u32 = parse_field(fields.next(), "solution distance")?;
        solution.push(distance);
    }
    Ok(solution)
}

pub fn read_solution_file<P: AsRef<Path>>(path: P) -> Result<Vec<u32>, BenchError> {
    read_solution(BufReader::new(File::open(path)?))
}

/// Textbook Dijkstra with a binary heap; the single-threaded reference the
/// parallel engine is checked against.
pub fn sequential_dijkstra(graph: &Graph, source: u32) -> Vec<u32> {
    use std::cmp::Reverse;
    use std::collections::BinaryHeap;

    let mut distances = vec![UNREACHED; graph.num_nodes()];
    let mut heap = BinaryHeap::new();
    distances[source as usize] = 0;
    heap.push(Reverse((0u32, source)));
    while let Some(Reverse((distance, node))) = heap.pop() {
        if distance > distances[node as usize] {
            continue;
        }
        for edge in graph.outgoing(node) {
            let candidate = distance.saturating_add(edge.weight);
            if candidate < distances[edge.target as usize] {
                distances[edge.target as usize] = candidate;
                heap.push(Reverse((candidate, edge.target)));
            }
        }
    }
    distances
}
