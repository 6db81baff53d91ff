//! HNSW (Hierarchical Navigable Small World) graph index.
//!
//! A multi-layer proximity graph: each layer holds a shrinking subset of
//! the nodes, and search greedily descends from the sparsest layer to the
//! densest, keeping a beam of `ef` candidates at the bottom. Construction
//! inserts one vector at a time, linking it to its nearest neighbors per
//! layer and pruning nodes that exceed the per-layer degree cap.
//!
//! Layer assignment uses a seeded RNG, and vectors are inserted in row
//! order, so builds over the same input produce identical graphs.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::build::config::{IndexParams, IndexSpec, IndexVariant, SearchParams};
use crate::engine::blob::IndexBlob;
use crate::engine::{Candidate, Neighbor, VectorIndexEngine};
use crate::error::{AnnforgeError, Result};
use crate::vector::{EmbeddingMatrix, l2_squared};

/// Hard cap on layer assignment; the exponential distribution makes higher
/// levels astronomically unlikely anyway.
const MAX_LEVEL: usize = 24;

const LAYER_SEED: u64 = 42;

/// One graph node: its vector and per-layer adjacency lists.
/// `connections.len() - 1` is the node's top layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HnswNode {
    vector: Vec<f32>,
    connections: Vec<Vec<u32>>,
}

impl HnswNode {
    fn max_layer(&self) -> usize {
        self.connections.len() - 1
    }

    fn neighbors(&self, layer: usize) -> &[u32] {
        if layer <= self.max_layer() {
            &self.connections[layer]
        } else {
            &[]
        }
    }
}

/// Graph-based approximate index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswIndex {
    dim: usize,
    m: usize,
    ef_construction: usize,
    ef_search: usize,
    /// Level multiplier for the exponential layer distribution, 1/ln(2).
    level_mult: f64,
    seed: u64,
    nodes: Vec<HnswNode>,
    entry_point: Option<usize>,
    max_layer: usize,
    #[serde(skip)]
    rng: Option<StdRng>,
}

impl HnswIndex {
    /// Create an empty HNSW index.
    pub fn new(dim: usize, m: usize, ef_construction: usize, ef_search: usize) -> Result<Self> {
        if m == 0 {
            return Err(AnnforgeError::invalid_operation("M must be greater than 0"));
        }
        if ef_construction < m {
            return Err(AnnforgeError::invalid_operation(
                "ef_construction must be at least M",
            ));
        }
        Ok(Self {
            dim,
            m,
            ef_construction,
            ef_search: ef_search.max(1),
            level_mult: 1.0 / (2.0f64).ln(),
            seed: LAYER_SEED,
            nodes: Vec::new(),
            entry_point: None,
            max_layer: 0,
            rng: None,
        })
    }

    /// Current ef_search.
    pub fn ef_search(&self) -> usize {
        self.ef_search
    }

    /// Degree cap per layer: 2M on the ground layer, M above it.
    fn max_neighbors(&self, layer: usize) -> usize {
        if layer == 0 { self.m * 2 } else { self.m }
    }

    /// Draw a layer from the exponential distribution.
    fn select_layer(&mut self) -> usize {
        let seed = self.seed;
        let rng = self.rng.get_or_insert_with(|| StdRng::seed_from_u64(seed));
        let uniform: f64 = rng.random();
        ((-uniform.ln() * self.level_mult).floor() as usize).min(MAX_LEVEL)
    }

    /// Beam search within one layer: returns up to `ef` candidates sorted
    /// by ascending distance, starting from `entry_points`.
    fn search_layer(&self, query: &[f32], entry_points: &[usize], ef: usize, layer: usize) -> Vec<Candidate> {
        let mut visited: HashSet<usize> = HashSet::new();
        // Min-heap of nodes still to expand, max-heap of the best ef found.
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        let mut best: BinaryHeap<Candidate> = BinaryHeap::new();

        for &id in entry_points {
            if visited.insert(id) {
                let candidate = Candidate {
                    distance: l2_squared(query, &self.nodes[id].vector),
                    id,
                };
                frontier.push(Reverse(candidate));
                best.push(candidate);
            }
        }

        while let Some(Reverse(current)) = frontier.pop() {
            if let Some(farthest) = best.peek() {
                if current.distance > farthest.distance && best.len() >= ef {
                    break;
                }
            }

            for &neighbor in self.nodes[current.id].neighbors(layer) {
                let neighbor = neighbor as usize;
                if !visited.insert(neighbor) {
                    continue;
                }
                let candidate = Candidate {
                    distance: l2_squared(query, &self.nodes[neighbor].vector),
                    id: neighbor,
                };
                if best.len() < ef {
                    best.push(candidate);
                    frontier.push(Reverse(candidate));
                } else if let Some(farthest) = best.peek() {
                    if candidate.distance < farthest.distance {
                        best.pop();
                        best.push(candidate);
                        frontier.push(Reverse(candidate));
                    }
                }
            }
        }

        best.into_sorted_vec()
    }

    /// Insert one vector as the next node id.
    fn insert(&mut self, vector: Vec<f32>) {
        let id = self.nodes.len();
        let level = self.select_layer();
        self.nodes.push(HnswNode {
            vector,
            connections: vec![Vec::new(); level + 1],
        });

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(id);
            self.max_layer = level;
            return;
        };

        let query = self.nodes[id].vector.clone();

        // Greedy descent through layers above the new node's level.
        let mut entry_points = vec![entry];
        for layer in (level + 1..=self.max_layer).rev() {
            if let Some(closest) = self.search_layer(&query, &entry_points, 1, layer).first() {
                entry_points = vec![closest.id];
            }
        }

        // Link into every layer the new node occupies.
        for layer in (0..=level.min(self.max_layer)).rev() {
            let candidates = self.search_layer(&query, &entry_points, self.ef_construction, layer);
            let cap = self.max_neighbors(layer);
            let neighbors: Vec<usize> = candidates.iter().take(cap).map(|c| c.id).collect();

            for &neighbor in &neighbors {
                self.nodes[id].connections[layer].push(neighbor as u32);
                self.nodes[neighbor].connections[layer].push(id as u32);
                if self.nodes[neighbor].connections[layer].len() > cap {
                    self.prune(neighbor, layer);
                }
            }

            entry_points = candidates.into_iter().map(|c| c.id).collect();
        }

        if level > self.max_layer {
            self.max_layer = level;
            self.entry_point = Some(id);
        }
    }

    /// Keep only the closest `max_neighbors(layer)` connections of a node.
    fn prune(&mut self, id: usize, layer: usize) {
        let cap = self.max_neighbors(layer);
        let vector = self.nodes[id].vector.clone();
        let mut ranked: Vec<Candidate> = self.nodes[id].connections[layer]
            .iter()
            .map(|&neighbor| Candidate {
                distance: l2_squared(&vector, &self.nodes[neighbor as usize].vector),
                id: neighbor as usize,
            })
            .collect();
        ranked.sort();
        self.nodes[id].connections[layer] = ranked.into_iter().take(cap).map(|c| c.id as u32).collect();
    }
}

impl VectorIndexEngine for HnswIndex {
    fn variant(&self) -> IndexVariant {
        IndexVariant::Hnsw
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn ntotal(&self) -> usize {
        self.nodes.len()
    }

    fn train(&mut self, _matrix: &EmbeddingMatrix) -> Result<()> {
        // The graph is built incrementally during add; there is no separate
        // training phase.
        Ok(())
    }

    fn add(&mut self, matrix: &EmbeddingMatrix) -> Result<()> {
        if matrix.dim() != self.dim {
            return Err(AnnforgeError::invalid_operation(format!(
                "matrix has dimension {}, index expects {}",
                matrix.dim(),
                self.dim
            )));
        }
        for row in matrix.iter_rows() {
            self.insert(row.to_vec());
        }
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dim {
            return Err(AnnforgeError::invalid_operation(format!(
                "query has dimension {}, expected {}",
                query.len(),
                self.dim
            )));
        }
        if k == 0 {
            return Err(AnnforgeError::invalid_operation("k must be greater than 0"));
        }
        let Some(entry) = self.entry_point else {
            return Ok(Vec::new());
        };

        let ef = self.ef_search.max(k);
        let mut entry_points = vec![entry];
        for layer in (1..=self.max_layer).rev() {
            if let Some(closest) = self.search_layer(query, &entry_points, 1, layer).first() {
                entry_points = vec![closest.id];
            }
        }

        let candidates = self.search_layer(query, &entry_points, ef, 0);
        Ok(candidates
            .into_iter()
            .take(k)
            .map(|c| Neighbor {
                row_id: c.id as u64,
                distance: c.distance.sqrt(),
            })
            .collect())
    }

    fn set_search_params(&mut self, spec: &IndexSpec) -> Result<()> {
        match &spec.params {
            IndexParams::Hnsw { ef_search, .. } => {
                self.ef_search = (*ef_search).max(1);
                Ok(())
            }
            _ => Err(AnnforgeError::invalid_operation(format!(
                "spec is for {}, index is hnsw",
                spec.variant
            ))),
        }
    }

    fn search_params(&self) -> SearchParams {
        SearchParams {
            nprobe: None,
            ef_search: Some(self.ef_search),
        }
    }

    fn to_blob(&self) -> IndexBlob {
        let mut detached = self.clone();
        detached.rng = None;
        IndexBlob::Hnsw(detached)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_matrix() -> EmbeddingMatrix {
        // 5x6 grid of well-spaced points.
        let mut rows = Vec::new();
        for x in 0..5 {
            for y in 0..6 {
                rows.push(vec![x as f32 * 2.0, y as f32 * 2.0]);
            }
        }
        EmbeddingMatrix::from_rows(rows).unwrap()
    }

    #[test]
    fn test_construction_validates_parameters() {
        assert!(HnswIndex::new(4, 0, 200, 64).is_err());
        assert!(HnswIndex::new(4, 16, 8, 64).is_err());
        assert!(HnswIndex::new(4, 16, 200, 64).is_ok());
    }

    #[test]
    fn test_identity_property_over_grid() {
        let matrix = grid_matrix();
        let mut index = HnswIndex::new(2, 16, 200, 64).unwrap();
        index.train(&matrix).unwrap();
        index.add(&matrix).unwrap();
        assert_eq!(index.ntotal(), matrix.rows());

        for i in 0..matrix.rows() {
            let hits = index.search(matrix.row(i), 1).unwrap();
            assert_eq!(hits[0].row_id, i as u64, "row {i} did not find itself");
            assert_eq!(hits[0].distance, 0.0);
        }
    }

    #[test]
    fn test_search_returns_sorted_neighbors() {
        let matrix = grid_matrix();
        let mut index = HnswIndex::new(2, 16, 200, 64).unwrap();
        index.add(&matrix).unwrap();

        let hits = index.search(&[0.1, 0.1], 5).unwrap();
        assert_eq!(hits.len(), 5);
        assert_eq!(hits[0].row_id, 0);
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_builds_are_deterministic() {
        let matrix = grid_matrix();
        let build = || {
            let mut index = HnswIndex::new(2, 16, 200, 64).unwrap();
            index.add(&matrix).unwrap();
            index
        };
        let a = build();
        let b = build();
        assert_eq!(
            a.search(&[3.3, 4.4], 8).unwrap(),
            b.search(&[3.3, 4.4], 8).unwrap()
        );
    }

    #[test]
    fn test_empty_index_returns_no_hits() {
        let index = HnswIndex::new(2, 16, 200, 64).unwrap();
        assert!(index.search(&[0.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn test_set_search_params() {
        let mut index = HnswIndex::new(2, 16, 200, 10).unwrap();
        let spec = IndexSpec::derive(IndexVariant::Hnsw, 100, 2);
        index.set_search_params(&spec).unwrap();
        assert_eq!(index.ef_search(), 64);
        assert_eq!(index.search_params().ef_search, Some(64));

        let flat_spec = IndexSpec::derive(IndexVariant::Flat, 100, 2);
        assert!(index.set_search_params(&flat_spec).is_err());
    }
}
