//! Vector index engines.
//!
//! Every index structure annforge can build implements the
//! [`VectorIndexEngine`] capability trait: configure, train (optional),
//! add, search, and search-parameter accessors. The builder drives all
//! variants through the same lifecycle; variants that do not train
//! implement `train` as a no-op.

pub mod blob;
pub mod flat;
pub mod hnsw;
pub mod ivfpq;
pub mod pool;

pub use blob::{BlobInfo, load_index, save_index, validate_index_file};
pub use flat::FlatIndex;
pub use hnsw::HnswIndex;
pub use ivfpq::IvfPqIndex;
pub use pool::ComputePool;

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use serde::{Deserialize, Serialize};

use crate::build::config::{IndexParams, IndexSpec, IndexVariant, SearchParams};
use crate::error::Result;
use crate::vector::EmbeddingMatrix;

/// A single nearest-neighbor hit: the matrix row and its L2 distance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub row_id: u64,
    pub distance: f32,
}

/// Capability interface over one index structure.
///
/// Implementations are exclusively owned during construction and shared
/// read-only afterwards; none of the methods spawn work of their own beyond
/// an optionally attached [`ComputePool`].
pub trait VectorIndexEngine: Send {
    /// Which variant this engine implements.
    fn variant(&self) -> IndexVariant;

    /// Dimensionality the engine was instantiated with.
    fn dimension(&self) -> usize;

    /// Number of vectors currently indexed.
    fn ntotal(&self) -> usize;

    /// Train the index on the full matrix. No-op for variants where
    /// [`IndexVariant::requires_training`] is false.
    fn train(&mut self, matrix: &EmbeddingMatrix) -> Result<()>;

    /// Append every row of the matrix to the index. Row ids are assigned
    /// sequentially from the current `ntotal`.
    fn add(&mut self, matrix: &EmbeddingMatrix) -> Result<()>;

    /// Top-k L2 search for a single query vector, closest first.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>>;

    /// Apply the spec's search-time parameters (nprobe / ef_search).
    /// Variants without such knobs accept any spec of their own variant.
    fn set_search_params(&mut self, spec: &IndexSpec) -> Result<()>;

    /// The search-time parameters currently in effect.
    fn search_params(&self) -> SearchParams;

    /// Place the engine on a compute pool. Called at most once per build,
    /// before training and population. Variants whose construction is
    /// order-dependent (HNSW) ignore the placement and keep running on the
    /// calling thread.
    fn attach_pool(&mut self, _pool: &ComputePool) {}

    /// Return the engine to plain host execution. Called before the engine
    /// is persisted; a detached engine holds no pool handle.
    fn detach_pool(&mut self) {}

    /// Snapshot the engine into its serializable form.
    fn to_blob(&self) -> blob::IndexBlob;
}

/// Instantiate an empty engine for the spec's variant with dimensionality
/// `dim`.
pub fn create_engine(spec: &IndexSpec, dim: usize) -> Result<Box<dyn VectorIndexEngine>> {
    match &spec.params {
        IndexParams::Flat => Ok(Box::new(FlatIndex::new(dim))),
        IndexParams::IvfPq {
            clusters,
            subvectors,
            bits_per_code,
            nprobe,
        } => Ok(Box::new(IvfPqIndex::new(
            dim,
            *clusters,
            *subvectors,
            *bits_per_code,
            *nprobe,
        )?)),
        IndexParams::Hnsw {
            m,
            ef_construction,
            ef_search,
        } => Ok(Box::new(HnswIndex::new(dim, *m, *ef_construction, *ef_search)?)),
    }
}

/// Priority queue entry shared by the engines' search routines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub distance: f32,
    pub id: usize,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

/// Bounded max-heap accumulator that keeps the k closest candidates seen.
pub(crate) struct TopK {
    k: usize,
    heap: BinaryHeap<Candidate>,
}

impl TopK {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            // Capacity is a hint; don't let an oversized k preallocate.
            heap: BinaryHeap::with_capacity(k.min(1024) + 1),
        }
    }

    pub fn push(&mut self, id: usize, distance: f32) {
        if self.heap.len() < self.k {
            self.heap.push(Candidate { distance, id });
        } else if let Some(farthest) = self.heap.peek() {
            if distance < farthest.distance {
                self.heap.pop();
                self.heap.push(Candidate { distance, id });
            }
        }
    }

    /// Drain into neighbors sorted by ascending distance. Distances pushed
    /// as squared L2 are reported as true L2.
    pub fn into_neighbors(self) -> Vec<Neighbor> {
        let mut candidates = self.heap.into_sorted_vec();
        candidates.truncate(self.k);
        candidates
            .into_iter()
            .map(|c| Neighbor {
                row_id: c.id as u64,
                distance: c.distance.sqrt(),
            })
            .collect()
    }
}
