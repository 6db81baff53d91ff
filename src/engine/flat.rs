//! Flat index for exact brute-force search.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::build::config::{IndexSpec, IndexVariant, SearchParams};
use crate::engine::blob::IndexBlob;
use crate::engine::{ComputePool, Neighbor, TopK, VectorIndexEngine};
use crate::error::{AnnforgeError, Result};
use crate::vector::{EmbeddingMatrix, l2_squared};

/// Threshold above which an attached pool is used for the distance scan.
const PARALLEL_SCAN_THRESHOLD: usize = 1024;

/// Exact L2 index: stores every vector verbatim and scans all of them per
/// query. No training, no search-time parameters.
///
/// Also serves as the coarse quantizer inside the IVFPQ index, holding the
/// cluster centroids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
    #[serde(skip)]
    pool: Option<ComputePool>,
}

impl FlatIndex {
    /// Create an empty flat index for `dim`-dimensional vectors.
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
            pool: None,
        }
    }

    /// Append a single vector.
    pub fn push(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(AnnforgeError::invalid_operation(format!(
                "vector has dimension {}, expected {}",
                vector.len(),
                self.dim
            )));
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    /// Borrow stored vector `i`.
    pub fn get(&self, i: usize) -> &[f32] {
        let start = i * self.dim;
        &self.data[start..start + self.dim]
    }

    fn check_query(&self, query: &[f32], k: usize) -> Result<()> {
        if query.len() != self.dim {
            return Err(AnnforgeError::invalid_operation(format!(
                "query has dimension {}, expected {}",
                query.len(),
                self.dim
            )));
        }
        if k == 0 {
            return Err(AnnforgeError::invalid_operation(
                "k must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Squared distances from `query` to every stored vector, in row order.
    fn scan(&self, query: &[f32]) -> Vec<f32> {
        match &self.pool {
            Some(pool) if self.ntotal() > PARALLEL_SCAN_THRESHOLD => pool.install(|| {
                self.data
                    .par_chunks_exact(self.dim)
                    .map(|row| l2_squared(query, row))
                    .collect()
            }),
            _ => self
                .data
                .chunks_exact(self.dim)
                .map(|row| l2_squared(query, row))
                .collect(),
        }
    }
}

impl VectorIndexEngine for FlatIndex {
    fn variant(&self) -> IndexVariant {
        IndexVariant::Flat
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn ntotal(&self) -> usize {
        self.data.len() / self.dim
    }

    fn train(&mut self, _matrix: &EmbeddingMatrix) -> Result<()> {
        // Exact search has nothing to learn.
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
        self.data.extend_from_slice(matrix.as_slice());
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_query(query, k)?;

        let mut top = TopK::new(k);
        for (id, distance) in self.scan(query).into_iter().enumerate() {
            top.push(id, distance);
        }
        Ok(top.into_neighbors())
    }

    fn set_search_params(&mut self, spec: &IndexSpec) -> Result<()> {
        if spec.variant != IndexVariant::Flat {
            return Err(AnnforgeError::invalid_operation(format!(
                "spec is for {}, index is flat",
                spec.variant
            )));
        }
        Ok(())
    }

    fn search_params(&self) -> SearchParams {
        SearchParams::default()
    }

    fn attach_pool(&mut self, pool: &ComputePool) {
        self.pool = Some(pool.clone());
    }

    fn detach_pool(&mut self) {
        self.pool = None;
    }

    fn to_blob(&self) -> IndexBlob {
        let mut detached = self.clone();
        detached.pool = None;
        IndexBlob::Flat(detached)
    }
}
