//! The in-memory embedding matrix.

use crate::error::{AnnforgeError, Result};

/// A dense N x D matrix of f32 embedding vectors, stored row-major.
///
/// The matrix is immutable after loading; the one exception is
/// [`sanitize`](EmbeddingMatrix::sanitize), which the loader calls exactly
/// once to zero-fill non-finite entries before the matrix is handed to the
/// build pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    data: Vec<f32>,
    rows: usize,
    dim: usize,
}

impl EmbeddingMatrix {
    /// Create a matrix from a row-major buffer.
    pub fn new(data: Vec<f32>, rows: usize, dim: usize) -> Result<Self> {
        if rows == 0 || dim == 0 {
            return Err(AnnforgeError::invalid_operation(format!(
                "matrix shape must be at least 1x1, got {rows}x{dim}"
            )));
        }
        if data.len() != rows * dim {
            return Err(AnnforgeError::invalid_operation(format!(
                "buffer holds {} values, expected {} for a {rows}x{dim} matrix",
                data.len(),
                rows * dim
            )));
        }
        Ok(Self { data, rows, dim })
    }

    /// Create a matrix from nested rows, validating that every row has the
    /// same length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self> {
        let n = rows.len();
        let dim = rows.first().map(|r| r.len()).unwrap_or(0);

        for (i, row) in rows.iter().enumerate() {
            if row.len() != dim {
                return Err(AnnforgeError::invalid_operation(format!(
                    "row {i} has length {}, expected {dim}",
                    row.len()
                )));
            }
        }

        let mut data = Vec::with_capacity(n * dim);
        for row in rows {
            data.extend_from_slice(&row);
        }
        Self::new(data, n, dim)
    }

    /// Number of vectors (rows).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Dimensionality of each vector.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Borrow row `i` as a slice.
    ///
    /// # Panics
    ///
    /// Panics if `i >= rows()`.
    pub fn row(&self, i: usize) -> &[f32] {
        let start = i * self.dim;
        &self.data[start..start + self.dim]
    }

    /// Iterate over all rows in order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dim)
    }

    /// The raw row-major buffer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Replace every non-finite entry (NaN or infinity) with zero and
    /// return how many entries were replaced.
    pub fn sanitize(&mut self) -> usize {
        let mut replaced = 0;
        for value in &mut self.data {
            if !value.is_finite() {
                *value = 0.0;
                replaced += 1;
            }
        }
        replaced
    }

    /// Check that no entry is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}
