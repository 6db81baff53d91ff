//! Index construction lifecycle.
//!
//! The builder drives any engine through the same strict order:
//! instantiate, place on the compute pool, train (when the variant needs
//! it), populate, apply search-time parameters, detach. Each transition is
//! logged with its timing.

use std::time::Instant;

use tracing::info;

use crate::build::config::IndexSpec;
use crate::engine::{ComputePool, VectorIndexEngine, create_engine};
use crate::error::{AnnforgeError, Result};
use crate::vector::EmbeddingMatrix;

/// Drives one build from spec and matrix to a finished engine.
pub struct IndexBuilder<'a> {
    pool: Option<&'a ComputePool>,
}

impl<'a> IndexBuilder<'a> {
    /// Create a builder, optionally placing engines on `pool`.
    pub fn new(pool: Option<&'a ComputePool>) -> Self {
        Self { pool }
    }

    /// Build an index over `matrix` according to `spec`.
    pub fn build(
        &self,
        spec: &IndexSpec,
        matrix: &EmbeddingMatrix,
    ) -> Result<Box<dyn VectorIndexEngine>> {
        let dim = matrix.dim();
        info!(variant = %spec.variant, dim, "instantiating index");
        let mut engine = create_engine(spec, dim)?;

        // Placement happens exactly once, before training and population.
        if let Some(pool) = self.pool {
            info!(threads = pool.threads(), "placing index on compute pool");
            engine.attach_pool(pool);
        }

        if spec.variant.requires_training() {
            info!("training index");
            let started = Instant::now();
            engine.train(matrix).map_err(|e| match e {
                AnnforgeError::Training(_) => e,
                other => AnnforgeError::training(other.to_string()),
            })?;
            info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "training complete"
            );
        }

        info!(rows = matrix.rows(), "adding vectors");
        let started = Instant::now();
        engine.add(matrix)?;
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            ntotal = engine.ntotal(),
            "population complete"
        );

        if engine.ntotal() != matrix.rows() {
            return Err(AnnforgeError::PopulationMismatch {
                expected: matrix.rows(),
                actual: engine.ntotal(),
            });
        }

        engine.set_search_params(spec)?;
        let params = engine.search_params();
        if let Some(nprobe) = params.nprobe {
            info!(nprobe, "search parameter nprobe set");
        }
        if let Some(ef_search) = params.ef_search {
            info!(ef_search, "search parameter ef_search set");
        }

        // Persisted artifacts must always be host-representable.
        if self.pool.is_some() {
            info!("detaching compute pool");
            engine.detach_pool();
        }

        Ok(engine)
    }
}
