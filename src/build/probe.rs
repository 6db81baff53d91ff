//! Query performance benchmarking for freshly built indexes.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::VectorIndexEngine;
use crate::error::{AnnforgeError, Result};
use crate::vector::EmbeddingMatrix;

/// Default number of neighbors requested per benchmark query.
pub const DEFAULT_TOP_K: usize = 10;

/// Benchmark queries are capped at this many, regardless of input size.
pub const MAX_SAMPLE: usize = 100;

/// Measured query latency and throughput.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub avg_query_time_ms: f64,
    pub queries_per_second: f64,
}

/// Benchmarks a built index by replaying input rows as queries.
///
/// The sample is the first `min(100, N)` rows, issued sequentially — not a
/// random draw, so benchmark numbers are reproducible for a given input
/// file.
pub struct PerformanceProbe {
    top_k: usize,
}

impl PerformanceProbe {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k: top_k.max(1),
        }
    }

    /// Run the benchmark and return aggregate latency/throughput.
    pub fn benchmark(
        &self,
        index: &dyn VectorIndexEngine,
        matrix: &EmbeddingMatrix,
    ) -> Result<BenchmarkResult> {
        let sample = matrix.rows().min(MAX_SAMPLE);
        info!(sample, top_k = self.top_k, "benchmarking search performance");

        let started = Instant::now();
        for i in 0..sample {
            index
                .search(matrix.row(i), self.top_k)
                .map_err(|e| AnnforgeError::search(format!("benchmark query {i}: {e}")))?;
        }
        // Clamp so a clock too coarse to see the work still yields finite,
        // positive numbers.
        let total_seconds = started.elapsed().as_secs_f64().max(1e-9);

        let result = BenchmarkResult {
            avg_query_time_ms: total_seconds / sample as f64 * 1000.0,
            queries_per_second: sample as f64 / total_seconds,
        };
        info!(
            avg_query_time_ms = result.avg_query_time_ms,
            queries_per_second = result.queries_per_second,
            "benchmark complete"
        );
        Ok(result)
    }
}

impl Default for PerformanceProbe {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K)
    }
}
