//! The build orchestrator: load, configure, build, benchmark, publish.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::info;

use crate::build::builder::IndexBuilder;
use crate::build::config::{IndexSpec, IndexVariant};
use crate::build::loader::EmbeddingLoader;
use crate::build::probe::{DEFAULT_TOP_K, PerformanceProbe};
use crate::build::publisher::{ArtifactMetadata, ArtifactPublisher};
use crate::engine::{ComputePool, VectorIndexEngine};
use crate::error::Result;

/// Everything a finished build hands back to the caller.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub artifact_path: PathBuf,
    pub metadata: ArtifactMetadata,
}

/// One end-to-end index build.
///
/// Stages run strictly in sequence and data flows strictly forward; a
/// failure at any stage aborts the whole build and leaves previously
/// published artifacts (and the latest pointer) untouched. There is no
/// cancellation and no stage timeout.
pub struct BuildPipeline {
    data_path: PathBuf,
    output_dir: PathBuf,
    variant: String,
    accelerate: bool,
    benchmark_top_k: usize,
}

impl BuildPipeline {
    /// Create a pipeline. `variant` is validated when [`run`](Self::run)
    /// starts, before any other work.
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>, S: Into<String>>(
        data_path: P,
        output_dir: Q,
        variant: S,
    ) -> Self {
        Self {
            data_path: data_path.as_ref().to_path_buf(),
            output_dir: output_dir.as_ref().to_path_buf(),
            variant: variant.into(),
            accelerate: true,
            benchmark_top_k: DEFAULT_TOP_K,
        }
    }

    /// Enable or disable compute-pool placement (enabled by default).
    pub fn with_acceleration(mut self, accelerate: bool) -> Self {
        self.accelerate = accelerate;
        self
    }

    /// Override the benchmark's top-k.
    pub fn with_benchmark_top_k(mut self, top_k: usize) -> Self {
        self.benchmark_top_k = top_k;
        self
    }

    /// Run the full build and return the published artifact.
    pub fn run(&self) -> Result<BuildReport> {
        let build_started = Instant::now();

        // An unknown variant name must abort before anything is loaded,
        // built, or written.
        let variant = IndexVariant::parse_str(&self.variant)?;

        let matrix = EmbeddingLoader::load(&self.data_path)?;

        let spec = IndexSpec::derive(variant, matrix.rows(), matrix.dim());
        info!(variant = %variant, spec = ?spec.params, "derived index spec");

        let pool = if self.accelerate {
            ComputePool::detect()
        } else {
            None
        };
        match &pool {
            Some(pool) => info!(threads = pool.threads(), "accelerated execution available"),
            None => info!("building on the host thread"),
        }

        let index = IndexBuilder::new(pool.as_ref()).build(&spec, &matrix)?;

        let performance =
            PerformanceProbe::new(self.benchmark_top_k).benchmark(index.as_ref(), &matrix)?;

        let metadata = ArtifactMetadata {
            variant: variant.name().to_string(),
            num_vectors: matrix.rows(),
            dimension: matrix.dim(),
            build_time_seconds: build_started.elapsed().as_secs_f64(),
            performance,
            parameters: index.search_params(),
        };

        let artifact_path =
            ArtifactPublisher::new(&self.output_dir).publish(index.as_ref(), Some(&metadata), variant)?;

        info!(
            elapsed_s = build_started.elapsed().as_secs_f64(),
            path = %artifact_path.display(),
            "index build complete"
        );

        Ok(BuildReport {
            artifact_path,
            metadata,
        })
    }
}
