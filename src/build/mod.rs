//! Index build pipeline: loading, configuration, construction,
//! benchmarking and publishing.

pub mod builder;
pub mod config;
pub mod loader;
pub mod pipeline;
pub mod probe;
pub mod publisher;

pub use builder::IndexBuilder;
pub use config::{IndexParams, IndexSpec, IndexVariant, SearchParams};
pub use loader::EmbeddingLoader;
pub use pipeline::{BuildPipeline, BuildReport};
pub use probe::{BenchmarkResult, PerformanceProbe};
pub use publisher::{ArtifactMetadata, ArtifactPublisher};
