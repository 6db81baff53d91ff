//! Index variant selection and parameter derivation.
//!
//! [`IndexSpec::derive`] maps a variant plus the dataset shape (vector
//! count, dimensionality) to a concrete parameter set. The mapping is a
//! pure function: no I/O, deterministic, reproduced exactly across builds
//! so that two builds over the same input produce interchangeable indexes.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{AnnforgeError, Result};

/// The index structures annforge can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IndexVariant {
    /// Exact brute-force L2 search.
    Flat,
    /// Inverted-file clustering with product quantization.
    #[value(name = "ivfpq")]
    IvfPq,
    /// Hierarchical navigable small-world graph.
    Hnsw,
}

impl IndexVariant {
    /// Canonical lowercase name, used in artifact filenames and metadata.
    pub fn name(&self) -> &'static str {
        match self {
            IndexVariant::Flat => "flat",
            IndexVariant::IvfPq => "ivfpq",
            IndexVariant::Hnsw => "hnsw",
        }
    }

    /// Parse a variant from its canonical name.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "flat" => Ok(IndexVariant::Flat),
            "ivfpq" => Ok(IndexVariant::IvfPq),
            "hnsw" => Ok(IndexVariant::Hnsw),
            other => Err(AnnforgeError::unsupported_variant(other)),
        }
    }

    /// Whether this variant has a non-trivial training step.
    ///
    /// Only IVFPQ trains (coarse k-means plus PQ codebooks); Flat and HNSW
    /// implement training as a no-op so the builder lifecycle stays uniform.
    pub fn requires_training(&self) -> bool {
        matches!(self, IndexVariant::IvfPq)
    }
}

impl std::fmt::Display for IndexVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Variant-specific structural and search parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexParams {
    /// Flat has no tunable parameters.
    Flat,
    /// IVFPQ: coarse cluster count, PQ subvector count, code width, and the
    /// number of clusters visited per query.
    IvfPq {
        clusters: usize,
        subvectors: usize,
        bits_per_code: u32,
        nprobe: usize,
    },
    /// HNSW: graph degree, construction search width, query search width.
    Hnsw {
        m: usize,
        ef_construction: usize,
        ef_search: usize,
    },
}

/// Search-time parameters actually applied to a built index.
///
/// Serialized verbatim into the artifact metadata sidecar; variants without
/// a given knob report `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SearchParams {
    pub nprobe: Option<usize>,
    pub ef_search: Option<usize>,
}

/// An immutable index recipe: variant tag plus derived parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub variant: IndexVariant,
    pub params: IndexParams,
}

impl IndexSpec {
    /// Derive the parameter set for `variant` over an `n` x `d` dataset.
    ///
    /// Cluster and subvector counts scale with dataset size and
    /// dimensionality so index quality and memory footprint track the data;
    /// graph and quantization granularity knobs are fixed defaults tuned
    /// empirically.
    pub fn derive(variant: IndexVariant, n: usize, d: usize) -> Self {
        let params = match variant {
            IndexVariant::Flat => IndexParams::Flat,
            IndexVariant::IvfPq => {
                // sqrt(N) clusters, bounded so tiny datasets still get a
                // meaningful partition and huge ones stay trainable.
                let clusters = ((n as f64).sqrt().round() as usize).clamp(4, 1024);
                let subvectors = (d / 2).min(64);
                let nprobe = (clusters / 10).max(1);
                IndexParams::IvfPq {
                    clusters,
                    subvectors,
                    bits_per_code: 8,
                    nprobe,
                }
            }
            IndexVariant::Hnsw => IndexParams::Hnsw {
                m: 16,
                ef_construction: 200,
                ef_search: 64,
            },
        };

        Self { variant, params }
    }

    /// The search-time parameters this spec will apply after population.
    pub fn search_params(&self) -> SearchParams {
        match &self.params {
            IndexParams::Flat => SearchParams::default(),
            IndexParams::IvfPq { nprobe, .. } => SearchParams {
                nprobe: Some(*nprobe),
                ef_search: None,
            },
            IndexParams::Hnsw { ef_search, .. } => SearchParams {
                nprobe: None,
                ef_search: Some(*ef_search),
            },
        }
    }
}
