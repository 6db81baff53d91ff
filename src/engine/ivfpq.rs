//! IVFPQ index: inverted-file coarse clustering combined with product
//! quantization.
//!
//! Training runs k-means (k-means++ initialization, then Lloyd iterations)
//! twice over the input: once on full vectors for the coarse partition, and
//! once per subspace on residuals for the PQ codebooks. Population encodes
//! every vector as a cluster assignment plus one code byte per subvector;
//! search visits `nprobe` inverted lists and scores codes with per-query
//! distance tables (asymmetric distance computation).

use rand::prelude::*;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::build::config::{IndexParams, IndexSpec, IndexVariant, SearchParams};
use crate::engine::blob::IndexBlob;
use crate::engine::flat::FlatIndex;
use crate::engine::{ComputePool, Neighbor, TopK, VectorIndexEngine};
use crate::error::{AnnforgeError, Result};
use crate::vector::{EmbeddingMatrix, l2_squared};

const COARSE_KMEANS_ITERATIONS: usize = 25;
const SUBQUANTIZER_ITERATIONS: usize = 10;
const KMEANS_CONVERGENCE: f32 = 1e-6;
const PARALLEL_THRESHOLD: usize = 256;

/// Fixed seed so repeated builds over the same input produce the same
/// partition and codebooks.
const TRAIN_SEED: u64 = 42;

/// One inverted list: row ids plus their PQ codes, `subvectors` bytes per id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PostingList {
    ids: Vec<u64>,
    codes: Vec<u8>,
}

/// Inverted-file product-quantization index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvfPqIndex {
    dim: usize,
    clusters: usize,
    subvectors: usize,
    bits_per_code: u32,
    nprobe: usize,
    /// Subspace widths; as even a split of `dim` as possible, summing to it.
    sub_dims: Vec<usize>,
    /// Exact-search sub-index over the coarse centroids.
    quantizer: FlatIndex,
    /// Per-subspace codebooks, each `ksub * sub_dims[s]` floats.
    codebooks: Vec<Vec<f32>>,
    /// Codebook entries actually trained (at most 2^bits_per_code).
    ksub: usize,
    lists: Vec<PostingList>,
    ntotal: usize,
    trained: bool,
    #[serde(skip)]
    pool: Option<ComputePool>,
}

impl IvfPqIndex {
    /// Create an untrained IVFPQ index.
    pub fn new(
        dim: usize,
        clusters: usize,
        subvectors: usize,
        bits_per_code: u32,
        nprobe: usize,
    ) -> Result<Self> {
        if clusters == 0 {
            return Err(AnnforgeError::training("cluster count must be at least 1"));
        }
        if subvectors == 0 || subvectors > dim {
            return Err(AnnforgeError::training(format!(
                "dimension {dim} cannot be split into {subvectors} PQ subvectors"
            )));
        }
        if bits_per_code == 0 || bits_per_code > 8 {
            return Err(AnnforgeError::training(format!(
                "bits per code must be in 1..=8, got {bits_per_code}"
            )));
        }

        Ok(Self {
            dim,
            clusters,
            subvectors,
            bits_per_code,
            nprobe: nprobe.max(1),
            sub_dims: split_dimensions(dim, subvectors),
            quantizer: FlatIndex::new(dim),
            codebooks: Vec::new(),
            ksub: 0,
            lists: Vec::new(),
            ntotal: 0,
            trained: false,
            pool: None,
        })
    }

    /// Coarse cluster count.
    pub fn clusters(&self) -> usize {
        self.clusters
    }

    /// Current nprobe.
    pub fn nprobe(&self) -> usize {
        self.nprobe
    }

    /// Whether training has completed.
    pub fn is_trained(&self) -> bool {
        self.trained
    }

    /// Byte offset ranges of each subspace within a full vector.
    fn sub_ranges(&self) -> Vec<(usize, usize)> {
        let mut ranges = Vec::with_capacity(self.subvectors);
        let mut start = 0;
        for &len in &self.sub_dims {
            ranges.push((start, len));
            start += len;
        }
        ranges
    }

    /// Index of the nearest coarse centroid for `vector`.
    fn nearest_centroid(&self, vector: &[f32]) -> usize {
        let mut best = 0;
        let mut best_distance = f32::INFINITY;
        for c in 0..self.clusters {
            let distance = l2_squared(vector, self.quantizer.get(c));
            if distance < best_distance {
                best_distance = distance;
                best = c;
            }
        }
        best
    }

    /// Encode the residual of one vector as `subvectors` code bytes.
    fn encode_residual(&self, residual: &[f32]) -> Vec<u8> {
        let mut codes = Vec::with_capacity(self.subvectors);
        for (s, (start, len)) in self.sub_ranges().into_iter().enumerate() {
            let sub = &residual[start..start + len];
            let codebook = &self.codebooks[s];
            let mut best = 0usize;
            let mut best_distance = f32::INFINITY;
            for j in 0..self.ksub {
                let entry = &codebook[j * len..(j + 1) * len];
                let distance = l2_squared(sub, entry);
                if distance < best_distance {
                    best_distance = distance;
                    best = j;
                }
            }
            codes.push(best as u8);
        }
        codes
    }

    /// Cluster assignment and codes for one vector.
    fn encode(&self, vector: &[f32]) -> (usize, Vec<u8>) {
        let cluster = self.nearest_centroid(vector);
        let centroid = self.quantizer.get(cluster);
        let residual: Vec<f32> = vector
            .iter()
            .zip(centroid.iter())
            .map(|(v, c)| v - c)
            .collect();
        (cluster, self.encode_residual(&residual))
    }

    /// Per-subspace distance tables for a query residual:
    /// `tables[s * ksub + j]` is the squared distance from the query's
    /// subspace `s` to codebook entry `j`.
    fn distance_tables(&self, residual: &[f32]) -> Vec<f32> {
        let mut tables = vec![0.0f32; self.subvectors * self.ksub];
        for (s, (start, len)) in self.sub_ranges().into_iter().enumerate() {
            let sub = &residual[start..start + len];
            let codebook = &self.codebooks[s];
            for j in 0..self.ksub {
                let entry = &codebook[j * len..(j + 1) * len];
                tables[s * self.ksub + j] = l2_squared(sub, entry);
            }
        }
        tables
    }
}

impl VectorIndexEngine for IvfPqIndex {
    fn variant(&self) -> IndexVariant {
        IndexVariant::IvfPq
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn ntotal(&self) -> usize {
        self.ntotal
    }

    fn train(&mut self, matrix: &EmbeddingMatrix) -> Result<()> {
        if self.trained {
            return Err(AnnforgeError::invalid_operation("index is already trained"));
        }
        if matrix.dim() != self.dim {
            return Err(AnnforgeError::training(format!(
                "matrix has dimension {}, index expects {}",
                matrix.dim(),
                self.dim
            )));
        }
        let n = matrix.rows();
        if n < self.clusters {
            return Err(AnnforgeError::training(format!(
                "cannot create {} clusters from {n} vectors",
                self.clusters
            )));
        }

        let mut rng = StdRng::seed_from_u64(TRAIN_SEED);

        // Coarse partition over full vectors.
        let rows = Rows {
            data: matrix.as_slice(),
            dim: self.dim,
        };
        let (centroids, assignments) = kmeans(
            &rows,
            self.clusters,
            COARSE_KMEANS_ITERATIONS,
            &mut rng,
            self.pool.as_ref(),
        );
        for c in 0..self.clusters {
            self.quantizer.push(&centroids[c * self.dim..(c + 1) * self.dim])?;
        }

        // Residuals against the assigned centroid are what PQ compresses.
        let mut residuals = vec![0.0f32; n * self.dim];
        for i in 0..n {
            let centroid = &centroids[assignments[i] * self.dim..(assignments[i] + 1) * self.dim];
            let row = matrix.row(i);
            for j in 0..self.dim {
                residuals[i * self.dim + j] = row[j] - centroid[j];
            }
        }

        self.ksub = (1usize << self.bits_per_code).min(n);
        let ksub = self.ksub;
        let dim = self.dim;
        let ranges = self.sub_ranges();

        // Each subspace trains its own codebook; subspaces are independent,
        // so they can fan out across the pool. Seeds are derived per
        // subspace to keep the result identical either way.
        let train_subspace = |(s, (start, len)): (usize, (usize, usize))| -> Vec<f32> {
            let mut sub_data = vec![0.0f32; n * len];
            for i in 0..n {
                sub_data[i * len..(i + 1) * len]
                    .copy_from_slice(&residuals[i * dim + start..i * dim + start + len]);
            }
            let sub_rows = Rows {
                data: &sub_data,
                dim: len,
            };
            let mut sub_rng = StdRng::seed_from_u64(
                TRAIN_SEED ^ ((s as u64 + 1).wrapping_mul(0x9E3779B97F4A7C15)),
            );
            let (codebook, _) = kmeans(&sub_rows, ksub, SUBQUANTIZER_ITERATIONS, &mut sub_rng, None);
            codebook
        };

        let codebooks: Vec<Vec<f32>> = match &self.pool {
            Some(pool) if self.subvectors > 1 => pool.install(|| {
                ranges
                    .iter()
                    .copied()
                    .enumerate()
                    .collect::<Vec<_>>()
                    .into_par_iter()
                    .map(train_subspace)
                    .collect()
            }),
            _ => ranges.iter().copied().enumerate().map(train_subspace).collect(),
        };
        self.codebooks = codebooks;

        self.lists = vec![PostingList::default(); self.clusters];
        self.trained = true;
        Ok(())
    }

    fn add(&mut self, matrix: &EmbeddingMatrix) -> Result<()> {
        if !self.trained {
            return Err(AnnforgeError::invalid_operation(
                "index must be trained before vectors are added",
            ));
        }
        if matrix.dim() != self.dim {
            return Err(AnnforgeError::invalid_operation(format!(
                "matrix has dimension {}, index expects {}",
                matrix.dim(),
                self.dim
            )));
        }

        let n = matrix.rows();
        let encoded: Vec<(usize, Vec<u8>)> = match &self.pool {
            Some(pool) if n > PARALLEL_THRESHOLD => pool.install(|| {
                (0..n)
                    .into_par_iter()
                    .map(|i| self.encode(matrix.row(i)))
                    .collect()
            }),
            _ => (0..n).map(|i| self.encode(matrix.row(i))).collect(),
        };

        let base = self.ntotal as u64;
        for (i, (cluster, codes)) in encoded.into_iter().enumerate() {
            let list = &mut self.lists[cluster];
            list.ids.push(base + i as u64);
            list.codes.extend_from_slice(&codes);
        }
        self.ntotal += n;
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if !self.trained {
            return Err(AnnforgeError::invalid_operation(
                "index must be trained before searching",
            ));
        }
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
        if self.ntotal == 0 {
            return Ok(Vec::new());
        }

        let probes = self.nprobe.min(self.clusters);
        let coarse = self.quantizer.search(query, probes)?;

        let mut top = TopK::new(k);
        for hit in coarse {
            let cluster = hit.row_id as usize;
            let centroid = self.quantizer.get(cluster);
            let residual: Vec<f32> = query
                .iter()
                .zip(centroid.iter())
                .map(|(q, c)| q - c)
                .collect();
            let tables = self.distance_tables(&residual);

            let list = &self.lists[cluster];
            for (pos, &id) in list.ids.iter().enumerate() {
                let codes = &list.codes[pos * self.subvectors..(pos + 1) * self.subvectors];
                let mut distance = 0.0f32;
                for (s, &code) in codes.iter().enumerate() {
                    distance += tables[s * self.ksub + code as usize];
                }
                top.push(id as usize, distance);
            }
        }
        Ok(top.into_neighbors())
    }

    fn set_search_params(&mut self, spec: &IndexSpec) -> Result<()> {
        match &spec.params {
            IndexParams::IvfPq { nprobe, .. } => {
                self.nprobe = (*nprobe).max(1);
                Ok(())
            }
            _ => Err(AnnforgeError::invalid_operation(format!(
                "spec is for {}, index is ivfpq",
                spec.variant
            ))),
        }
    }

    fn search_params(&self) -> SearchParams {
        SearchParams {
            nprobe: Some(self.nprobe),
            ef_search: None,
        }
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
        IndexBlob::IvfPq(detached)
    }
}

/// Split `dim` into `m` contiguous subspaces as evenly as possible.
fn split_dimensions(dim: usize, m: usize) -> Vec<usize> {
    let base = dim / m;
    let remainder = dim % m;
    (0..m)
        .map(|s| if s < remainder { base + 1 } else { base })
        .collect()
}

/// Borrowed row-major view used by the k-means routines.
struct Rows<'a> {
    data: &'a [f32],
    dim: usize,
}

impl Rows<'_> {
    fn n(&self) -> usize {
        self.data.len() / self.dim
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
}

/// K-means with k-means++ initialization and Lloyd iterations. Returns the
/// flattened `k * dim` centroid matrix and the final per-row assignments.
fn kmeans(
    rows: &Rows<'_>,
    k: usize,
    iterations: usize,
    rng: &mut StdRng,
    pool: Option<&ComputePool>,
) -> (Vec<f32>, Vec<usize>) {
    let dim = rows.dim;
    let mut centroids = kmeans_pp_init(rows, k, rng);
    let mut assignments = vec![0usize; rows.n()];

    for _ in 0..iterations {
        assignments = assign_rows(rows, &centroids, k, pool);

        // Recompute centroids as cluster means; empty clusters keep their
        // previous centroid.
        let mut sums = vec![0.0f32; k * dim];
        let mut counts = vec![0usize; k];
        for (i, &cluster) in assignments.iter().enumerate() {
            counts[cluster] += 1;
            let row = rows.row(i);
            for j in 0..dim {
                sums[cluster * dim + j] += row[j];
            }
        }

        let mut movement = 0.0f32;
        for c in 0..k {
            if counts[c] == 0 {
                continue;
            }
            let old = centroids[c * dim..(c + 1) * dim].to_vec();
            for j in 0..dim {
                centroids[c * dim + j] = sums[c * dim + j] / counts[c] as f32;
            }
            movement += l2_squared(&old, &centroids[c * dim..(c + 1) * dim]).sqrt();
        }

        if movement / (k as f32) < KMEANS_CONVERGENCE {
            break;
        }
    }

    assignments = assign_rows(rows, &centroids, k, pool);
    (centroids, assignments)
}

/// K-means++ seeding: first centroid uniform, the rest weighted by squared
/// distance to the closest centroid chosen so far.
fn kmeans_pp_init(rows: &Rows<'_>, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = rows.n();
    let dim = rows.dim;
    let mut centroids = Vec::with_capacity(k * dim);

    let first = rng.random_range(0..n);
    centroids.extend_from_slice(rows.row(first));

    let mut min_distances: Vec<f32> = (0..n)
        .map(|i| l2_squared(rows.row(i), rows.row(first)))
        .collect();

    for _ in 1..k {
        let total: f32 = min_distances.iter().sum();
        let chosen = if total > 0.0 {
            let target = rng.random::<f32>() * total;
            let mut cumulative = 0.0;
            let mut pick = n - 1;
            for (i, &weight) in min_distances.iter().enumerate() {
                cumulative += weight;
                if cumulative >= target {
                    pick = i;
                    break;
                }
            }
            pick
        } else {
            // All points coincide with a centroid; fall back to uniform.
            rng.random_range(0..n)
        };

        let chosen_row = rows.row(chosen).to_vec();
        for i in 0..n {
            let distance = l2_squared(rows.row(i), &chosen_row);
            if distance < min_distances[i] {
                min_distances[i] = distance;
            }
        }
        centroids.extend_from_slice(&chosen_row);
    }

    centroids
}

/// Assign every row to its nearest centroid.
fn assign_rows(
    rows: &Rows<'_>,
    centroids: &[f32],
    k: usize,
    pool: Option<&ComputePool>,
) -> Vec<usize> {
    let dim = rows.dim;
    let nearest = |i: usize| -> usize {
        let row = rows.row(i);
        let mut best = 0;
        let mut best_distance = f32::INFINITY;
        for c in 0..k {
            let distance = l2_squared(row, &centroids[c * dim..(c + 1) * dim]);
            if distance < best_distance {
                best_distance = distance;
                best = c;
            }
        }
        best
    };

    match pool {
        Some(pool) if rows.n() > PARALLEL_THRESHOLD => {
            pool.install(|| (0..rows.n()).into_par_iter().map(nearest).collect())
        }
        _ => (0..rows.n()).map(nearest).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Four well-separated clusters in 2D, `per_cluster` points each.
    fn clustered_matrix(per_cluster: usize) -> EmbeddingMatrix {
        let corners = [[0.0f32, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0]];
        let mut rows = Vec::new();
        for (c, corner) in corners.iter().enumerate() {
            for i in 0..per_cluster {
                let jitter = 0.01 * (i as f32 + 1.0) * (c as f32 + 1.0);
                rows.push(vec![corner[0] + jitter, corner[1] - jitter]);
            }
        }
        EmbeddingMatrix::from_rows(rows).unwrap()
    }

    #[test]
    fn test_construction_rejects_bad_geometry() {
        assert!(IvfPqIndex::new(8, 0, 4, 8, 1).is_err());
        assert!(IvfPqIndex::new(1, 4, 0, 8, 1).is_err());
        assert!(IvfPqIndex::new(8, 4, 9, 8, 1).is_err());
        assert!(IvfPqIndex::new(8, 4, 4, 0, 1).is_err());
        assert!(IvfPqIndex::new(8, 4, 4, 16, 1).is_err());
    }

    #[test]
    fn test_split_dimensions_covers_uneven_splits() {
        assert_eq!(split_dimensions(8, 4), vec![2, 2, 2, 2]);
        assert_eq!(split_dimensions(7, 3), vec![3, 2, 2]);
        assert_eq!(split_dimensions(5, 2), vec![3, 2]);
        assert_eq!(split_dimensions(5, 2).iter().sum::<usize>(), 5);
    }

    #[test]
    fn test_add_before_train_is_rejected() {
        let matrix = clustered_matrix(8);
        let mut index = IvfPqIndex::new(2, 4, 1, 8, 1).unwrap();
        assert!(index.add(&matrix).is_err());
        assert!(index.search(&[0.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_train_rejects_too_few_vectors() {
        let matrix = EmbeddingMatrix::from_rows(vec![vec![0.0, 0.0], vec![1.0, 1.0]]).unwrap();
        let mut index = IvfPqIndex::new(2, 4, 1, 8, 1).unwrap();
        let err = index.train(&matrix).unwrap_err();
        assert!(matches!(err, AnnforgeError::Training(_)));
    }

    #[test]
    fn test_train_add_search_finds_same_cluster() {
        let matrix = clustered_matrix(16);
        let mut index = IvfPqIndex::new(2, 4, 1, 8, 4).unwrap();
        index.train(&matrix).unwrap();
        assert!(index.is_trained());

        index.add(&matrix).unwrap();
        assert_eq!(index.ntotal(), matrix.rows());

        // With nprobe == clusters the search is exhaustive over codes; the
        // nearest reported vector for a cluster corner must lie in that
        // cluster (all jitter < 1.0, clusters are 10.0 apart).
        let hits = index.search(&[10.0, 10.0], 3).unwrap();
        assert_eq!(hits.len(), 3);
        for hit in &hits {
            assert!(hit.distance < 5.0, "hit {hit:?} escaped its cluster");
            assert!((48..64).contains(&(hit.row_id as usize)));
        }
        for pair in hits.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[test]
    fn test_training_is_deterministic() {
        let matrix = clustered_matrix(16);
        let build = || {
            let mut index = IvfPqIndex::new(2, 4, 1, 8, 4).unwrap();
            index.train(&matrix).unwrap();
            index.add(&matrix).unwrap();
            index
        };
        let a = build();
        let b = build();
        let query = [0.1, 0.2];
        assert_eq!(a.search(&query, 5).unwrap(), b.search(&query, 5).unwrap());
    }

    #[test]
    fn test_set_search_params_updates_nprobe() {
        let mut index = IvfPqIndex::new(8, 16, 4, 8, 1).unwrap();
        let spec = IndexSpec::derive(IndexVariant::IvfPq, 256, 8);
        index.set_search_params(&spec).unwrap();
        assert_eq!(index.nprobe(), 1); // 16 clusters -> max(1, 16/10)

        let flat_spec = IndexSpec::derive(IndexVariant::Flat, 256, 8);
        assert!(index.set_search_params(&flat_spec).is_err());
    }

    #[test]
    fn test_search_on_trained_empty_index_returns_nothing() {
        let matrix = clustered_matrix(4);
        let mut index = IvfPqIndex::new(2, 4, 1, 8, 2).unwrap();
        index.train(&matrix).unwrap();
        let hits = index.search(&[0.0, 0.0], 5).unwrap();
        assert!(hits.is_empty());
    }
}
