//! Artifact publishing: timestamped index blobs, metadata sidecars, and a
//! movable "latest" pointer per variant.
//!
//! The pointer swap is atomic: the new symlink is created under a
//! temporary name in the same directory and renamed over the final name,
//! so `<variant>_latest.index` always resolves to either the previous or
//! the new artifact, never to nothing. Readers that encounter a missing
//! pointer (artifacts published by other tooling) can still fall back to
//! the newest timestamped file via [`ArtifactPublisher::resolve_latest`].

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::build::config::{IndexVariant, SearchParams};
use crate::build::probe::BenchmarkResult;
use crate::engine::{VectorIndexEngine, save_index};
use crate::error::{AnnforgeError, Result};

/// Build provenance stored next to every published index.
///
/// Created once per build and serialized verbatim; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub variant: String,
    pub num_vectors: usize,
    pub dimension: usize,
    pub build_time_seconds: f64,
    pub performance: BenchmarkResult,
    pub parameters: SearchParams,
}

/// Publishes built indexes into an artifact directory.
pub struct ArtifactPublisher {
    directory: PathBuf,
}

impl ArtifactPublisher {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
        }
    }

    /// Serialize `index` (and `metadata`, if given) under a timestamped
    /// name, then repoint `<variant>_latest.index` at it. Returns the path
    /// of the timestamped blob.
    ///
    /// Filenames have second resolution; two publishes of the same variant
    /// within one second collide and the last write wins.
    pub fn publish(
        &self,
        index: &dyn VectorIndexEngine,
        metadata: Option<&ArtifactMetadata>,
        variant: IndexVariant,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.directory)
            .map_err(|e| AnnforgeError::persist(&self.directory, e.to_string()))?;

        let timestamp = Local::now().format("%Y%m%d-%H%M%S");
        let index_name = format!("{variant}_{timestamp}.index");
        let index_path = self.directory.join(&index_name);

        save_index(index, &index_path)?;
        info!(path = %index_path.display(), "index saved");

        if let Some(metadata) = metadata {
            let meta_path = self.directory.join(format!("{variant}_{timestamp}_meta.json"));
            let file = File::create(&meta_path)
                .map_err(|e| AnnforgeError::persist(&meta_path, e.to_string()))?;
            serde_json::to_writer_pretty(BufWriter::new(file), metadata)
                .map_err(|e| AnnforgeError::persist(&meta_path, e.to_string()))?;
            info!(path = %meta_path.display(), "metadata saved");
        }

        self.update_latest(variant, &index_name)?;
        Ok(index_path)
    }

    /// Atomically repoint the variant's latest pointer at `target_name`
    /// (a filename within the artifact directory).
    fn update_latest(&self, variant: IndexVariant, target_name: &str) -> Result<()> {
        let pointer = self.directory.join(format!("{variant}_latest.index"));
        let staging = self.directory.join(format!(".{variant}_latest.index.tmp"));

        // A leftover staging link from a crashed publish would make the
        // symlink call fail.
        let _ = fs::remove_file(&staging);

        make_link(target_name, &staging)
            .map_err(|e| AnnforgeError::persist(&staging, e.to_string()))?;
        fs::rename(&staging, &pointer)
            .map_err(|e| AnnforgeError::persist(&pointer, e.to_string()))?;

        info!(
            pointer = %pointer.display(),
            points_to = target_name,
            "latest pointer updated"
        );
        Ok(())
    }

    /// Resolve the newest published index for `variant` in `directory`.
    ///
    /// Follows the latest pointer when present; otherwise falls back to
    /// the lexicographically newest timestamped file. Returns `None` when
    /// the variant has never been published there.
    pub fn resolve_latest(directory: &Path, variant: IndexVariant) -> Result<Option<PathBuf>> {
        let pointer = directory.join(format!("{variant}_latest.index"));
        if pointer.symlink_metadata().is_ok() {
            if let Ok(resolved) = pointer.canonicalize() {
                if resolved.is_file() {
                    return Ok(Some(resolved));
                }
            }
        }

        let mut published = Self::published_indexes(directory, variant)?;
        Ok(published.pop())
    }

    /// All timestamped index files for `variant`, sorted oldest first.
    /// The timestamp format sorts lexicographically, so the last entry is
    /// the newest.
    pub fn published_indexes(directory: &Path, variant: IndexVariant) -> Result<Vec<PathBuf>> {
        let prefix = format!("{variant}_");
        let latest_name = format!("{variant}_latest.index");

        let mut paths = Vec::new();
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix) && name.ends_with(".index") && name != latest_name {
                paths.push(entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[cfg(unix)]
fn make_link(target: &str, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn make_link(target: &str, link: &Path) -> std::io::Result<()> {
    // Platforms without symlinks get a plain copy of the blob.
    let source = link
        .parent()
        .map(|dir| dir.join(target))
        .unwrap_or_else(|| PathBuf::from(target));
    fs::copy(source, link).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FlatIndex, load_index};
    use crate::vector::EmbeddingMatrix;

    fn sample_index(rows: usize) -> FlatIndex {
        let data: Vec<f32> = (0..rows * 4).map(|i| i as f32).collect();
        let matrix = EmbeddingMatrix::new(data, rows, 4).unwrap();
        let mut index = FlatIndex::new(4);
        index.add(&matrix).unwrap();
        index
    }

    fn sample_metadata() -> ArtifactMetadata {
        ArtifactMetadata {
            variant: "flat".to_string(),
            num_vectors: 12,
            dimension: 4,
            build_time_seconds: 0.25,
            performance: BenchmarkResult {
                avg_query_time_ms: 0.1,
                queries_per_second: 10_000.0,
            },
            parameters: SearchParams::default(),
        }
    }

    #[test]
    fn test_publish_writes_blob_sidecar_and_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = ArtifactPublisher::new(dir.path());
        let index = sample_index(12);

        let path = publisher
            .publish(&index, Some(&sample_metadata()), IndexVariant::Flat)
            .unwrap();
        assert!(path.is_file());

        let meta_path = path.with_file_name(
            path.file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .replace(".index", "_meta.json"),
        );
        let meta: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(meta_path).unwrap()).unwrap();
        assert_eq!(meta["variant"], "flat");
        assert_eq!(meta["num_vectors"], 12);
        assert_eq!(meta["dimension"], 4);
        assert!(meta["performance"]["avg_query_time_ms"].is_f64());
        assert!(meta["parameters"]["nprobe"].is_null());
        assert!(meta["parameters"]["ef_search"].is_null());

        let latest = ArtifactPublisher::resolve_latest(dir.path(), IndexVariant::Flat)
            .unwrap()
            .expect("latest should resolve");
        assert_eq!(latest.canonicalize().unwrap(), path.canonicalize().unwrap());
    }

    #[test]
    fn test_round_trip_preserves_ntotal() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = ArtifactPublisher::new(dir.path());
        publisher
            .publish(&sample_index(37), None, IndexVariant::Flat)
            .unwrap();

        let latest = ArtifactPublisher::resolve_latest(dir.path(), IndexVariant::Flat)
            .unwrap()
            .unwrap();
        let loaded = load_index(&latest).unwrap();
        assert_eq!(loaded.ntotal(), 37);
    }

    #[test]
    fn test_latest_pointer_moves_to_newer_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = ArtifactPublisher::new(dir.path());

        // Two timestamped blobs written out of band.
        save_index(
            &sample_index(5),
            &dir.path().join("flat_20260101-000000.index"),
        )
        .unwrap();
        save_index(
            &sample_index(9),
            &dir.path().join("flat_20260102-000000.index"),
        )
        .unwrap();

        publisher
            .update_latest(IndexVariant::Flat, "flat_20260101-000000.index")
            .unwrap();
        publisher
            .update_latest(IndexVariant::Flat, "flat_20260102-000000.index")
            .unwrap();

        let latest = ArtifactPublisher::resolve_latest(dir.path(), IndexVariant::Flat)
            .unwrap()
            .unwrap();
        assert!(latest.to_string_lossy().ends_with("flat_20260102-000000.index"));
        assert_eq!(load_index(&latest).unwrap().ntotal(), 9);
    }

    #[test]
    fn test_resolve_latest_falls_back_to_listing() {
        let dir = tempfile::tempdir().unwrap();
        save_index(
            &sample_index(3),
            &dir.path().join("flat_20260101-000000.index"),
        )
        .unwrap();
        save_index(
            &sample_index(6),
            &dir.path().join("flat_20260103-120000.index"),
        )
        .unwrap();

        // No pointer was ever created.
        let latest = ArtifactPublisher::resolve_latest(dir.path(), IndexVariant::Flat)
            .unwrap()
            .unwrap();
        assert!(latest.to_string_lossy().ends_with("flat_20260103-120000.index"));
    }

    #[test]
    fn test_resolve_latest_ignores_other_variants() {
        let dir = tempfile::tempdir().unwrap();
        save_index(
            &sample_index(3),
            &dir.path().join("hnsw_20260101-000000.index"),
        )
        .unwrap();

        assert!(
            ArtifactPublisher::resolve_latest(dir.path(), IndexVariant::Flat)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_unwritable_directory_is_a_persist_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, b"file, not a directory").unwrap();

        let publisher = ArtifactPublisher::new(&blocker);
        let err = publisher
            .publish(&sample_index(2), None, IndexVariant::Flat)
            .unwrap_err();
        assert!(matches!(err, AnnforgeError::Persist { .. }));
    }
}
