use std::fs;
use std::path::Path;

use annforge::build::config::IndexVariant;
use annforge::build::pipeline::BuildPipeline;
use annforge::build::publisher::ArtifactPublisher;
use annforge::engine::{VectorIndexEngine, load_index};
use annforge::error::AnnforgeError;

#[test]
fn flat_build_publishes_artifact_metadata_and_latest_pointer() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let data = write_json_matrix(input_dir.path(), 40, 4);

    let report = BuildPipeline::new(&data, output_dir.path(), "flat")
        .with_acceleration(false)
        .run()
        .unwrap();

    assert!(report.artifact_path.is_file());
    assert_eq!(report.metadata.variant, "flat");
    assert_eq!(report.metadata.num_vectors, 40);
    assert_eq!(report.metadata.dimension, 4);
    assert!(report.metadata.build_time_seconds > 0.0);
    assert!(report.metadata.performance.avg_query_time_ms > 0.0);
    assert!(report.metadata.performance.queries_per_second > 0.0);
    assert_eq!(report.metadata.parameters.nprobe, None);
    assert_eq!(report.metadata.parameters.ef_search, None);

    // The sidecar sits next to the blob and carries the same record.
    let sidecar = sidecar_path(&report.artifact_path);
    let meta: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(sidecar).unwrap()).unwrap();
    assert_eq!(meta["variant"], "flat");
    assert_eq!(meta["num_vectors"], 40);
    assert_eq!(meta["parameters"]["nprobe"], serde_json::Value::Null);

    // The latest pointer resolves to the published blob.
    let latest = ArtifactPublisher::resolve_latest(output_dir.path(), IndexVariant::Flat)
        .unwrap()
        .expect("latest should resolve");
    assert_eq!(
        latest.canonicalize().unwrap(),
        report.artifact_path.canonicalize().unwrap()
    );
}

#[test]
fn published_flat_index_round_trips_with_exact_search() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let data = write_json_matrix(input_dir.path(), 25, 3);

    BuildPipeline::new(&data, output_dir.path(), "flat")
        .with_acceleration(false)
        .run()
        .unwrap();

    let latest = ArtifactPublisher::resolve_latest(output_dir.path(), IndexVariant::Flat)
        .unwrap()
        .unwrap();
    let index = load_index(&latest).unwrap();
    assert_eq!(index.ntotal(), 25);

    // Exact search finds every original vector as its own nearest neighbor.
    for i in 0..25 {
        let query = matrix_row(i, 3);
        let hits = index.search(&query, 1).unwrap();
        assert_eq!(hits[0].row_id, i as u64);
        assert_eq!(hits[0].distance, 0.0);
    }
}

#[test]
fn ivfpq_build_records_derived_nprobe() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let data = write_json_matrix(input_dir.path(), 300, 16);

    let report = BuildPipeline::new(&data, output_dir.path(), "ivfpq")
        .run()
        .unwrap();

    assert_eq!(report.metadata.variant, "ivfpq");
    assert_eq!(report.metadata.num_vectors, 300);
    // round(sqrt(300)) = 17 clusters -> nprobe max(1, 17/10) = 1.
    assert_eq!(report.metadata.parameters.nprobe, Some(1));
    assert_eq!(report.metadata.parameters.ef_search, None);

    let index = load_index(&report.artifact_path).unwrap();
    assert_eq!(index.ntotal(), 300);
    assert!(!index.search(&matrix_row(0, 16), 5).unwrap().is_empty());
}

#[test]
fn hnsw_build_records_ef_search_and_round_trips() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let data = write_json_matrix(input_dir.path(), 80, 8);

    let report = BuildPipeline::new(&data, output_dir.path(), "hnsw")
        .with_acceleration(false)
        .run()
        .unwrap();

    assert_eq!(report.metadata.parameters.ef_search, Some(64));
    assert_eq!(report.metadata.parameters.nprobe, None);

    let latest = ArtifactPublisher::resolve_latest(output_dir.path(), IndexVariant::Hnsw)
        .unwrap()
        .unwrap();
    let index = load_index(&latest).unwrap();
    assert_eq!(index.ntotal(), 80);

    let hits = index.search(&matrix_row(7, 8), 1).unwrap();
    assert_eq!(hits[0].row_id, 7);
}

#[test]
fn unsupported_variant_aborts_before_writing_anything() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();
    let data = write_json_matrix(input_dir.path(), 10, 4);

    let err = BuildPipeline::new(&data, output_dir.path(), "lsh")
        .run()
        .unwrap_err();
    assert!(matches!(err, AnnforgeError::UnsupportedVariant(name) if name == "lsh"));

    assert_eq!(fs::read_dir(output_dir.path()).unwrap().count(), 0);
}

#[test]
fn missing_input_aborts_before_writing_anything() {
    let output_dir = tempfile::tempdir().unwrap();

    let err = BuildPipeline::new("/no/such/embeddings.json", output_dir.path(), "flat")
        .run()
        .unwrap_err();
    assert!(matches!(err, AnnforgeError::MissingInput { .. }));

    assert_eq!(fs::read_dir(output_dir.path()).unwrap().count(), 0);
}

#[test]
fn failed_build_leaves_previous_artifacts_untouched() {
    let input_dir = tempfile::tempdir().unwrap();
    let output_dir = tempfile::tempdir().unwrap();

    let good = write_json_matrix(input_dir.path(), 30, 4);
    BuildPipeline::new(&good, output_dir.path(), "flat")
        .with_acceleration(false)
        .run()
        .unwrap();
    let latest_before = ArtifactPublisher::resolve_latest(output_dir.path(), IndexVariant::Flat)
        .unwrap()
        .unwrap();

    // Two vectors cannot be partitioned into the minimum of four clusters,
    // so IVFPQ training fails after loading but before publishing.
    let tiny = input_dir.path().join("tiny.json");
    fs::write(&tiny, "[[0.0, 0.0, 0.0, 0.0], [1.0, 1.0, 1.0, 1.0]]").unwrap();
    let err = BuildPipeline::new(&tiny, output_dir.path(), "ivfpq")
        .run()
        .unwrap_err();
    assert!(matches!(err, AnnforgeError::Training(_)));

    let latest_after = ArtifactPublisher::resolve_latest(output_dir.path(), IndexVariant::Flat)
        .unwrap()
        .unwrap();
    assert_eq!(latest_before, latest_after);
    assert!(
        ArtifactPublisher::published_indexes(output_dir.path(), IndexVariant::IvfPq)
            .unwrap()
            .is_empty()
    );
}

/// Deterministic test row: spreads vectors out so nearest-neighbor results
/// are unambiguous.
fn matrix_row(i: usize, dim: usize) -> Vec<f32> {
    (0..dim)
        .map(|j| (i * dim + j) as f32 * 0.5 + (i as f32) * 3.0)
        .collect()
}

fn write_json_matrix(dir: &Path, rows: usize, dim: usize) -> std::path::PathBuf {
    let matrix: Vec<Vec<f32>> = (0..rows).map(|i| matrix_row(i, dim)).collect();
    let path = dir.join("embeddings.json");
    fs::write(&path, serde_json::to_string(&matrix).unwrap()).unwrap();
    path
}

/// The metadata sidecar sits beside the index blob, named by replacing the
/// `.index` suffix with `_meta.json` (see `ArtifactPublisher::publish`).
fn sidecar_path(index_path: &Path) -> std::path::PathBuf {
    let name = index_path.file_name().unwrap().to_string_lossy();
    index_path.with_file_name(name.replace(".index", "_meta.json"))
}
