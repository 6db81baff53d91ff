//! Command implementations for the annforge CLI.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::build::config::IndexVariant;
use crate::build::pipeline::BuildPipeline;
use crate::build::publisher::{ArtifactMetadata, ArtifactPublisher};
use crate::cli::args::*;
use crate::cli::output::*;
use crate::engine::validate_index_file;
use crate::error::Result;

/// Execute a CLI command.
pub fn execute_command(args: AnnforgeArgs) -> Result<()> {
    match &args.command {
        Command::Build(build_args) => build_index(build_args.clone(), &args),
        Command::List(list_args) => list_artifacts(list_args.clone(), &args),
        Command::Validate(validate_args) => validate_index(validate_args.clone(), &args),
    }
}

/// Build, benchmark and publish an index.
fn build_index(args: BuildArgs, cli_args: &AnnforgeArgs) -> Result<()> {
    let pipeline = BuildPipeline::new(&args.data, &args.output_dir, args.index_type.name())
        .with_acceleration(!args.no_accel)
        .with_benchmark_top_k(args.top_k);

    let report = pipeline.run()?;
    print_build_report(&report, cli_args)
}

/// List published artifacts for every variant.
fn list_artifacts(args: ListArgs, cli_args: &AnnforgeArgs) -> Result<()> {
    let mut entries = Vec::new();

    for variant in [IndexVariant::Flat, IndexVariant::IvfPq, IndexVariant::Hnsw] {
        let latest = ArtifactPublisher::resolve_latest(&args.directory, variant)?;
        for path in ArtifactPublisher::published_indexes(&args.directory, variant)? {
            let is_latest = latest
                .as_deref()
                .is_some_and(|l| paths_match(l, &path));
            let metadata = if args.long {
                read_sidecar(&path)
            } else {
                None
            };
            entries.push(ArtifactEntry {
                variant: variant.name().to_string(),
                path: path.display().to_string(),
                latest: is_latest,
                metadata,
            });
        }
    }

    print_artifact_list(&entries, cli_args)
}

/// Validate an index blob's envelope and report its contents.
fn validate_index(args: ValidateArgs, cli_args: &AnnforgeArgs) -> Result<()> {
    let info = validate_index_file(&args.index_file)?;
    print_blob_info(&args.index_file, &info, cli_args)
}

fn paths_match(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Best-effort read of an artifact's metadata sidecar.
fn read_sidecar(index_path: &Path) -> Option<ArtifactMetadata> {
    let name = index_path.file_name()?.to_str()?;
    let sidecar = index_path.with_file_name(name.replace(".index", "_meta.json"));
    let file = File::open(sidecar).ok()?;
    serde_json::from_reader(BufReader::new(file)).ok()
}
