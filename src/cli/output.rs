//! Output formatting for CLI results.

use std::path::Path;

use serde::Serialize;

use crate::build::pipeline::BuildReport;
use crate::build::publisher::ArtifactMetadata;
use crate::cli::args::{AnnforgeArgs, OutputFormat};
use crate::engine::BlobInfo;
use crate::error::Result;

/// One row of `annforge list` output.
#[derive(Debug, Serialize)]
pub struct ArtifactEntry {
    pub variant: String,
    pub path: String,
    pub latest: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ArtifactMetadata>,
}

/// Print the result of a build command.
pub fn print_build_report(report: &BuildReport, args: &AnnforgeArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Json => {
            #[derive(Serialize)]
            struct JsonReport<'a> {
                artifact_path: String,
                #[serde(flatten)]
                metadata: &'a ArtifactMetadata,
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&JsonReport {
                    artifact_path: report.artifact_path.display().to_string(),
                    metadata: &report.metadata,
                })?
            );
        }
        OutputFormat::Human => {
            if args.verbosity() > 0 {
                let meta = &report.metadata;
                println!(
                    "Success! {} index over {} vectors (dimension {}) published to: {}",
                    meta.variant,
                    meta.num_vectors,
                    meta.dimension,
                    report.artifact_path.display()
                );
                println!(
                    "  build time: {:.2}s, avg query: {:.3} ms, throughput: {:.0} qps",
                    meta.build_time_seconds,
                    meta.performance.avg_query_time_ms,
                    meta.performance.queries_per_second
                );
                if let Some(nprobe) = meta.parameters.nprobe {
                    println!("  nprobe: {nprobe}");
                }
                if let Some(ef_search) = meta.parameters.ef_search {
                    println!("  ef_search: {ef_search}");
                }
            }
        }
    }
    Ok(())
}

/// Print the result of a list command.
pub fn print_artifact_list(entries: &[ArtifactEntry], args: &AnnforgeArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(entries)?);
        }
        OutputFormat::Human => {
            if entries.is_empty() {
                if args.verbosity() > 0 {
                    println!("No published indexes found.");
                }
                return Ok(());
            }
            for entry in entries {
                let marker = if entry.latest { " (latest)" } else { "" };
                println!("{:<6} {}{}", entry.variant, entry.path, marker);
                if let Some(meta) = &entry.metadata {
                    println!(
                        "       {} vectors, dimension {}, built in {:.2}s, {:.0} qps",
                        meta.num_vectors,
                        meta.dimension,
                        meta.build_time_seconds,
                        meta.performance.queries_per_second
                    );
                }
            }
        }
    }
    Ok(())
}

/// Print the result of a validate command.
pub fn print_blob_info(path: &Path, info: &BlobInfo, args: &AnnforgeArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(info)?);
        }
        OutputFormat::Human => {
            if args.verbosity() > 0 {
                println!(
                    "{} is a valid {} index: {} vectors, dimension {}, {} payload bytes",
                    path.display(),
                    info.variant,
                    info.num_vectors,
                    info.dimension,
                    info.payload_bytes
                );
            }
        }
    }
    Ok(())
}
