//! Error types for the annforge library.
//!
//! All failures are represented by the [`AnnforgeError`] enum. The variants
//! follow the build pipeline: input loading, configuration, index
//! construction, benchmarking and publishing each have their own error kind
//! so a failed build reports which stage gave up and why.
//!
//! # Examples
//!
//! ```
//! use annforge::error::{AnnforgeError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(AnnforgeError::unsupported_variant("lsh"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;
use std::path::{Path, PathBuf};

use anyhow;
use thiserror::Error;

/// The main error type for annforge operations.
#[derive(Error, Debug)]
pub enum AnnforgeError {
    /// The input matrix file could not be located or opened.
    #[error("input not found: {path}: {detail}")]
    MissingInput { path: PathBuf, detail: String },

    /// The input file was read but does not contain a rank-2 f32 matrix.
    #[error("malformed input: {path}: {reason}")]
    MalformedInput { path: PathBuf, reason: String },

    /// The requested index variant is not one of flat/ivfpq/hnsw.
    #[error("unsupported index variant: {0}")]
    UnsupportedVariant(String),

    /// Index training failed (IVFPQ coarse or product quantizer).
    #[error("training failed: {0}")]
    Training(String),

    /// The number of indexed vectors does not match the input row count.
    #[error("population mismatch: index holds {actual} vectors, expected {expected}")]
    PopulationMismatch { expected: usize, actual: usize },

    /// A search issued against the built index failed.
    #[error("search failed: {0}")]
    Search(String),

    /// Writing or serializing a published artifact failed.
    #[error("persist failed: {path}: {detail}")]
    Persist { path: PathBuf, detail: String },

    /// Invalid operation against an engine or builder.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error.
    #[error("error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with AnnforgeError.
pub type Result<T> = std::result::Result<T, AnnforgeError>;

impl AnnforgeError {
    /// Create a new missing-input error.
    pub fn missing_input<P: AsRef<Path>, S: Into<String>>(path: P, detail: S) -> Self {
        AnnforgeError::MissingInput {
            path: path.as_ref().to_path_buf(),
            detail: detail.into(),
        }
    }

    /// Create a new malformed-input error.
    pub fn malformed_input<P: AsRef<Path>, S: Into<String>>(path: P, reason: S) -> Self {
        AnnforgeError::MalformedInput {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Create a new unsupported-variant error.
    pub fn unsupported_variant<S: Into<String>>(name: S) -> Self {
        AnnforgeError::UnsupportedVariant(name.into())
    }

    /// Create a new training error.
    pub fn training<S: Into<String>>(msg: S) -> Self {
        AnnforgeError::Training(msg.into())
    }

    /// Create a new search error.
    pub fn search<S: Into<String>>(msg: S) -> Self {
        AnnforgeError::Search(msg.into())
    }

    /// Create a new persist error.
    pub fn persist<P: AsRef<Path>, S: Into<String>>(path: P, detail: S) -> Self {
        AnnforgeError::Persist {
            path: path.as_ref().to_path_buf(),
            detail: detail.into(),
        }
    }

    /// Create a new invalid-operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        AnnforgeError::InvalidOperation(msg.into())
    }
}
