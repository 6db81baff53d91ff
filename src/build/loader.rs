//! Embedding matrix loading and sanitization.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{info, warn};

use crate::error::{AnnforgeError, Result};
use crate::vector::EmbeddingMatrix;

const MATRIX_MAGIC: &[u8; 4] = b"VMAT";
const MATRIX_FORMAT_VERSION: u32 = 1;

/// Loads a stored embedding matrix and sanitizes it for indexing.
///
/// Two formats are supported, dispatched on the file extension:
/// - `.json`: a JSON array of equal-length numeric arrays;
/// - anything else: raw binary — magic `VMAT`, `u32` LE version, `u32` LE
///   row count, `u32` LE dimension, then `rows * dim` f32 LE values in
///   row-major order.
///
/// Non-finite entries are zero-filled and counted rather than rejected;
/// vectors are never normalized (L2 is the only supported metric).
pub struct EmbeddingLoader;

impl EmbeddingLoader {
    /// Load and sanitize the matrix at `path`.
    pub fn load(path: &Path) -> Result<EmbeddingMatrix> {
        let mut matrix = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::load_json(path)?,
            _ => Self::load_binary(path)?,
        };
        info!(
            rows = matrix.rows(),
            dim = matrix.dim(),
            path = %path.display(),
            "loaded embeddings"
        );

        let replaced = matrix.sanitize();
        if replaced > 0 {
            warn!(
                replaced,
                "embeddings contain non-finite values, replaced with zeros"
            );
        }

        Ok(matrix)
    }

    fn open(path: &Path) -> Result<File> {
        File::open(path).map_err(|e| AnnforgeError::missing_input(path, e.to_string()))
    }

    fn load_json(path: &Path) -> Result<EmbeddingMatrix> {
        let reader = BufReader::new(Self::open(path)?);
        let rows: Vec<Vec<f32>> = serde_json::from_reader(reader)
            .map_err(|e| AnnforgeError::malformed_input(path, e.to_string()))?;
        EmbeddingMatrix::from_rows(rows)
            .map_err(|e| AnnforgeError::malformed_input(path, e.to_string()))
    }

    fn load_binary(path: &Path) -> Result<EmbeddingMatrix> {
        let mut reader = BufReader::new(Self::open(path)?);

        let mut magic = [0u8; 4];
        reader
            .read_exact(&mut magic)
            .map_err(|e| AnnforgeError::malformed_input(path, format!("short header: {e}")))?;
        if &magic != MATRIX_MAGIC {
            return Err(AnnforgeError::malformed_input(
                path,
                "not an embedding matrix file",
            ));
        }

        let version = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| AnnforgeError::malformed_input(path, format!("short header: {e}")))?;
        if version != MATRIX_FORMAT_VERSION {
            return Err(AnnforgeError::malformed_input(
                path,
                format!("unsupported matrix format version {version}"),
            ));
        }

        let rows = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| AnnforgeError::malformed_input(path, format!("short header: {e}")))?
            as usize;
        let dim = reader
            .read_u32::<LittleEndian>()
            .map_err(|e| AnnforgeError::malformed_input(path, format!("short header: {e}")))?
            as usize;
        if rows == 0 || dim == 0 {
            return Err(AnnforgeError::malformed_input(
                path,
                format!("matrix shape {rows}x{dim} is empty"),
            ));
        }

        let mut data = vec![0.0f32; rows * dim];
        reader
            .read_f32_into::<LittleEndian>(&mut data)
            .map_err(|e| AnnforgeError::malformed_input(path, format!("truncated matrix: {e}")))?;

        EmbeddingMatrix::new(data, rows, dim)
            .map_err(|e| AnnforgeError::malformed_input(path, e.to_string()))
    }

    /// Write a matrix in the raw binary format. Counterpart to
    /// [`load`](Self::load) for tooling and tests.
    pub fn write_binary(path: &Path, matrix: &EmbeddingMatrix) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MATRIX_MAGIC)?;
        writer.write_u32::<LittleEndian>(MATRIX_FORMAT_VERSION)?;
        writer.write_u32::<LittleEndian>(matrix.rows() as u32)?;
        writer.write_u32::<LittleEndian>(matrix.dim() as u32)?;
        for &value in matrix.as_slice() {
            writer.write_f32::<LittleEndian>(value)?;
        }
        writer.flush()?;
        Ok(())
    }
}
