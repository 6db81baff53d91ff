//! On-disk index blob format.
//!
//! Layout: 4-byte magic `AFIX`, `u32` LE format version, `u64` LE payload
//! length, bincode payload, `u32` LE CRC32 of the payload. Readers verify
//! magic, version, length and checksum before deserializing anything, so a
//! truncated or partially written file is rejected instead of trusted.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::build::config::IndexVariant;
use crate::engine::{FlatIndex, HnswIndex, IvfPqIndex, VectorIndexEngine};
use crate::error::{AnnforgeError, Result};

const MAGIC: &[u8; 4] = b"AFIX";
const FORMAT_VERSION: u32 = 1;

/// Serializable snapshot of an engine, tagged by variant.
#[derive(Serialize, Deserialize)]
pub enum IndexBlob {
    Flat(FlatIndex),
    IvfPq(IvfPqIndex),
    Hnsw(HnswIndex),
}

impl IndexBlob {
    /// Re-animate the snapshot as a live engine.
    pub fn into_engine(self) -> Box<dyn VectorIndexEngine> {
        match self {
            IndexBlob::Flat(index) => Box::new(index),
            IndexBlob::IvfPq(index) => Box::new(index),
            IndexBlob::Hnsw(index) => Box::new(index),
        }
    }

    fn as_engine(&self) -> &dyn VectorIndexEngine {
        match self {
            IndexBlob::Flat(index) => index,
            IndexBlob::IvfPq(index) => index,
            IndexBlob::Hnsw(index) => index,
        }
    }
}

/// Summary of a validated blob file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobInfo {
    pub variant: IndexVariant,
    pub num_vectors: usize,
    pub dimension: usize,
    pub payload_bytes: u64,
}

/// Serialize an engine to `path` in the envelope format.
pub fn save_index(engine: &dyn VectorIndexEngine, path: &Path) -> Result<()> {
    let blob = engine.to_blob();
    let payload = bincode::serialize(&blob)
        .map_err(|e| AnnforgeError::persist(path, format!("failed to encode index: {e}")))?;

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    let checksum = hasher.finalize();

    let file = File::create(path).map_err(|e| AnnforgeError::persist(path, e.to_string()))?;
    let mut writer = BufWriter::new(file);
    let write = |w: &mut BufWriter<File>| -> std::io::Result<()> {
        w.write_all(MAGIC)?;
        w.write_u32::<LittleEndian>(FORMAT_VERSION)?;
        w.write_u64::<LittleEndian>(payload.len() as u64)?;
        w.write_all(&payload)?;
        w.write_u32::<LittleEndian>(checksum)?;
        w.flush()
    };
    write(&mut writer).map_err(|e| AnnforgeError::persist(path, e.to_string()))?;
    Ok(())
}

fn read_blob(path: &Path) -> Result<(IndexBlob, u64)> {
    let file = File::open(path).map_err(|e| AnnforgeError::missing_input(path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| AnnforgeError::malformed_input(path, format!("short header: {e}")))?;
    if &magic != MAGIC {
        return Err(AnnforgeError::malformed_input(path, "not an annforge index file"));
    }

    let version = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| AnnforgeError::malformed_input(path, format!("short header: {e}")))?;
    if version != FORMAT_VERSION {
        return Err(AnnforgeError::malformed_input(
            path,
            format!("unsupported format version {version}, expected {FORMAT_VERSION}"),
        ));
    }

    let payload_len = reader
        .read_u64::<LittleEndian>()
        .map_err(|e| AnnforgeError::malformed_input(path, format!("short header: {e}")))?;
    let mut payload = vec![0u8; payload_len as usize];
    reader
        .read_exact(&mut payload)
        .map_err(|e| AnnforgeError::malformed_input(path, format!("truncated payload: {e}")))?;

    let stored_checksum = reader
        .read_u32::<LittleEndian>()
        .map_err(|e| AnnforgeError::malformed_input(path, format!("missing checksum: {e}")))?;
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    if hasher.finalize() != stored_checksum {
        return Err(AnnforgeError::malformed_input(path, "checksum mismatch"));
    }

    let blob: IndexBlob = bincode::deserialize(&payload)
        .map_err(|e| AnnforgeError::malformed_input(path, format!("failed to decode index: {e}")))?;
    Ok((blob, payload_len))
}

/// Load an engine from `path`, validating the envelope first.
pub fn load_index(path: &Path) -> Result<Box<dyn VectorIndexEngine>> {
    let (blob, _) = read_blob(path)?;
    Ok(blob.into_engine())
}

/// Validate the envelope of a blob file and report what it contains.
pub fn validate_index_file(path: &Path) -> Result<BlobInfo> {
    let (blob, payload_bytes) = read_blob(path)?;
    let engine = blob.as_engine();
    Ok(BlobInfo {
        variant: engine.variant(),
        num_vectors: engine.ntotal(),
        dimension: engine.dimension(),
        payload_bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::EmbeddingMatrix;

    fn sample_index() -> FlatIndex {
        let matrix = EmbeddingMatrix::from_rows(vec![
            vec![0.0, 0.0, 1.0],
            vec![1.0, 1.0, 0.0],
            vec![2.0, 0.5, 0.5],
        ])
        .unwrap();
        let mut index = FlatIndex::new(3);
        index.add(&matrix).unwrap();
        index
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.index");

        let index = sample_index();
        save_index(&index, &path).unwrap();

        let loaded = load_index(&path).unwrap();
        assert_eq!(loaded.variant(), IndexVariant::Flat);
        assert_eq!(loaded.ntotal(), 3);
        assert_eq!(loaded.dimension(), 3);

        let hits = loaded.search(&[1.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].row_id, 1);
        assert_eq!(hits[0].distance, 0.0);
    }

    #[test]
    fn test_validate_reports_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.index");
        save_index(&sample_index(), &path).unwrap();

        let info = validate_index_file(&path).unwrap();
        assert_eq!(info.variant, IndexVariant::Flat);
        assert_eq!(info.num_vectors, 3);
        assert_eq!(info.dimension, 3);
        assert!(info.payload_bytes > 0);
    }

    #[test]
    fn test_missing_file_is_reported_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_index(&dir.path().join("nope.index")).err().unwrap();
        assert!(matches!(err, AnnforgeError::MissingInput { .. }));
    }

    #[test]
    fn test_corrupt_payload_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.index");
        save_index(&sample_index(), &path).unwrap();

        // Flip one payload byte past the 16-byte header.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[20] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = load_index(&path).err().unwrap();
        assert!(matches!(err, AnnforgeError::MalformedInput { .. }));
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flat.index");
        save_index(&sample_index(), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        assert!(load_index(&path).is_err());
    }

    #[test]
    fn test_foreign_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not_an_index.bin");
        std::fs::write(&path, b"definitely not an index").unwrap();

        let err = load_index(&path).err().unwrap();
        assert!(matches!(err, AnnforgeError::MalformedInput { .. }));
    }
}
