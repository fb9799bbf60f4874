//! File helpers shared by the dataset loader and model checkpoints.
//!
//! Paths ending in `.gz` are transparently gzip-decoded on read and
//! gzip-encoded on write.

use crate::{MirageError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

fn is_gzip(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("gz")
}

fn with_path(path: &Path, e: std::io::Error) -> MirageError {
    MirageError::Io(std::io::Error::new(
        e.kind(),
        format!("{}: {}", path.display(), e),
    ))
}

pub fn read_bytes_maybe_gzip(path: &Path) -> Result<Vec<u8>> {
    if !is_gzip(path) {
        return std::fs::read(path).map_err(|e| with_path(path, e));
    }

    let file = File::open(path).map_err(|e| with_path(path, e))?;
    let mut decoder = GzDecoder::new(file);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(|e| {
        MirageError::DatasetLoad(format!(
            "failed to decode gzip {}: {}",
            path.display(),
            e
        ))
    })?;
    Ok(out)
}

pub fn write_bytes_maybe_gzip(path: &Path, bytes: &[u8]) -> Result<()> {
    if !is_gzip(path) {
        return std::fs::write(path, bytes).map_err(|e| with_path(path, e));
    }

    let file = File::create(path).map_err(|e| with_path(path, e))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish().map(|_| ()))
        .map_err(|e| with_path(path, e))
}
