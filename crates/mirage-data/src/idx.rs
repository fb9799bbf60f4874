//! IDX file parsing.
//!
//! An IDX file is a big-endian `u32` magic number, one `u32` per dimension
//! and then the raw data. MNIST uses unsigned bytes with one dimension for
//! labels (magic `0x00000801`) and three for images (magic `0x00000803`).

use mirage_core::io::read_bytes_maybe_gzip;
use mirage_core::{InputShape, MirageError, Result};
use ndarray::Array2;
use std::path::Path;

pub const IDX_LABELS_MAGIC: u32 = 0x0000_0801;
pub const IDX_IMAGES_MAGIC: u32 = 0x0000_0803;

/// Decoded image file: one row per image, pixels scaled to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct IdxImages {
    pub pixels: Array2<f32>,
    pub shape: InputShape,
}

struct Header {
    dims: Vec<usize>,
    data_offset: usize,
}

fn read_u32(bytes: &[u8], offset: usize, path: &Path) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| {
            MirageError::DatasetLoad(format!("{}: truncated IDX header", path.display()))
        })
}

fn parse_header(bytes: &[u8], magic: u32, path: &Path) -> Result<Header> {
    let found = read_u32(bytes, 0, path)?;
    if found != magic {
        return Err(MirageError::DatasetLoad(format!(
            "{}: bad IDX magic {:#010x} (expected {:#010x})",
            path.display(),
            found,
            magic
        )));
    }
    let ndims = (magic & 0xff) as usize;
    let dims = (0..ndims)
        .map(|i| read_u32(bytes, 4 + 4 * i, path).map(|d| d as usize))
        .collect::<Result<Vec<_>>>()?;
    let data_offset = 4 + 4 * ndims;
    let expected = dims
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| {
            MirageError::DatasetLoad(format!(
                "{}: IDX dimensions {:?} overflow",
                path.display(),
                dims
            ))
        })?;
    let available = bytes.len() - data_offset;
    if available != expected {
        return Err(MirageError::DatasetLoad(format!(
            "{}: header declares {} bytes of data, file has {}",
            path.display(),
            expected,
            available
        )));
    }
    Ok(Header { dims, data_offset })
}

/// Read an IDX image file (plain or `.gz`).
pub fn read_idx_images(path: &Path) -> Result<IdxImages> {
    let bytes = read_bytes_maybe_gzip(path)?;
    let header = parse_header(&bytes, IDX_IMAGES_MAGIC, path)?;
    let (count, height, width) = (header.dims[0], header.dims[1], header.dims[2]);
    let shape = InputShape::grayscale(height, width);
    let pixels = Array2::from_shape_vec(
        (count, shape.len()),
        bytes[header.data_offset..]
            .iter()
            .map(|&b| f32::from(b) / 255.0)
            .collect(),
    )
    .map_err(|e| MirageError::DatasetLoad(format!("{}: {}", path.display(), e)))?;
    Ok(IdxImages { pixels, shape })
}

/// Read an IDX label file (plain or `.gz`).
pub fn read_idx_labels(path: &Path) -> Result<Vec<usize>> {
    let bytes = read_bytes_maybe_gzip(path)?;
    let header = parse_header(&bytes, IDX_LABELS_MAGIC, path)?;
    Ok(bytes[header.data_offset..]
        .iter()
        .map(|&b| usize::from(b))
        .collect())
}

/// Encode images and labels in IDX format for test fixtures.
#[cfg(test)]
pub(crate) fn encode_idx_images(images: &[Vec<u8>], height: usize, width: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + images.len() * height * width);
    out.extend_from_slice(&IDX_IMAGES_MAGIC.to_be_bytes());
    for dim in [images.len(), height, width] {
        out.extend_from_slice(&(dim as u32).to_be_bytes());
    }
    for image in images {
        out.extend_from_slice(image);
    }
    out
}

#[cfg(test)]
pub(crate) fn encode_idx_labels(labels: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + labels.len());
    out.extend_from_slice(&IDX_LABELS_MAGIC.to_be_bytes());
    out.extend_from_slice(&(labels.len() as u32).to_be_bytes());
    out.extend_from_slice(labels);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_images_and_scales_pixels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images-idx3-ubyte");
        let bytes = encode_idx_images(&[vec![0, 255, 51, 102], vec![255; 4]], 2, 2);
        std::fs::write(&path, bytes).unwrap();

        let images = read_idx_images(&path).unwrap();
        assert_eq!(images.shape, InputShape::grayscale(2, 2));
        assert_eq!(images.pixels.dim(), (2, 4));
        assert_eq!(images.pixels[[0, 0]], 0.0);
        assert_eq!(images.pixels[[0, 1]], 1.0);
        assert!((images.pixels[[0, 2]] - 0.2).abs() < 1e-6);
        assert!(images.pixels.row(1).iter().all(|&p| p == 1.0));
    }

    #[test]
    fn test_reads_labels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels-idx1-ubyte");
        std::fs::write(&path, encode_idx_labels(&[7, 2, 1, 0])).unwrap();
        assert_eq!(read_idx_labels(&path).unwrap(), vec![7, 2, 1, 0]);
    }

    #[test]
    fn test_rejects_wrong_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels");
        std::fs::write(&path, encode_idx_labels(&[1, 2])).unwrap();
        let err = read_idx_images(&path).unwrap_err();
        assert!(err.to_string().contains("bad IDX magic"), "{err}");
    }

    #[test]
    fn test_rejects_truncated_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels");
        let mut bytes = encode_idx_labels(&[1, 2, 3]);
        bytes.pop();
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(
            read_idx_labels(&path),
            Err(MirageError::DatasetLoad(_))
        ));

        std::fs::write(&path, [0u8, 0, 8]).unwrap();
        let err = read_idx_labels(&path).unwrap_err();
        assert!(err.to_string().contains("truncated"), "{err}");

        let mut header = IDX_IMAGES_MAGIC.to_be_bytes().to_vec();
        for _ in 0..3 {
            header.extend_from_slice(&u32::MAX.to_be_bytes());
        }
        std::fs::write(&path, header).unwrap();
        let err = read_idx_images(&path).unwrap_err();
        assert!(matches!(err, MirageError::DatasetLoad(_)));
        assert!(err.to_string().contains("overflow"), "{err}");
    }
}
