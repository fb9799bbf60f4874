//! MNIST loading from a directory of IDX files.

use crate::idx::{read_idx_images, read_idx_labels};
use crate::Dataset;
use mirage_core::{InputShape, LabeledSet, MirageError, Result};
use std::path::{Path, PathBuf};
use tracing::info;

pub const MNIST_CLASSES: usize = 10;

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

/// `dir/name`, or `dir/name.gz` if only the compressed file exists.
fn locate(dir: &Path, name: &str) -> Result<PathBuf> {
    let plain = dir.join(name);
    if plain.is_file() {
        return Ok(plain);
    }
    let gz = dir.join(format!("{name}.gz"));
    if gz.is_file() {
        return Ok(gz);
    }
    Err(MirageError::DatasetLoad(format!(
        "{} not found (also tried {})",
        plain.display(),
        gz.display()
    )))
}

fn load_split(dir: &Path, images: &str, labels: &str) -> Result<(LabeledSet, InputShape)> {
    let images = read_idx_images(&locate(dir, images)?)?;
    let labels_path = locate(dir, labels)?;
    let labels = read_idx_labels(&labels_path)?;
    if labels.len() != images.pixels.nrows() {
        return Err(MirageError::DatasetLoad(format!(
            "{} has {} labels for {} images",
            labels_path.display(),
            labels.len(),
            images.pixels.nrows()
        )));
    }
    Ok((LabeledSet::new(images.pixels, labels)?, images.shape))
}

/// Load the standard MNIST train and test files from `dir`.
pub fn load_mnist(dir: &Path) -> Result<Dataset> {
    let (train, shape) = load_split(dir, TRAIN_IMAGES, TRAIN_LABELS)?;
    let (test, test_shape) = load_split(dir, TEST_IMAGES, TEST_LABELS)?;
    if test_shape != shape {
        return Err(MirageError::DatasetLoad(format!(
            "train images are {shape} but test images are {test_shape}"
        )));
    }

    let dataset = Dataset {
        train,
        test,
        shape,
        num_classes: MNIST_CLASSES,
    };
    dataset.validate()?;
    info!(
        "loaded MNIST from {}: {} train, {} test, {}",
        dir.display(),
        dataset.train.len(),
        dataset.test.len(),
        shape
    );
    Ok(dataset)
}
