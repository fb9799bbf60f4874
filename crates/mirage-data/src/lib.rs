//! Datasets for Mirage experiments.
//!
//! - [`idx`]: the IDX binary format used by MNIST
//! - [`mnist`]: locating and loading the four MNIST files
//! - [`synthetic`]: a deterministic prototype-plus-noise dataset
//! - [`split`]: carving the adversary's seed set out of the test split

pub mod idx;
pub mod mnist;
pub mod split;
pub mod synthetic;

pub use idx::{read_idx_images, read_idx_labels, IdxImages};
pub use mnist::load_mnist;
pub use split::holdout_split;
pub use synthetic::{synthetic, SyntheticSpec};

use mirage_core::{InputShape, LabeledSet, MirageError, Result};
use serde::{Deserialize, Serialize};

/// Train and test splits of one image classification task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub train: LabeledSet,
    pub test: LabeledSet,
    pub shape: InputShape,
    pub num_classes: usize,
}

impl Dataset {
    /// Check that both splits match `shape` and carry labels below
    /// `num_classes`.
    pub fn validate(&self) -> Result<()> {
        for (name, split) in [("train", &self.train), ("test", &self.test)] {
            if split.is_empty() {
                return Err(MirageError::EmptyDataset(format!("{name} split is empty")));
            }
            if split.input_dim() != self.shape.len() {
                return Err(MirageError::shape_mismatch(
                    vec![self.shape.len()],
                    vec![split.input_dim()],
                ));
            }
            split.check_labels(self.num_classes)?;
        }
        Ok(())
    }
}
