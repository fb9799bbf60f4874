//! Core types and traits for Mirage black-box substitute attacks.
//!
//! This crate provides the abstractions shared by the model, data and attack
//! crates:
//! - [`LabeledSet`]: inputs paired with class-index labels
//! - [`GradientBundle`]: per-class input gradients of a model at one point
//! - [`Classifier`], [`Trainable`], [`Differentiable`]: the capabilities an
//!   oracle or a substitute model exposes to the attack
//! - [`MirageError`] and the crate-wide [`Result`]
//! - configuration structs in [`config`]

pub mod config;
pub mod io;

pub use config::{
    AttackConfig, AugmentConfig, AugmentationLayout, FgsmConfig, OptimizerKind, TrainParams,
};

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

/// Error types for Mirage operations.
#[derive(Error, Debug)]
pub enum MirageError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    #[error("Label {label} out of range for {num_classes} classes")]
    LabelOutOfRange { label: usize, num_classes: usize },

    #[error("Non-finite value: {0}")]
    NonFinite(String),

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Dataset loading failed: {0}")]
    DatasetLoad(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MirageError {
    /// Create a ShapeMismatch error.
    pub fn shape_mismatch(expected: Vec<usize>, got: Vec<usize>) -> Self {
        debug_assert!(
            expected != got,
            "ShapeMismatch created with identical shapes {expected:?}"
        );
        MirageError::ShapeMismatch { expected, got }
    }
}

pub type Result<T> = std::result::Result<T, MirageError>;

/// Fail with [`MirageError::ShapeMismatch`] unless `got == expected`.
#[inline]
pub fn check_width(expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(MirageError::shape_mismatch(vec![expected], vec![got]))
    }
}

/// Index of the largest element; the first one wins on ties.
pub fn argmax(row: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (idx, &value) in row.iter().enumerate() {
        if value > best_value {
            best = idx;
            best_value = value;
        }
    }
    best
}

/// Row-wise [`argmax`].
pub fn argmax_rows(values: &Array2<f32>) -> Vec<usize> {
    values.axis_iter(Axis(0)).map(argmax).collect()
}

/// Geometry of an image input, stored channel-major in a flat row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl InputShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Single-channel `height × width` image.
    pub fn grayscale(height: usize, width: usize) -> Self {
        Self::new(1, height, width)
    }

    /// Flattened length of one input.
    pub fn len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Display for InputShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.channels, self.height, self.width)
    }
}

/// Ordered (input, label) pairs.
///
/// Inputs are rows of a `len × input_dim` matrix. The constructor enforces
/// one label per row, including when deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLabeledSet")]
pub struct LabeledSet {
    inputs: Array2<f32>,
    labels: Vec<usize>,
}

#[derive(Deserialize)]
struct RawLabeledSet {
    inputs: Array2<f32>,
    labels: Vec<usize>,
}

impl TryFrom<RawLabeledSet> for LabeledSet {
    type Error = MirageError;

    fn try_from(raw: RawLabeledSet) -> Result<Self> {
        Self::new(raw.inputs, raw.labels)
    }
}

impl LabeledSet {
    /// Pair inputs with labels.
    pub fn new(inputs: Array2<f32>, labels: Vec<usize>) -> Result<Self> {
        if inputs.nrows() != labels.len() {
            return Err(MirageError::shape_mismatch(
                vec![inputs.nrows()],
                vec![labels.len()],
            ));
        }
        Ok(Self { inputs, labels })
    }

    pub fn inputs(&self) -> &Array2<f32> {
        &self.inputs
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn into_parts(self) -> (Array2<f32>, Vec<usize>) {
        (self.inputs, self.labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of features per input row.
    pub fn input_dim(&self) -> usize {
        self.inputs.ncols()
    }

    /// Copy out the rows in `range`.
    pub fn slice(&self, range: Range<usize>) -> Result<Self> {
        if range.start > range.end || range.end > self.len() {
            return Err(MirageError::shape_mismatch(
                vec![self.len()],
                vec![range.start, range.end],
            ));
        }
        Ok(Self {
            inputs: self
                .inputs
                .slice(ndarray::s![range.clone(), ..])
                .to_owned(),
            labels: self.labels[range].to_vec(),
        })
    }

    /// Split into `[0, k)` and `[k, len)`.
    pub fn split_at(&self, k: usize) -> Result<(Self, Self)> {
        Ok((self.slice(0..k)?, self.slice(k..self.len())?))
    }

    /// Fail if any label is `>= num_classes`.
    pub fn check_labels(&self, num_classes: usize) -> Result<()> {
        match self.labels.iter().find(|&&label| label >= num_classes) {
            Some(&label) => Err(MirageError::LabelOutOfRange { label, num_classes }),
            None => Ok(()),
        }
    }

    /// Categorical (one-hot) encoding of the labels.
    pub fn one_hot(&self, num_classes: usize) -> Result<Array2<f32>> {
        self.check_labels(num_classes)?;
        let mut encoded = Array2::zeros((self.len(), num_classes));
        for (row, &label) in self.labels.iter().enumerate() {
            encoded[[row, label]] = 1.0;
        }
        Ok(encoded)
    }
}

/// Per-class input gradients of a model evaluated at a single input.
///
/// Row `c` holds the derivative of the model's output for class `c` with
/// respect to every input feature.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientBundle {
    gradients: Array2<f32>,
}

impl GradientBundle {
    /// Wrap a `num_classes × input_dim` Jacobian.
    pub fn new(gradients: Array2<f32>) -> Self {
        Self { gradients }
    }

    pub fn num_classes(&self) -> usize {
        self.gradients.nrows()
    }

    pub fn input_dim(&self) -> usize {
        self.gradients.ncols()
    }

    /// Gradient of the output for `class`.
    pub fn class(&self, class: usize) -> Result<ArrayView1<'_, f32>> {
        if class >= self.num_classes() {
            return Err(MirageError::LabelOutOfRange {
                label: class,
                num_classes: self.num_classes(),
            });
        }
        Ok(self.gradients.row(class))
    }

    pub fn as_array(&self) -> &Array2<f32> {
        &self.gradients
    }

    /// Fail with [`MirageError::NonFinite`] if any entry is NaN or infinite.
    pub fn ensure_finite(&self) -> Result<()> {
        if let Some(((class, feature), value)) = self
            .gradients
            .indexed_iter()
            .find(|(_, value)| !value.is_finite())
        {
            return Err(MirageError::NonFinite(format!(
                "gradient of class {class} at feature {feature} is {value}"
            )));
        }
        Ok(())
    }
}

/// Per-epoch training metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    /// Mean cross-entropy over the epoch's minibatches.
    pub loss: f32,
    /// Training accuracy measured during the epoch.
    pub accuracy: f32,
}

/// Metrics recorded by a training call, one entry per epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }
}

/// A model that maps inputs to class probabilities.
pub trait Classifier {
    fn num_classes(&self) -> usize;

    /// Features expected per input row.
    fn input_dim(&self) -> usize;

    /// Class probabilities, one row per input (`n × num_classes`).
    fn predict_proba(&self, inputs: ArrayView2<'_, f32>) -> Result<Array2<f32>>;

    /// Most likely class per input.
    fn predict(&self, inputs: ArrayView2<'_, f32>) -> Result<Vec<usize>> {
        let probs = self.predict_proba(inputs)?;
        Ok(argmax_rows(&probs))
    }

    /// Fraction of `set` classified correctly.
    fn evaluate(&self, set: &LabeledSet) -> Result<f32> {
        if set.is_empty() {
            return Err(MirageError::EmptyDataset(
                "cannot evaluate on an empty set".to_string(),
            ));
        }
        let predicted = self.predict(set.inputs().view())?;
        let correct = predicted
            .iter()
            .zip(set.labels())
            .filter(|(p, y)| p == y)
            .count();
        Ok(correct as f32 / set.len() as f32)
    }
}

/// A classifier that can be fitted to labeled data.
pub trait Trainable: Classifier {
    /// Minibatch supervised training. Parameters are refined in place.
    fn train(&mut self, set: &LabeledSet, params: &TrainParams) -> Result<TrainingHistory>;
}

/// A classifier exposing input gradients.
pub trait Differentiable: Classifier {
    /// Jacobian of the class-probability outputs at `input`, evaluated with
    /// training-only behaviour (dropout) disabled.
    fn class_gradients(&self, input: ArrayView1<'_, f32>) -> Result<GradientBundle>;

    /// Gradient of the cross-entropy loss against `labels` with respect to
    /// each input row.
    fn loss_gradient(&self, inputs: ArrayView2<'_, f32>, labels: &[usize])
        -> Result<Array2<f32>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_labeled_set_rejects_length_mismatch() {
        let err = LabeledSet::new(Array2::zeros((3, 2)), vec![0, 1]).unwrap_err();
        assert!(matches!(err, MirageError::ShapeMismatch { .. }));
        assert!(err.to_string().contains("Shape mismatch"), "{err}");
    }

    #[test]
    fn test_labeled_set_deserialize_checks_lengths() {
        let set = LabeledSet::new(arr2(&[[1.0, 2.0], [3.0, 4.0]]), vec![1, 0]).unwrap();
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(serde_json::from_str::<LabeledSet>(&json).unwrap(), set);

        let bad = json.replace("[1,0]", "[1]");
        assert_ne!(bad, json);
        let err = serde_json::from_str::<LabeledSet>(&bad).unwrap_err();
        assert!(err.to_string().contains("Shape mismatch"), "{err}");
    }

    #[test]
    fn test_labeled_set_slice_and_split() {
        let set = LabeledSet::new(
            arr2(&[[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0]]),
            vec![0, 1, 2, 3],
        )
        .unwrap();

        let (head, tail) = set.split_at(1).unwrap();
        assert_eq!(head.len(), 1);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail.labels(), &[1, 2, 3]);
        assert_eq!(tail.inputs()[[0, 0]], 1.0);

        assert!(set.slice(2..5).is_err());
    }

    #[test]
    fn test_one_hot_encoding() {
        let set = LabeledSet::new(Array2::zeros((3, 1)), vec![2, 0, 1]).unwrap();
        let encoded = set.one_hot(3).unwrap();
        assert_eq!(
            encoded,
            arr2(&[[0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]])
        );

        let err = set.one_hot(2).unwrap_err();
        assert!(matches!(
            err,
            MirageError::LabelOutOfRange {
                label: 2,
                num_classes: 2
            }
        ));
    }

    #[test]
    fn test_argmax_first_wins_on_ties() {
        assert_eq!(argmax(arr1(&[0.1, 0.7, 0.7]).view()), 1);
        assert_eq!(argmax_rows(&arr2(&[[3.0, 1.0], [0.0, 2.0]])), vec![0, 1]);
    }

    #[test]
    fn test_gradient_bundle_class_access() {
        let bundle = GradientBundle::new(arr2(&[[1.0, -1.0], [0.0, 2.0]]));
        assert_eq!(bundle.num_classes(), 2);
        assert_eq!(bundle.class(1).unwrap(), arr1(&[0.0, 2.0]));
        assert!(bundle.class(2).is_err());
        assert!(bundle.ensure_finite().is_ok());
    }

    #[test]
    fn test_gradient_bundle_rejects_nan() {
        let bundle = GradientBundle::new(arr2(&[[1.0, f32::NAN]]));
        let err = bundle.ensure_finite().unwrap_err();
        assert!(err.to_string().contains("feature 1"), "{err}");
    }

    struct Constant;

    impl Classifier for Constant {
        fn num_classes(&self) -> usize {
            2
        }

        fn input_dim(&self) -> usize {
            1
        }

        fn predict_proba(&self, inputs: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
            Ok(Array2::from_shape_fn((inputs.nrows(), 2), |(_, c)| {
                if c == 1 {
                    0.9
                } else {
                    0.1
                }
            }))
        }
    }

    #[test]
    fn test_default_evaluate_counts_matches() {
        let set = LabeledSet::new(Array2::zeros((4, 1)), vec![1, 1, 0, 1]).unwrap();
        assert_eq!(Constant.evaluate(&set).unwrap(), 0.75);

        let empty = LabeledSet::new(Array2::zeros((0, 1)), vec![]).unwrap();
        assert!(matches!(
            Constant.evaluate(&empty),
            Err(MirageError::EmptyDataset(_))
        ));
    }
}
