//! Label-only access to the attacked model.

use mirage_core::{
    check_width, Classifier, LabeledSet, Result, TrainParams, Trainable, TrainingHistory,
};
use ndarray::ArrayView2;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

/// A black box that answers with a class index per input row.
///
/// The adversary never sees probabilities or parameters. Implementations
/// may wrap a local model or forward queries to a remote service.
pub trait LabelOracle {
    fn num_classes(&self) -> usize;

    fn input_dim(&self) -> usize;

    /// Predicted class for every row of `inputs`.
    fn label(&self, inputs: ArrayView2<'_, f32>) -> Result<Vec<usize>>;
}

/// Oracle backed by a model trained in-process.
///
/// The model is trained once by [`LocalOracle::train`] and only borrowed
/// immutably afterwards, so its parameters stay fixed for the whole attack.
#[derive(Debug)]
pub struct LocalOracle<M> {
    model: M,
    queries: AtomicUsize,
}

impl<M: Trainable> LocalOracle<M> {
    /// Train `model` on `set` and seal it as an oracle.
    pub fn train(
        mut model: M,
        set: &LabeledSet,
        params: &TrainParams,
    ) -> Result<(Self, TrainingHistory)> {
        info!(
            "training oracle on {} samples for {} epochs",
            set.len(),
            params.epochs
        );
        let history = model.train(set, params)?;
        Ok((Self::from_trained(model), history))
    }
}

impl<M: Classifier> LocalOracle<M> {
    /// Wrap a model whose parameters are already final.
    pub fn from_trained(model: M) -> Self {
        Self {
            model,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Predicted labels without counting toward the query budget. Used for
    /// evaluation, which the adversary does not pay for.
    pub fn predict(&self, inputs: ArrayView2<'_, f32>) -> Result<Vec<usize>> {
        check_width(self.model.input_dim(), inputs.ncols())?;
        self.model.predict(inputs)
    }

    /// Fraction of `set` classified correctly.
    pub fn evaluate(&self, set: &LabeledSet) -> Result<f32> {
        check_width(self.model.input_dim(), set.input_dim())?;
        self.model.evaluate(set)
    }

    /// Rows labeled through [`LabelOracle::label`] so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

impl<M: Classifier> LabelOracle for LocalOracle<M> {
    fn num_classes(&self) -> usize {
        self.model.num_classes()
    }

    fn input_dim(&self) -> usize {
        self.model.input_dim()
    }

    fn label(&self, inputs: ArrayView2<'_, f32>) -> Result<Vec<usize>> {
        let labels = self.predict(inputs)?;
        self.queries.fetch_add(labels.len(), Ordering::Relaxed);
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirage_core::MirageError;
    use mirage_nn::substitute_mlp;
    use ndarray::{arr2, Array2};

    #[test]
    fn test_label_is_idempotent_and_counted() {
        let oracle = LocalOracle::from_trained(substitute_mlp(3, 4, 8).unwrap());
        let x = arr2(&[[0.1, 0.2, 0.3], [-1.0, 0.0, 1.0]]);
        let first = oracle.label(x.view()).unwrap();
        let second = oracle.label(x.view()).unwrap();
        assert_eq!(first, second);
        assert!(first.iter().all(|&l| l < 4));
        assert_eq!(oracle.queries(), 4);

        // Evaluation is free.
        oracle.predict(x.view()).unwrap();
        assert_eq!(oracle.queries(), 4);
    }

    #[test]
    fn test_width_mismatch_is_rejected_before_counting() {
        let oracle = LocalOracle::from_trained(substitute_mlp(3, 2, 0).unwrap());
        let err = oracle.label(Array2::zeros((2, 5)).view()).unwrap_err();
        assert!(matches!(err, MirageError::ShapeMismatch { .. }));
        assert_eq!(oracle.queries(), 0);
    }

    #[test]
    fn test_train_returns_history() {
        let set = LabeledSet::new(arr2(&[[0.0, 0.0, 1.0], [1.0, 0.0, 0.0]]), vec![0, 1]).unwrap();
        let params = TrainParams {
            epochs: 3,
            ..Default::default()
        };
        let (oracle, history) =
            LocalOracle::train(substitute_mlp(3, 2, 1).unwrap(), &set, &params).unwrap();
        assert_eq!(history.epochs.len(), 3);
        assert!(oracle.evaluate(&set).unwrap() >= 0.0);
        assert_eq!(oracle.queries(), 0);
    }
}
