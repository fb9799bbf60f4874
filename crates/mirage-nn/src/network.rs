//! Sequential network with a softmax output.

use crate::layers::{Cache, Layer, ParamGrads, Phase};
use crate::train::train_network;
use mirage_core::{
    check_width, Classifier, Differentiable, GradientBundle, LabeledSet, MirageError, Result,
    Trainable, TrainParams, TrainingHistory,
};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Row-wise softmax, shifted by the row maximum for stability.
pub fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    out
}

/// Layers applied in order to produce class logits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequential {
    input_dim: usize,
    num_classes: usize,
    layers: Vec<Layer>,
}

impl Sequential {
    /// Build a network, checking that every layer accepts the width produced
    /// by the previous one. The final width is the number of classes.
    pub fn new(input_dim: usize, layers: Vec<Layer>) -> Result<Self> {
        let mut width = input_dim;
        for (idx, layer) in layers.iter().enumerate() {
            width = layer.output_dim(width).map_err(|e| {
                MirageError::InvalidConfig(format!("layer {} ({}): {}", idx, layer.name(), e))
            })?;
        }
        if width < 2 {
            return Err(MirageError::InvalidConfig(format!(
                "network must output at least 2 classes, got {width}"
            )));
        }
        Ok(Self {
            input_dim,
            num_classes: width,
            layers,
        })
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub(crate) fn layers_mut(&mut self) -> &mut [Layer] {
        &mut self.layers
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }

    /// Forward pass to logits, keeping every layer's cache.
    pub fn forward_with_cache(
        &self,
        inputs: ArrayView2<'_, f32>,
        phase: &mut Phase<'_>,
    ) -> Result<(Array2<f32>, Vec<Cache>)> {
        check_width(self.input_dim, inputs.ncols())?;
        let mut activation = inputs.to_owned();
        let mut caches = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            let (next, cache) = layer.forward(activation, phase);
            activation = next;
            caches.push(cache);
        }
        Ok((activation, caches))
    }

    /// Propagate a logit gradient back to the inputs.
    ///
    /// Returns the input gradient and one entry per layer holding its
    /// parameter gradients (`None` for parameter-free layers).
    pub fn backward(
        &self,
        caches: &[Cache],
        grad_logits: Array2<f32>,
    ) -> Result<(Array2<f32>, Vec<Option<ParamGrads>>)> {
        check_width(self.layers.len(), caches.len())?;
        let mut grad = grad_logits;
        let mut param_grads = vec![None; self.layers.len()];
        for (idx, (layer, cache)) in self.layers.iter().zip(caches).enumerate().rev() {
            let (grad_in, grads) = layer.backward(cache, grad)?;
            grad = grad_in;
            param_grads[idx] = grads;
        }
        Ok((grad, param_grads))
    }
}

impl Classifier for Sequential {
    fn num_classes(&self) -> usize {
        self.num_classes
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn predict_proba(&self, inputs: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
        let (logits, _) = self.forward_with_cache(inputs, &mut Phase::Inference)?;
        Ok(softmax(&logits))
    }
}

impl Trainable for Sequential {
    fn train(&mut self, set: &LabeledSet, params: &TrainParams) -> Result<TrainingHistory> {
        train_network(self, set, params)
    }
}

impl Differentiable for Sequential {
    fn class_gradients(&self, input: ArrayView1<'_, f32>) -> Result<GradientBundle> {
        let batch = input.insert_axis(Axis(0));
        let (logits, caches) = self.forward_with_cache(batch, &mut Phase::Inference)?;
        let probs = softmax(&logits);
        let p = probs.row(0);

        let mut jacobian = Array2::zeros((self.num_classes, self.input_dim));
        for class in 0..self.num_classes {
            // d p_c / d z_j = p_c (delta_cj - p_j)
            let grad_logits = Array2::from_shape_fn((1, self.num_classes), |(_, j)| {
                let delta = if j == class { 1.0 } else { 0.0 };
                p[class] * (delta - p[j])
            });
            let (grad_input, _) = self.backward(&caches, grad_logits)?;
            jacobian.row_mut(class).assign(&grad_input.row(0));
        }
        Ok(GradientBundle::new(jacobian))
    }

    fn loss_gradient(
        &self,
        inputs: ArrayView2<'_, f32>,
        labels: &[usize],
    ) -> Result<Array2<f32>> {
        check_width(inputs.nrows(), labels.len())?;
        if let Some(&label) = labels.iter().find(|&&l| l >= self.num_classes) {
            return Err(MirageError::LabelOutOfRange {
                label,
                num_classes: self.num_classes,
            });
        }
        let (logits, caches) = self.forward_with_cache(inputs, &mut Phase::Inference)?;
        let mut grad_logits = softmax(&logits);
        for (row, &label) in labels.iter().enumerate() {
            grad_logits[[row, label]] -= 1.0;
        }
        let (grad_input, _) = self.backward(&caches, grad_logits)?;
        Ok(grad_input)
    }
}
