//! Parameter update rules.
//!
//! State is kept per parameter tensor, in the order the network's layers
//! expose them (weight then bias for each parameterized layer). A fresh
//! [`Optimizer`] is created for every training call.

use crate::layers::ParamGrads;
use crate::network::Sequential;
use mirage_core::{check_width, OptimizerKind, Result};

/// Decay rate of the Adadelta running averages.
pub const ADADELTA_RHO: f32 = 0.95;
/// Adadelta conditioning constant.
pub const ADADELTA_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone)]
struct Slot {
    accum_grad: Vec<f32>,
    accum_update: Vec<f32>,
}

impl Slot {
    fn zeros(len: usize) -> Self {
        Self {
            accum_grad: vec![0.0; len],
            accum_update: vec![0.0; len],
        }
    }
}

#[derive(Debug, Clone)]
pub struct Optimizer {
    kind: OptimizerKind,
    learning_rate: f32,
    slots: Vec<Slot>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate: f32) -> Self {
        Self {
            kind,
            learning_rate,
            slots: Vec::new(),
        }
    }

    /// Apply one update from per-layer gradients as returned by
    /// [`Sequential::backward`].
    pub fn step(&mut self, network: &mut Sequential, grads: &[Option<ParamGrads>]) -> Result<()> {
        check_width(network.layers().len(), grads.len())?;
        let mut slot = 0;
        for (layer, grad) in network.layers_mut().iter_mut().zip(grads) {
            let (Some((weight, bias)), Some(grad)) = (layer.params_mut(), grad) else {
                continue;
            };
            let (weight_len, bias_len) = (weight.len(), bias.len());
            self.apply(slot, weight.iter_mut(), grad.weight.iter(), weight_len);
            self.apply(slot + 1, bias.iter_mut(), grad.bias.iter(), bias_len);
            slot += 2;
        }
        Ok(())
    }

    fn apply<'a, 'b>(
        &mut self,
        slot: usize,
        params: impl Iterator<Item = &'a mut f32>,
        grads: impl Iterator<Item = &'b f32>,
        len: usize,
    ) {
        match self.kind {
            OptimizerKind::Sgd => {
                for (p, g) in params.zip(grads) {
                    *p -= self.learning_rate * g;
                }
            }
            OptimizerKind::Adadelta => {
                if self.slots.len() <= slot {
                    self.slots.push(Slot::zeros(len));
                }
                let state = &mut self.slots[slot];
                for (((p, g), acc_g), acc_u) in params
                    .zip(grads)
                    .zip(state.accum_grad.iter_mut())
                    .zip(state.accum_update.iter_mut())
                {
                    *acc_g = ADADELTA_RHO * *acc_g + (1.0 - ADADELTA_RHO) * g * g;
                    let update =
                        (*acc_u + ADADELTA_EPSILON).sqrt() / (*acc_g + ADADELTA_EPSILON).sqrt() * g;
                    *acc_u = ADADELTA_RHO * *acc_u + (1.0 - ADADELTA_RHO) * update * update;
                    *p -= self.learning_rate * update;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{DenseLayer, Layer};
    use ndarray::{arr1, arr2};

    fn one_layer() -> Sequential {
        let dense = DenseLayer::new(arr2(&[[1.0, 1.0]]), arr1(&[0.0, 0.0])).unwrap();
        Sequential::new(1, vec![Layer::Dense(dense)]).unwrap()
    }

    fn grads() -> Vec<Option<ParamGrads>> {
        vec![Some(ParamGrads {
            weight: arr2(&[[1.0, -2.0]]),
            bias: arr1(&[0.5, 0.0]),
        })]
    }

    fn dense(net: &Sequential) -> &DenseLayer {
        match &net.layers()[0] {
            Layer::Dense(dense) => dense,
            other => panic!("unexpected layer {other:?}"),
        }
    }

    #[test]
    fn test_sgd_step() {
        let mut net = one_layer();
        let mut opt = Optimizer::new(OptimizerKind::Sgd, 0.1);
        opt.step(&mut net, &grads()).unwrap();
        let expected_weight = arr2(&[[0.9, 1.2]]);
        let expected_bias = arr1(&[-0.05, 0.0]);
        for (got, want) in dense(&net).weight().iter().zip(expected_weight.iter()) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
        for (got, want) in dense(&net).bias().iter().zip(expected_bias.iter()) {
            assert!((got - want).abs() < 1e-6, "{got} vs {want}");
        }
    }

    #[test]
    fn test_adadelta_moves_against_gradient() {
        let mut net = one_layer();
        let mut opt = Optimizer::new(OptimizerKind::Adadelta, 1.0);
        for _ in 0..3 {
            opt.step(&mut net, &grads()).unwrap();
        }
        let weight = dense(&net).weight();
        assert!(weight[[0, 0]] < 1.0);
        assert!(weight[[0, 1]] > 1.0);
        // Zero gradient leaves the parameter untouched.
        assert_eq!(dense(&net).bias()[1], 0.0);
        assert_eq!(opt.slots.len(), 2);
    }

    #[test]
    fn test_step_rejects_wrong_gradient_count() {
        let mut net = one_layer();
        let mut opt = Optimizer::new(OptimizerKind::Sgd, 0.1);
        assert!(opt.step(&mut net, &[]).is_err());
    }
}
