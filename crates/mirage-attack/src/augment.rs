//! Jacobian-based dataset augmentation.
//!
//! Every previous point `x_i` with label `y_i` yields one synthetic point
//! `x_i + λ · sign(∂p_{y_i}/∂x)` taken from the substitute's Jacobian at
//! `x_i`. New points lie a fixed step from the current decision surface in
//! the direction the substitute is most sensitive to, which is where oracle
//! labels are most informative.
//!
//! ## Layouts
//!
//! The output always has `2n` rows. [`AugmentationLayout`] selects where the
//! synthetic rows go:
//!
//! - `Interleaved`: `[s_0, x_0, s_1, x_1, ...]`
//! - `Stacked`: `[x; x]` with row `2i` replaced by `s_i`
//! - `Appended`: `[x; s]`
//!
//! Labels are not produced here. The substitute loop doubles them by
//! concatenation and asks the oracle about the second half.

use mirage_core::{
    check_width, AugmentConfig, AugmentationLayout, Differentiable, LabeledSet, MirageError,
    Result,
};
use ndarray::{concatenate, Array1, Array2, ArrayView1, Axis};
use rayon::prelude::*;
use tracing::{debug, trace};

/// Element-wise sign with `sign(0) = 0`.
///
/// `f32::signum` maps `+0.0` to `1.0`, which would perturb features the
/// substitute is insensitive to.
fn sign(value: f32) -> f32 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn synthetic_point<M: Differentiable>(
    substitute: &M,
    input: ArrayView1<'_, f32>,
    label: usize,
    lmbda: f32,
) -> Result<Array1<f32>> {
    let bundle = substitute.class_gradients(input)?;
    bundle.ensure_finite()?;
    let grad = bundle.class(label)?;
    Ok(ndarray::Zip::from(&input)
        .and(&grad)
        .map_collect(|&x, &g| x + lmbda * sign(g)))
}

/// Double `x_prev` with one synthetic point per row.
///
/// `y_sub[i]` selects which class gradient perturbs row `i`. Gradients are
/// evaluated in inference mode. Any non-finite gradient entry aborts the
/// call with [`MirageError::NonFinite`].
pub fn jacobian_augmentation<M: Differentiable + Sync>(
    substitute: &M,
    x_prev: &Array2<f32>,
    y_sub: &[usize],
    config: &AugmentConfig,
) -> Result<Array2<f32>> {
    config.validate()?;
    let n = x_prev.nrows();
    if n == 0 {
        return Err(MirageError::EmptyDataset(
            "cannot augment an empty substitute set".to_string(),
        ));
    }
    check_width(n, y_sub.len())?;
    check_width(substitute.input_dim(), x_prev.ncols())?;
    if let Some(&label) = y_sub.iter().find(|&&l| l >= substitute.num_classes()) {
        return Err(MirageError::LabelOutOfRange {
            label,
            num_classes: substitute.num_classes(),
        });
    }

    let lmbda = config.lmbda;
    let point = |i: usize| {
        trace!("jacobian step for point {}", i);
        synthetic_point(substitute, x_prev.row(i), y_sub[i], lmbda)
    };
    let synthetic: Vec<Array1<f32>> = if config.parallel {
        (0..n).into_par_iter().map(point).collect::<Result<_>>()?
    } else {
        (0..n).map(point).collect::<Result<_>>()?
    };

    let out = match config.layout {
        AugmentationLayout::Interleaved => {
            let mut out = Array2::zeros((2 * n, x_prev.ncols()));
            for (i, s) in synthetic.iter().enumerate() {
                out.row_mut(2 * i).assign(s);
                out.row_mut(2 * i + 1).assign(&x_prev.row(i));
            }
            out
        }
        AugmentationLayout::Stacked => {
            let mut out = concatenate(Axis(0), &[x_prev.view(), x_prev.view()])
                .map_err(|e| MirageError::InvalidConfig(format!("stacking failed: {e}")))?;
            for (i, s) in synthetic.iter().enumerate() {
                out.row_mut(2 * i).assign(s);
            }
            out
        }
        AugmentationLayout::Appended => {
            let mut out = Array2::zeros((2 * n, x_prev.ncols()));
            out.slice_mut(ndarray::s![..n, ..]).assign(x_prev);
            for (i, s) in synthetic.iter().enumerate() {
                out.row_mut(n + i).assign(s);
            }
            out
        }
    };

    debug!(
        "augmented {} -> {} rows ({:?}, lambda {})",
        n,
        out.nrows(),
        config.layout,
        lmbda
    );
    Ok(out)
}

/// [`jacobian_augmentation`] on a [`LabeledSet`].
pub fn augment_set<M: Differentiable + Sync>(
    substitute: &M,
    set: &LabeledSet,
    config: &AugmentConfig,
) -> Result<Array2<f32>> {
    jacobian_augmentation(substitute, set.inputs(), set.labels(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirage_core::{Classifier, GradientBundle};
    use ndarray::{arr1, arr2, ArrayView2};

    /// Linear scores with a fixed, hand-picked Jacobian.
    struct FixedJacobian {
        jacobian: Array2<f32>,
    }

    impl Classifier for FixedJacobian {
        fn num_classes(&self) -> usize {
            self.jacobian.nrows()
        }

        fn input_dim(&self) -> usize {
            self.jacobian.ncols()
        }

        fn predict_proba(&self, inputs: ArrayView2<'_, f32>) -> Result<Array2<f32>> {
            Ok(inputs.dot(&self.jacobian.t()))
        }
    }

    impl Differentiable for FixedJacobian {
        fn class_gradients(&self, _input: ArrayView1<'_, f32>) -> Result<GradientBundle> {
            Ok(GradientBundle::new(self.jacobian.clone()))
        }

        fn loss_gradient(
            &self,
            inputs: ArrayView2<'_, f32>,
            _labels: &[usize],
        ) -> Result<Array2<f32>> {
            Ok(Array2::zeros(inputs.raw_dim()))
        }
    }

    fn model() -> FixedJacobian {
        FixedJacobian {
            jacobian: arr2(&[[0.5, -2.0, 0.0], [-1.0, 0.0, 3.0]]),
        }
    }

    fn config(layout: AugmentationLayout) -> AugmentConfig {
        AugmentConfig {
            lmbda: 0.5,
            layout,
            parallel: false,
        }
    }

    #[test]
    fn test_sign_of_zero_is_zero() {
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-0.0), 0.0);
        assert_eq!(sign(1e-30), 1.0);
        assert_eq!(sign(-4.0), -1.0);
    }

    #[test]
    fn test_interleaved_layout() {
        let x = arr2(&[[1.0, 1.0, 1.0], [0.0, 0.0, 0.0]]);
        let out =
            jacobian_augmentation(&model(), &x, &[0, 1], &config(AugmentationLayout::Interleaved))
                .unwrap();
        assert_eq!(
            out,
            arr2(&[
                [1.5, 0.5, 1.0],
                [1.0, 1.0, 1.0],
                [-0.5, 0.0, 0.5],
                [0.0, 0.0, 0.0],
            ])
        );
    }

    #[test]
    fn test_stacked_layout_overwrites_even_rows() {
        let x = arr2(&[[1.0, 1.0, 1.0], [2.0, 2.0, 2.0], [3.0, 3.0, 3.0]]);
        let out =
            jacobian_augmentation(&model(), &x, &[0, 0, 1], &config(AugmentationLayout::Stacked))
                .unwrap();
        assert_eq!(out.nrows(), 6);
        // Even rows hold s_0, s_1, s_2.
        assert_eq!(out.row(0), arr1(&[1.5, 0.5, 1.0]));
        assert_eq!(out.row(2), arr1(&[2.5, 1.5, 2.0]));
        assert_eq!(out.row(4), arr1(&[2.5, 3.0, 3.5]));
        // Odd rows keep the stacked duplicate at that position.
        assert_eq!(out.row(1), x.row(1));
        assert_eq!(out.row(3), x.row(0));
        assert_eq!(out.row(5), x.row(2));
    }

    #[test]
    fn test_appended_layout() {
        let x = arr2(&[[1.0, 1.0, 1.0], [0.0, 0.0, 0.0]]);
        let out =
            jacobian_augmentation(&model(), &x, &[1, 0], &config(AugmentationLayout::Appended))
                .unwrap();
        assert_eq!(out.slice(ndarray::s![..2, ..]), x);
        assert_eq!(out.row(2), arr1(&[0.5, 1.0, 1.5]));
        assert_eq!(out.row(3), arr1(&[0.5, -0.5, 0.0]));
    }

    #[test]
    fn test_parallel_matches_serial() {
        let net = mirage_nn::substitute_mlp(5, 3, 2).unwrap();
        let x = Array2::from_shape_fn((9, 5), |(i, j)| ((i * 5 + j) as f32 * 0.3).cos());
        let labels: Vec<usize> = (0..9).map(|i| i % 3).collect();
        let serial = AugmentConfig {
            parallel: false,
            ..Default::default()
        };
        let parallel = AugmentConfig {
            parallel: true,
            ..Default::default()
        };
        assert_eq!(
            jacobian_augmentation(&net, &x, &labels, &serial).unwrap(),
            jacobian_augmentation(&net, &x, &labels, &parallel).unwrap()
        );
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let x = arr2(&[[1.0, 1.0, 1.0]]);
        let cfg = config(AugmentationLayout::Interleaved);
        assert!(matches!(
            jacobian_augmentation(&model(), &x, &[0, 1], &cfg),
            Err(MirageError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            jacobian_augmentation(&model(), &x, &[2], &cfg),
            Err(MirageError::LabelOutOfRange { label: 2, .. })
        ));
        assert!(matches!(
            jacobian_augmentation(&model(), &Array2::zeros((0, 3)), &[], &cfg),
            Err(MirageError::EmptyDataset(_))
        ));
        let bad_lambda = AugmentConfig {
            lmbda: -0.2,
            ..cfg
        };
        assert!(matches!(
            jacobian_augmentation(&model(), &x, &[0], &bad_lambda),
            Err(MirageError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_nan_gradient_fails_fast() {
        let model = FixedJacobian {
            jacobian: arr2(&[[f32::NAN, 0.0], [0.0, 1.0]]),
        };
        let err = jacobian_augmentation(
            &model,
            &arr2(&[[0.0, 0.0]]),
            &[1],
            &config(AugmentationLayout::Interleaved),
        )
        .unwrap_err();
        // The bundle is checked as a whole, not just the selected class.
        assert!(matches!(err, MirageError::NonFinite(_)));
    }
}
