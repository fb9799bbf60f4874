//! Fast gradient sign method.
//!
//! `x_adv = x + eps · sign(∇_x L(f(x), ŷ))` where `ŷ` is the model's own
//! prediction for `x`. Using predicted rather than true labels keeps the
//! attack label-free and avoids leaking the true class into the step.

use mirage_core::{check_width, Differentiable, FgsmConfig, MirageError, Result};
use ndarray::{s, Array2};
use tracing::debug;

/// Craft adversarial examples for every row of `inputs` against `model`.
///
/// Rows are processed in batches of `config.batch_size`. When `config.clip`
/// is set the result is clamped to that range.
pub fn fgsm<M: Differentiable>(
    model: &M,
    inputs: &Array2<f32>,
    config: &FgsmConfig,
) -> Result<Array2<f32>> {
    config.validate()?;
    check_width(model.input_dim(), inputs.ncols())?;

    let mut adversarial = inputs.clone();
    let n = inputs.nrows();
    for start in (0..n).step_by(config.batch_size) {
        let end = (start + config.batch_size).min(n);
        let batch = inputs.slice(s![start..end, ..]);
        let predicted = model.predict(batch)?;
        let grad = model.loss_gradient(batch, &predicted)?;
        if grad.iter().any(|g| !g.is_finite()) {
            return Err(MirageError::NonFinite(format!(
                "loss gradient for rows {start}..{end}"
            )));
        }

        let mut rows = adversarial.slice_mut(s![start..end, ..]);
        rows.zip_mut_with(&grad, |x, &g| {
            if g > 0.0 {
                *x += config.eps;
            } else if g < 0.0 {
                *x -= config.eps;
            }
        });
        if let Some((lo, hi)) = config.clip {
            rows.mapv_inplace(|v| v.clamp(lo, hi));
        }
    }
    debug!("crafted {} adversarial rows with eps {}", n, config.eps);
    Ok(adversarial)
}
