//! Minibatch supervised training.

use crate::layers::Phase;
use crate::network::{softmax, Sequential};
use crate::optim::Optimizer;
use mirage_core::{
    argmax, check_width, Classifier, EpochMetrics, LabeledSet, MirageError, Result, TrainParams,
    TrainingHistory,
};
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

/// Train `network` on `set` with shuffled minibatches and mean cross-entropy.
///
/// Parameters are refined in place; calling this again continues from the
/// current weights. Labels are one-hot encoded for the loss only.
pub fn train_network(
    network: &mut Sequential,
    set: &LabeledSet,
    params: &TrainParams,
) -> Result<TrainingHistory> {
    params.validate()?;
    if set.is_empty() {
        return Err(MirageError::EmptyDataset(
            "cannot train on an empty set".to_string(),
        ));
    }
    check_width(network.input_dim(), set.input_dim())?;
    let targets = set.one_hot(network.num_classes())?;

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut optimizer = Optimizer::new(params.optimizer, params.learning_rate);
    let mut history = TrainingHistory::new();
    let mut order: Vec<usize> = (0..set.len()).collect();

    for epoch in 0..params.epochs {
        order.shuffle(&mut rng);
        let mut loss_sum = 0.0_f32;
        let mut correct = 0usize;

        for batch in order.chunks(params.batch_size) {
            let inputs = set.inputs().select(Axis(0), batch);
            let batch_targets = targets.select(Axis(0), batch);

            let (logits, caches) =
                network.forward_with_cache(inputs.view(), &mut Phase::Training(&mut rng))?;
            let probs = softmax(&logits);

            for (row, &idx) in probs.rows().into_iter().zip(batch) {
                let label = set.labels()[idx];
                loss_sum -= row[label].max(1e-10).ln();
                if argmax(row) == label {
                    correct += 1;
                }
            }

            let grad_logits = (probs - &batch_targets) / batch.len() as f32;
            let (_, grads) = network.backward(&caches, grad_logits)?;
            optimizer.step(network, &grads)?;
        }

        let metrics = EpochMetrics {
            epoch,
            loss: loss_sum / set.len() as f32,
            accuracy: correct as f32 / set.len() as f32,
        };
        if !metrics.loss.is_finite() {
            return Err(MirageError::NonFinite(format!(
                "training loss diverged at epoch {epoch}"
            )));
        }
        debug!(
            "epoch {}: loss {:.4}, train accuracy {:.4} ({} samples)",
            epoch,
            metrics.loss,
            metrics.accuracy,
            set.len()
        );
        history.epochs.push(metrics);
    }

    Ok(history)
}
