//! End-to-end black-box attack experiment.
//!
//! 1. Reserve the first `holdout` test samples as the adversary's seed set.
//! 2. Train the oracle on the training split and measure it on the rest of
//!    the test split.
//! 3. Train the substitute against the oracle's labels.
//! 4. Craft FGSM examples on the substitute and measure the oracle on them.

use crate::fgsm::fgsm;
use crate::oracle::LocalOracle;
use crate::substitute::{train_substitute, RoundReport};
use mirage_core::{check_width, AttackConfig, Differentiable, LabeledSet, Result, Trainable};
use mirage_data::{holdout_split, Dataset};
use mirage_nn::{save_checkpoint, Sequential};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Models that can be written to disk after training.
pub trait Checkpointable {
    fn save(&self, path: &Path) -> Result<()>;
}

impl Checkpointable for Sequential {
    fn save(&self, path: &Path) -> Result<()> {
        save_checkpoint(self, path)
    }
}

/// Measurements of one experiment run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentReport {
    /// Oracle accuracy on the clean evaluation split.
    pub oracle_accuracy: f32,
    /// Substitute accuracy on the clean evaluation split.
    pub substitute_accuracy: f32,
    /// Oracle accuracy on adversarial examples crafted with the substitute.
    pub adversarial_accuracy: f32,
    /// Rows the adversary sent to the oracle.
    pub oracle_queries: usize,
    /// Substitute training set size at the start of each round.
    pub substitute_set_sizes: Vec<usize>,
    pub evaluation_size: usize,
    pub rounds: Vec<RoundReport>,
    pub elapsed_secs: f64,
}

impl ExperimentReport {
    /// Accuracy the oracle lost to the transferred examples.
    pub fn transfer_drop(&self) -> f32 {
        self.oracle_accuracy - self.adversarial_accuracy
    }
}

/// Trained models together with the report.
pub struct ExperimentOutcome<O, S> {
    pub report: ExperimentReport,
    pub oracle: LocalOracle<O>,
    pub substitute: S,
}

/// Run the full attack on `dataset`.
///
/// `oracle_model` and `substitute_model` arrive freshly initialized. The
/// oracle is saved to `config.checkpoint` when one is set.
pub fn run_experiment<O, S>(
    dataset: &Dataset,
    config: &AttackConfig,
    oracle_model: O,
    substitute_model: S,
) -> Result<ExperimentOutcome<O, S>>
where
    O: Trainable + Checkpointable,
    S: Trainable + Differentiable + Sync,
{
    let start = Instant::now();
    config.validate_for_dataset(dataset.test.len())?;
    dataset.validate()?;
    check_width(config.nb_classes, dataset.num_classes)?;

    let (seed, evaluation) = holdout_split(&dataset.test, config.holdout)?;
    info!(
        "adversary holds {} samples, {} kept for evaluation",
        seed.len(),
        evaluation.len()
    );

    info!("preparing the black-box oracle");
    let (oracle, _) = LocalOracle::train(oracle_model, &dataset.train, &config.oracle_train_params())?;
    let oracle_accuracy = oracle.evaluate(&evaluation)?;
    info!("oracle accuracy on clean test examples: {:.4}", oracle_accuracy);
    if let Some(path) = &config.checkpoint {
        oracle.model().save(path)?;
    }

    info!("training the substitute");
    let outcome = train_substitute(substitute_model, &oracle, seed, config)?;
    let substitute_accuracy = outcome.model.evaluate(&evaluation)?;
    info!("substitute accuracy on clean test examples: {:.4}", substitute_accuracy);

    let adversarial = fgsm(&outcome.model, evaluation.inputs(), &config.fgsm_config())?;
    let adversarial_set = LabeledSet::new(adversarial, evaluation.labels().to_vec())?;
    let adversarial_accuracy = oracle.evaluate(&adversarial_set)?;
    info!(
        "oracle accuracy on adversarial examples crafted with the substitute: {:.4}",
        adversarial_accuracy
    );

    let report = ExperimentReport {
        oracle_accuracy,
        substitute_accuracy,
        adversarial_accuracy,
        oracle_queries: oracle.queries(),
        substitute_set_sizes: outcome.set_sizes(),
        evaluation_size: evaluation.len(),
        rounds: outcome.rounds,
        elapsed_secs: start.elapsed().as_secs_f64(),
    };
    Ok(ExperimentOutcome {
        report,
        oracle,
        substitute: outcome.model,
    })
}
