//! Substitute training loop.
//!
//! The loop alternates supervised training of the substitute with Jacobian
//! augmentation of its training set:
//!
//! ```text
//! Init ──► Round(1) ──► Round(2) ──► ... ──► Round(R) = Done
//!            train        train                train
//!            augment      augment              (no augment)
//!            label        label
//! ```
//!
//! After `R` rounds the set holds `holdout · 2^(R-1)` points. The substitute
//! is created once by the caller and refined in place across rounds.

use crate::augment::jacobian_augmentation;
use crate::oracle::LabelOracle;
use mirage_core::{
    check_width, AttackConfig, AugmentConfig, Differentiable, LabeledSet, MirageError, Result,
    TrainParams, Trainable, TrainingHistory,
};
use ndarray::s;
use serde::Serialize;
use tracing::{debug, info};

/// Where the loop is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrainingPhase {
    /// Seeded, no round run yet.
    Init,
    /// The given round (1-based) has completed and more remain.
    Round(usize),
    /// All rounds have completed.
    Done,
}

/// What happened in one round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundReport {
    /// 1-based round index.
    pub round: usize,
    /// Substitute set size the round trained on.
    pub train_size: usize,
    pub history: TrainingHistory,
    /// Set size after augmentation, `None` in the final round.
    pub augmented_to: Option<usize>,
    /// Rows sent to the oracle this round.
    pub oracle_queries: usize,
}

/// Result of a complete run of the loop.
#[derive(Debug, Clone)]
pub struct SubstituteOutcome<M> {
    pub model: M,
    /// The final substitute training set.
    pub dataset: LabeledSet,
    pub rounds: Vec<RoundReport>,
}

impl<M> SubstituteOutcome<M> {
    /// Training set size at the start of every round.
    pub fn set_sizes(&self) -> Vec<usize> {
        self.rounds.iter().map(|r| r.train_size).collect()
    }

    pub fn oracle_queries(&self) -> usize {
        self.rounds.iter().map(|r| r.oracle_queries).sum()
    }
}

/// Steppable substitute training against a label-only oracle.
pub struct SubstituteTraining<'o, M, O: ?Sized> {
    substitute: M,
    oracle: &'o O,
    set: LabeledSet,
    rounds: usize,
    train_params: TrainParams,
    augment: AugmentConfig,
    phase: TrainingPhase,
    reports: Vec<RoundReport>,
}

impl<'o, M, O> SubstituteTraining<'o, M, O>
where
    M: Trainable + Differentiable + Sync,
    O: LabelOracle + ?Sized,
{
    /// Validate `config` and the seed set, then enter [`TrainingPhase::Init`].
    pub fn new(substitute: M, oracle: &'o O, seed: LabeledSet, config: &AttackConfig) -> Result<Self> {
        config.validate()?;
        if seed.is_empty() {
            return Err(MirageError::EmptyDataset(
                "substitute seed set is empty".to_string(),
            ));
        }
        check_width(substitute.input_dim(), seed.input_dim())?;
        check_width(oracle.input_dim(), seed.input_dim())?;
        check_width(oracle.num_classes(), substitute.num_classes())?;
        seed.check_labels(substitute.num_classes())?;

        Ok(Self {
            substitute,
            oracle,
            set: seed,
            rounds: config.nb_epochs_s,
            train_params: config.substitute_train_params(),
            augment: config.augment_config(),
            phase: TrainingPhase::Init,
            reports: Vec::with_capacity(config.nb_epochs_s),
        })
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    /// Current substitute training set.
    pub fn dataset(&self) -> &LabeledSet {
        &self.set
    }

    pub fn substitute(&self) -> &M {
        &self.substitute
    }

    pub fn reports(&self) -> &[RoundReport] {
        &self.reports
    }

    /// Run the next round. Returns `None` once the loop is done.
    pub fn step(&mut self) -> Result<Option<&RoundReport>> {
        let round = match self.phase {
            TrainingPhase::Init => 1,
            TrainingPhase::Round(r) => r + 1,
            TrainingPhase::Done => return Ok(None),
        };
        let n = self.set.len();
        info!("substitute round {}/{} on {} points", round, self.rounds, n);

        // A fresh shuffle order per round; the parameters carry over.
        let params = self
            .train_params
            .with_seed(self.train_params.seed.wrapping_add(round as u64));
        let history = self.substitute.train(&self.set, &params)?;
        if let Some(last) = history.last() {
            debug!(
                "round {} training loss {:.4}, accuracy {:.4}",
                round, last.loss, last.accuracy
            );
        }

        let (augmented_to, oracle_queries) = if round < self.rounds {
            let queries = self.augment_and_label()?;
            (Some(self.set.len()), queries)
        } else {
            (None, 0)
        };

        self.phase = if round < self.rounds {
            TrainingPhase::Round(round)
        } else {
            TrainingPhase::Done
        };
        self.reports.push(RoundReport {
            round,
            train_size: n,
            history,
            augmented_to,
            oracle_queries,
        });
        Ok(self.reports.last())
    }

    /// Double the set and relabel its second half with the oracle.
    fn augment_and_label(&mut self) -> Result<usize> {
        let n = self.set.len();
        let inputs =
            jacobian_augmentation(&self.substitute, self.set.inputs(), self.set.labels(), &self.augment)?;

        let mut labels = Vec::with_capacity(2 * n);
        labels.extend_from_slice(self.set.labels());
        labels.extend_from_slice(self.set.labels());

        let oracle_labels = self.oracle.label(inputs.slice(s![n.., ..]))?;
        check_width(n, oracle_labels.len())?;
        labels[n..].copy_from_slice(&oracle_labels);

        self.set = LabeledSet::new(inputs, labels)?;
        self.set.check_labels(self.substitute.num_classes())?;
        debug!("oracle labeled {} new points", n);
        Ok(n)
    }

    /// Run the remaining rounds and hand back the substitute.
    pub fn finish(mut self) -> Result<SubstituteOutcome<M>> {
        while self.step()?.is_some() {}
        Ok(SubstituteOutcome {
            model: self.substitute,
            dataset: self.set,
            rounds: self.reports,
        })
    }
}

/// Train `substitute` from `seed` for `config.nb_epochs_s` rounds.
pub fn train_substitute<M, O>(
    substitute: M,
    oracle: &O,
    seed: LabeledSet,
    config: &AttackConfig,
) -> Result<SubstituteOutcome<M>>
where
    M: Trainable + Differentiable + Sync,
    O: LabelOracle + ?Sized,
{
    SubstituteTraining::new(substitute, oracle, seed, config)?.finish()
}
