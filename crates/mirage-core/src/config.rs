//! Experiment configuration.
//!
//! [`AttackConfig`] carries every hyperparameter of a run. It is threaded
//! explicitly through the oracle setup, the substitute loop and the crafting
//! step; each stage receives the narrower struct it needs
//! ([`TrainParams`], [`AugmentConfig`], [`FgsmConfig`]).

use crate::{MirageError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Row placement of the synthetic points produced by Jacobian augmentation.
///
/// For a previous set of `n` rows the output always has `2n` rows, `n` of
/// them synthetic and `n` of them exact copies of the previous rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AugmentationLayout {
    /// Row `2i` is the synthetic point derived from row `i`, row `2i + 1` a
    /// copy of row `i`.
    #[default]
    Interleaved,
    /// The previous rows stacked twice, then row `2i` overwritten by the
    /// synthetic point derived from row `i`.
    Stacked,
    /// The previous rows followed by their synthetic points in order.
    Appended,
}

impl std::str::FromStr for AugmentationLayout {
    type Err = MirageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "interleaved" => Ok(Self::Interleaved),
            "stacked" => Ok(Self::Stacked),
            "appended" => Ok(Self::Appended),
            other => Err(MirageError::InvalidConfig(format!(
                "unknown augmentation layout '{other}' (expected interleaved, stacked or appended)"
            ))),
        }
    }
}

/// Parameter update rule used by the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Sgd,
    Adadelta,
}

impl std::str::FromStr for OptimizerKind {
    type Err = MirageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sgd" => Ok(Self::Sgd),
            "adadelta" => Ok(Self::Adadelta),
            other => Err(MirageError::InvalidConfig(format!(
                "unknown optimizer '{other}' (expected sgd or adadelta)"
            ))),
        }
    }
}

/// Hyperparameters of one supervised training call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainParams {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub optimizer: OptimizerKind,
    /// Seed for minibatch shuffling and dropout masks.
    pub seed: u64,
}

impl Default for TrainParams {
    fn default() -> Self {
        Self {
            epochs: 1,
            batch_size: 128,
            learning_rate: 0.1,
            optimizer: OptimizerKind::Sgd,
            seed: 1234,
        }
    }
}

impl TrainParams {
    /// Same parameters with a different seed.
    pub fn with_seed(&self, seed: u64) -> Self {
        Self {
            seed,
            ..self.clone()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MirageError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(MirageError::InvalidConfig(format!(
                "learning_rate must be positive and finite, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

/// Settings for the Jacobian augmentation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentConfig {
    /// Step size λ along the gradient sign.
    pub lmbda: f32,
    pub layout: AugmentationLayout,
    /// Evaluate per-point gradients with rayon.
    pub parallel: bool,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            lmbda: 0.2,
            layout: AugmentationLayout::Interleaved,
            parallel: false,
        }
    }
}

impl AugmentConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.lmbda.is_finite() && self.lmbda > 0.0) {
            return Err(MirageError::InvalidConfig(format!(
                "lmbda must be positive and finite, got {}",
                self.lmbda
            )));
        }
        Ok(())
    }
}

/// Settings for the fast gradient sign crafting step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FgsmConfig {
    pub eps: f32,
    /// Optional `(min, max)` range applied after the perturbation.
    pub clip: Option<(f32, f32)>,
    /// Rows per gradient evaluation.
    pub batch_size: usize,
}

impl Default for FgsmConfig {
    fn default() -> Self {
        Self {
            eps: 0.3,
            clip: None,
            batch_size: 128,
        }
    }
}

impl FgsmConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.eps.is_finite() && self.eps >= 0.0) {
            return Err(MirageError::InvalidConfig(format!(
                "fgsm eps must be non-negative and finite, got {}",
                self.eps
            )));
        }
        if let Some((min, max)) = self.clip {
            if !(min.is_finite() && max.is_finite() && min <= max) {
                return Err(MirageError::InvalidConfig(format!(
                    "invalid clip range [{min}, {max}]"
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(MirageError::InvalidConfig(
                "batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full configuration of a black-box attack run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttackConfig {
    /// Oracle training epochs.
    pub nb_epochs: usize,
    pub batch_size: usize,
    /// Test samples reserved as the adversary's seed set.
    pub holdout: usize,
    pub nb_classes: usize,
    /// Substitute training rounds (R).
    pub nb_epochs_s: usize,
    pub learning_rate: f32,
    /// Augmentation step λ.
    pub lmbda: f32,
    /// Training passes over the substitute set in each round.
    pub sub_train_epochs: usize,
    pub fgsm_eps: f32,
    pub clip: Option<(f32, f32)>,
    pub layout: AugmentationLayout,
    pub optimizer: OptimizerKind,
    pub parallel_augmentation: bool,
    pub seed: u64,
    /// Where to save the trained oracle, if anywhere.
    pub checkpoint: Option<PathBuf>,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            nb_epochs: 2,
            batch_size: 128,
            holdout: 100,
            nb_classes: 10,
            nb_epochs_s: 6,
            learning_rate: 0.1,
            lmbda: 0.2,
            sub_train_epochs: 1,
            fgsm_eps: 0.3,
            clip: None,
            layout: AugmentationLayout::Interleaved,
            optimizer: OptimizerKind::Sgd,
            parallel_augmentation: false,
            seed: 1234,
            checkpoint: None,
        }
    }
}

impl AttackConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| {
            MirageError::InvalidConfig(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| MirageError::InvalidConfig(format!("failed to serialize config: {e}")))
    }

    /// Check every hyperparameter that does not depend on the dataset.
    pub fn validate(&self) -> Result<()> {
        if self.nb_epochs_s < 1 {
            return Err(MirageError::InvalidConfig(
                "nb_epochs_s must be at least 1".to_string(),
            ));
        }
        if self.nb_classes < 2 {
            return Err(MirageError::InvalidConfig(format!(
                "nb_classes must be at least 2, got {}",
                self.nb_classes
            )));
        }
        if self.holdout == 0 {
            return Err(MirageError::InvalidConfig(
                "holdout must be at least 1".to_string(),
            ));
        }
        if self.sub_train_epochs == 0 {
            return Err(MirageError::InvalidConfig(
                "sub_train_epochs must be at least 1".to_string(),
            ));
        }
        self.oracle_train_params().validate()?;
        self.augment_config().validate()?;
        self.fgsm_config().validate()
    }

    /// [`validate`](Self::validate) plus the checks against the size of the
    /// test split the holdout is taken from.
    pub fn validate_for_dataset(&self, test_len: usize) -> Result<()> {
        self.validate()?;
        if self.holdout >= test_len {
            return Err(MirageError::InvalidConfig(format!(
                "holdout ({}) must be smaller than the test set ({})",
                self.holdout, test_len
            )));
        }
        Ok(())
    }

    pub fn oracle_train_params(&self) -> TrainParams {
        TrainParams {
            epochs: self.nb_epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            optimizer: self.optimizer,
            seed: self.seed,
        }
    }

    pub fn substitute_train_params(&self) -> TrainParams {
        TrainParams {
            epochs: self.sub_train_epochs,
            seed: self.seed.wrapping_add(1),
            ..self.oracle_train_params()
        }
    }

    pub fn augment_config(&self) -> AugmentConfig {
        AugmentConfig {
            lmbda: self.lmbda,
            layout: self.layout,
            parallel: self.parallel_augmentation,
        }
    }

    pub fn fgsm_config(&self) -> FgsmConfig {
        FgsmConfig {
            eps: self.fgsm_eps,
            clip: self.clip,
            batch_size: self.batch_size,
        }
    }

    /// Substitute set size after the final round.
    pub fn final_substitute_size(&self) -> usize {
        self.holdout << self.nb_epochs_s.saturating_sub(1)
    }
}
