//! Black-box substitute training and transfer attacks.
//!
//! An adversary with label-only access to an oracle trains a local
//! substitute, growing its training set by Jacobian-based augmentation and
//! asking the oracle to label the new points. Adversarial examples crafted
//! on the substitute are then replayed against the oracle.
//!
//! - [`oracle`]: the [`LabelOracle`] interface and an in-process oracle
//! - [`augment`]: Jacobian-based dataset augmentation
//! - [`substitute`]: the round-based substitute training loop
//! - [`fgsm`]: the fast gradient sign crafting step
//! - [`experiment`]: the end-to-end run and its report

pub mod augment;
pub mod experiment;
pub mod fgsm;
pub mod oracle;
pub mod substitute;

pub use augment::{augment_set, jacobian_augmentation};
pub use experiment::{run_experiment, Checkpointable, ExperimentOutcome, ExperimentReport};
pub use fgsm::fgsm;
pub use oracle::{LabelOracle, LocalOracle};
pub use substitute::{
    train_substitute, RoundReport, SubstituteOutcome, SubstituteTraining, TrainingPhase,
};
