//! Differentiable classifiers for Mirage.
//!
//! A [`Sequential`] network stacks [`Layer`]s that map a flat input row to
//! class logits and applies a softmax on top. It implements the
//! [`Classifier`](mirage_core::Classifier),
//! [`Trainable`](mirage_core::Trainable) and
//! [`Differentiable`](mirage_core::Differentiable) traits, so it can play
//! either the oracle or the substitute.
//!
//! - [`layers`]: dense, 2-D convolution, ReLU and dropout layers
//! - [`network`]: the sequential container, softmax and input gradients
//! - [`optim`]: SGD and Adadelta update rules
//! - [`train`]: shuffled minibatch training
//! - [`architectures`]: the default substitute MLP and oracle CNN
//! - [`checkpoint`]: JSON (optionally gzip) persistence

pub mod architectures;
pub mod checkpoint;
pub mod layers;
pub mod network;
pub mod optim;
pub mod train;

pub use architectures::{oracle_cnn, substitute_mlp};
pub use checkpoint::{load_checkpoint, save_checkpoint};
pub use layers::{Conv2dLayer, DenseLayer, Layer, ParamGrads, Phase};
pub use network::{softmax, Sequential};
pub use optim::Optimizer;
pub use train::train_network;
