//! Default model architectures.
//!
//! The oracle and the substitute are deliberately different: the adversary
//! does not know the oracle's architecture.

use crate::layers::{Conv2dLayer, DenseLayer, Layer};
use crate::network::Sequential;
use mirage_core::{InputShape, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Hidden width of the substitute MLP.
pub const SUBSTITUTE_HIDDEN: usize = 200;
/// Drop rate after each substitute hidden layer.
pub const SUBSTITUTE_DROPOUT: f32 = 0.5;

/// Two hidden ReLU layers of 200 units, each followed by dropout.
pub fn substitute_mlp(input_dim: usize, num_classes: usize, seed: u64) -> Result<Sequential> {
    let mut rng = StdRng::seed_from_u64(seed);
    let layers = vec![
        Layer::Dense(DenseLayer::glorot(input_dim, SUBSTITUTE_HIDDEN, &mut rng)),
        Layer::ReLU,
        Layer::dropout(SUBSTITUTE_DROPOUT)?,
        Layer::Dense(DenseLayer::glorot(
            SUBSTITUTE_HIDDEN,
            SUBSTITUTE_HIDDEN,
            &mut rng,
        )),
        Layer::ReLU,
        Layer::dropout(SUBSTITUTE_DROPOUT)?,
        Layer::Dense(DenseLayer::glorot(SUBSTITUTE_HIDDEN, num_classes, &mut rng)),
    ];
    Sequential::new(input_dim, layers)
}

/// Small convolutional classifier: an 8-filter 5x5 stride-2 convolution,
/// dropout, a 128-unit hidden layer and the class layer.
pub fn oracle_cnn(shape: InputShape, num_classes: usize, seed: u64) -> Result<Sequential> {
    let mut rng = StdRng::seed_from_u64(seed);
    let conv = Conv2dLayer::glorot(shape, 8, 5, 2, &mut rng)?;
    let conv_out = conv.output_shape().len();
    let layers = vec![
        Layer::Conv2d(conv),
        Layer::ReLU,
        Layer::dropout(0.25)?,
        Layer::Dense(DenseLayer::glorot(conv_out, 128, &mut rng)),
        Layer::ReLU,
        Layer::Dense(DenseLayer::glorot(128, num_classes, &mut rng)),
    ];
    Sequential::new(shape.len(), layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirage_core::Classifier;

    #[test]
    fn test_substitute_shape() {
        let net = substitute_mlp(784, 10, 0).unwrap();
        assert_eq!(net.input_dim(), 784);
        assert_eq!(net.num_classes(), 10);
        assert_eq!(net.layers().len(), 7);
        assert_eq!(
            net.param_count(),
            784 * 200 + 200 + 200 * 200 + 200 + 200 * 10 + 10
        );
    }

    #[test]
    fn test_oracle_cnn_on_mnist_shape() {
        let net = oracle_cnn(InputShape::grayscale(28, 28), 10, 0).unwrap();
        assert_eq!(net.input_dim(), 784);
        assert_eq!(net.num_classes(), 10);
        // (28 - 5) / 2 + 1 = 12
        match &net.layers()[0] {
            Layer::Conv2d(conv) => assert_eq!(conv.output_shape(), InputShape::new(8, 12, 12)),
            other => panic!("unexpected first layer {other:?}"),
        }
    }

    #[test]
    fn test_oracle_cnn_rejects_tiny_images() {
        assert!(oracle_cnn(InputShape::grayscale(3, 3), 10, 0).is_err());
    }

    #[test]
    fn test_same_seed_same_weights() {
        assert_eq!(
            substitute_mlp(16, 3, 42).unwrap(),
            substitute_mlp(16, 3, 42).unwrap()
        );
        assert_ne!(
            substitute_mlp(16, 3, 42).unwrap(),
            substitute_mlp(16, 3, 43).unwrap()
        );
    }

    #[test]
    fn test_single_class_is_rejected() {
        assert!(substitute_mlp(16, 1, 0).is_err());
    }
}
