//! Network layers with explicit forward caches and backward passes.
//!
//! Every layer consumes a `batch × features` matrix. Convolutions read each
//! row as a channel-major image described by an [`InputShape`] and write
//! their output in the same layout, so layers chain without reshapes.

use mirage_core::{check_width, InputShape, MirageError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Whether training-only behaviour (dropout) is active.
pub enum Phase<'a> {
    /// Dropout masks are drawn from the given generator.
    Training(&'a mut StdRng),
    Inference,
}

/// Gradients of one layer's weight matrix and bias vector.
#[derive(Debug, Clone)]
pub struct ParamGrads {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

/// Values saved by the forward pass for the backward pass.
#[derive(Debug, Clone)]
pub enum Cache {
    /// Layer input (dense and convolution).
    Input(Array2<f32>),
    /// Pre-activation values (ReLU).
    PreActivation(Array2<f32>),
    /// Inverted-dropout mask, `None` in inference.
    Mask(Option<Array2<f32>>),
}

fn glorot_uniform(
    rows: usize,
    cols: usize,
    fan_in: usize,
    fan_out: usize,
    rng: &mut StdRng,
) -> Array2<f32> {
    let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.random_range(-limit..limit))
}

/// Fully connected layer: `y = x · W + b` with `W` of shape `in × out`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl DenseLayer {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> Result<Self> {
        check_width(weight.ncols(), bias.len())?;
        Ok(Self { weight, bias })
    }

    /// Glorot-uniform weights, zero bias.
    pub fn glorot(input_dim: usize, output_dim: usize, rng: &mut StdRng) -> Self {
        Self {
            weight: glorot_uniform(input_dim, output_dim, input_dim, output_dim, rng),
            bias: Array1::zeros(output_dim),
        }
    }

    pub fn input_dim(&self) -> usize {
        self.weight.nrows()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.ncols()
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }

    pub fn bias(&self) -> &Array1<f32> {
        &self.bias
    }

    fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        input.dot(&self.weight) + &self.bias
    }

    fn backward(&self, input: &Array2<f32>, grad_out: &Array2<f32>) -> (Array2<f32>, ParamGrads) {
        let grads = ParamGrads {
            weight: input.t().dot(grad_out),
            bias: grad_out.sum_axis(Axis(0)),
        };
        (grad_out.dot(&self.weight.t()), grads)
    }
}

fn check_geometry(
    input_shape: InputShape,
    filters: usize,
    kernel: usize,
    stride: usize,
) -> Result<()> {
    if input_shape.is_empty() || filters == 0 || kernel == 0 || stride == 0 {
        return Err(MirageError::InvalidConfig(format!(
            "convolution needs a non-empty input and positive filters/kernel/stride, \
             got {input_shape} and {filters}/{kernel}/{stride}"
        )));
    }
    if kernel > input_shape.height || kernel > input_shape.width {
        return Err(MirageError::InvalidConfig(format!(
            "kernel {kernel}x{kernel} does not fit input {input_shape}"
        )));
    }
    Ok(())
}

/// 2-D convolution with valid padding, square kernel and uniform stride.
///
/// Weights are stored im2col-style as `filters × (channels · k · k)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2dLayer {
    input_shape: InputShape,
    filters: usize,
    kernel: usize,
    stride: usize,
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Conv2dLayer {
    /// Glorot-uniform filters, zero bias.
    pub fn glorot(
        input_shape: InputShape,
        filters: usize,
        kernel: usize,
        stride: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        check_geometry(input_shape, filters, kernel, stride)?;
        let patch = input_shape.channels * kernel * kernel;
        Ok(Self {
            input_shape,
            filters,
            kernel,
            stride,
            weight: glorot_uniform(filters, patch, patch, filters * kernel * kernel, rng),
            bias: Array1::zeros(filters),
        })
    }

    pub fn input_shape(&self) -> InputShape {
        self.input_shape
    }

    pub fn output_shape(&self) -> InputShape {
        let (height, width) = self.output_hw();
        InputShape::new(self.filters, height, width)
    }

    fn output_hw(&self) -> (usize, usize) {
        (
            (self.input_shape.height - self.kernel) / self.stride + 1,
            (self.input_shape.width - self.kernel) / self.stride + 1,
        )
    }

    fn validate(&self) -> Result<()> {
        check_geometry(self.input_shape, self.filters, self.kernel, self.stride)?;
        let patch = self.input_shape.channels * self.kernel * self.kernel;
        if self.weight.dim() != (self.filters, patch) {
            return Err(MirageError::shape_mismatch(
                vec![self.filters, patch],
                self.weight.shape().to_vec(),
            ));
        }
        check_width(self.filters, self.bias.len())
    }

    /// Patch matrix of one image: `positions × (channels · k · k)`.
    fn im2col(&self, image: ArrayView1<'_, f32>) -> Array2<f32> {
        let InputShape {
            channels,
            height,
            width,
        } = self.input_shape;
        let (out_h, out_w) = self.output_hw();
        let k = self.kernel;
        let mut cols = Array2::zeros((out_h * out_w, channels * k * k));
        for oi in 0..out_h {
            for oj in 0..out_w {
                let position = oi * out_w + oj;
                for c in 0..channels {
                    for ki in 0..k {
                        for kj in 0..k {
                            let y = oi * self.stride + ki;
                            let x = oj * self.stride + kj;
                            cols[[position, (c * k + ki) * k + kj]] =
                                image[(c * height + y) * width + x];
                        }
                    }
                }
            }
        }
        cols
    }

    /// Scatter-add a patch-matrix gradient back onto one image row.
    fn col2im_add(&self, cols: &Array2<f32>, mut image: ArrayViewMut1<'_, f32>) {
        let InputShape {
            channels,
            height,
            width,
        } = self.input_shape;
        let (out_h, out_w) = self.output_hw();
        let k = self.kernel;
        for oi in 0..out_h {
            for oj in 0..out_w {
                let position = oi * out_w + oj;
                for c in 0..channels {
                    for ki in 0..k {
                        for kj in 0..k {
                            let y = oi * self.stride + ki;
                            let x = oj * self.stride + kj;
                            image[(c * height + y) * width + x] +=
                                cols[[position, (c * k + ki) * k + kj]];
                        }
                    }
                }
            }
        }
    }

    fn forward(&self, input: &Array2<f32>) -> Array2<f32> {
        let positions = {
            let (h, w) = self.output_hw();
            h * w
        };
        let mut output = Array2::zeros((input.nrows(), self.filters * positions));
        for (image, mut out_row) in input.rows().into_iter().zip(output.rows_mut()) {
            let response = self.im2col(image).dot(&self.weight.t()) + &self.bias;
            for ((position, filter), value) in response.indexed_iter() {
                out_row[filter * positions + position] = *value;
            }
        }
        output
    }

    fn backward(&self, input: &Array2<f32>, grad_out: &Array2<f32>) -> (Array2<f32>, ParamGrads) {
        let positions = {
            let (h, w) = self.output_hw();
            h * w
        };
        let mut grad_weight = Array2::zeros(self.weight.raw_dim());
        let mut grad_bias = Array1::zeros(self.filters);
        let mut grad_in = Array2::zeros(input.raw_dim());

        for ((image, g_row), gi_row) in input
            .rows()
            .into_iter()
            .zip(grad_out.rows())
            .zip(grad_in.rows_mut())
        {
            let g = Array2::from_shape_fn((positions, self.filters), |(p, f)| {
                g_row[f * positions + p]
            });
            let patches = self.im2col(image);
            grad_weight += &g.t().dot(&patches);
            grad_bias += &g.sum_axis(Axis(0));
            self.col2im_add(&g.dot(&self.weight), gi_row);
        }

        (
            grad_in,
            ParamGrads {
                weight: grad_weight,
                bias: grad_bias,
            },
        )
    }
}

/// A network layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Layer {
    Dense(DenseLayer),
    Conv2d(Conv2dLayer),
    ReLU,
    /// Inverted dropout; `rate` is the drop probability.
    Dropout { rate: f32 },
}

impl Layer {
    pub fn dropout(rate: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&rate) {
            return Err(MirageError::InvalidConfig(format!(
                "dropout rate must be in [0, 1), got {rate}"
            )));
        }
        Ok(Layer::Dropout { rate })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Layer::Dense(_) => "Dense",
            Layer::Conv2d(_) => "Conv2d",
            Layer::ReLU => "ReLU",
            Layer::Dropout { .. } => "Dropout",
        }
    }

    /// Output width for an input of width `input_dim`.
    pub fn output_dim(&self, input_dim: usize) -> Result<usize> {
        match self {
            Layer::Dense(dense) => {
                check_width(dense.output_dim(), dense.bias.len())?;
                check_width(dense.input_dim(), input_dim)?;
                Ok(dense.output_dim())
            }
            Layer::Conv2d(conv) => {
                conv.validate()?;
                check_width(conv.input_shape.len(), input_dim)?;
                Ok(conv.output_shape().len())
            }
            Layer::ReLU => Ok(input_dim),
            Layer::Dropout { rate } => {
                if !(0.0..1.0).contains(rate) {
                    return Err(MirageError::InvalidConfig(format!(
                        "dropout rate must be in [0, 1), got {rate}"
                    )));
                }
                Ok(input_dim)
            }
        }
    }

    pub fn param_count(&self) -> usize {
        match self {
            Layer::Dense(dense) => dense.weight.len() + dense.bias.len(),
            Layer::Conv2d(conv) => conv.weight.len() + conv.bias.len(),
            Layer::ReLU | Layer::Dropout { .. } => 0,
        }
    }

    /// Mutable weight matrix and bias, for layers that have them.
    pub fn params_mut(&mut self) -> Option<(&mut Array2<f32>, &mut Array1<f32>)> {
        match self {
            Layer::Dense(dense) => Some((&mut dense.weight, &mut dense.bias)),
            Layer::Conv2d(conv) => Some((&mut conv.weight, &mut conv.bias)),
            Layer::ReLU | Layer::Dropout { .. } => None,
        }
    }

    pub fn forward(&self, input: Array2<f32>, phase: &mut Phase<'_>) -> (Array2<f32>, Cache) {
        match self {
            Layer::Dense(dense) => (dense.forward(&input), Cache::Input(input)),
            Layer::Conv2d(conv) => (conv.forward(&input), Cache::Input(input)),
            Layer::ReLU => (input.mapv(|v| v.max(0.0)), Cache::PreActivation(input)),
            Layer::Dropout { rate } => match phase {
                Phase::Training(rng) if *rate > 0.0 => {
                    let keep = 1.0 - rate;
                    let mask = Array2::from_shape_fn(input.raw_dim(), |_| {
                        if rng.random::<f32>() < keep {
                            1.0 / keep
                        } else {
                            0.0
                        }
                    });
                    (input * &mask, Cache::Mask(Some(mask)))
                }
                _ => (input, Cache::Mask(None)),
            },
        }
    }

    /// Gradient with respect to the layer input, plus parameter gradients for
    /// layers that have parameters.
    pub fn backward(
        &self,
        cache: &Cache,
        grad_out: Array2<f32>,
    ) -> Result<(Array2<f32>, Option<ParamGrads>)> {
        match (self, cache) {
            (Layer::Dense(dense), Cache::Input(input)) => {
                let (grad_in, grads) = dense.backward(input, &grad_out);
                Ok((grad_in, Some(grads)))
            }
            (Layer::Conv2d(conv), Cache::Input(input)) => {
                let (grad_in, grads) = conv.backward(input, &grad_out);
                Ok((grad_in, Some(grads)))
            }
            (Layer::ReLU, Cache::PreActivation(pre)) => {
                let mut grad = grad_out;
                grad.zip_mut_with(pre, |g, &x| {
                    if x <= 0.0 {
                        *g = 0.0;
                    }
                });
                Ok((grad, None))
            }
            (Layer::Dropout { .. }, Cache::Mask(mask)) => match mask {
                Some(mask) => Ok((grad_out * mask, None)),
                None => Ok((grad_out, None)),
            },
            (layer, _) => Err(MirageError::InvalidConfig(format!(
                "forward cache does not belong to a {} layer",
                layer.name()
            ))),
        }
    }
}
