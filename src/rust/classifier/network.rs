use ndarray::{Array1, Array3, Ix1, Ix3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::error::ClassifierError;
use super::layers::{
    dropout_mask, relu, relu_backward, softmax, Conv2d, Dense, MaxPool2d, Params,
};

/// Lower clip applied to probabilities before taking the log loss.
const PROB_EPSILON: f32 = 1e-7;

/// Fixed layer layout of the spectrogram classifier.
///
/// Each entry of `conv_filters` is one block: convolution with ReLU,
/// max-pooling, then dropout at `conv_dropout`. The flattened output feeds a
/// ReLU dense layer of `dense_units` with `dense_dropout`, then a softmax
/// layer with one unit per class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureDescriptor {
    pub input_size: usize,
    pub channels: usize,
    pub conv_filters: Vec<usize>,
    pub kernel_size: usize,
    pub pool_size: usize,
    pub conv_dropout: f32,
    pub dense_units: usize,
    pub dense_dropout: f32,
    pub num_classes: usize,
}

impl ArchitectureDescriptor {
    /// Two blocks of 32 and 64 3x3 filters over 128x128 color images.
    pub fn standard(num_classes: usize) -> Self {
        Self {
            input_size: 128,
            channels: 3,
            conv_filters: vec![32, 64],
            kernel_size: 3,
            pool_size: 2,
            conv_dropout: 0.25,
            dense_units: 128,
            dense_dropout: 0.5,
            num_classes,
        }
    }

    /// Side length of the feature map after every block, or `None` if it
    /// shrinks to nothing.
    pub fn final_map_size(&self) -> Option<usize> {
        let mut size = self.input_size;
        for _ in &self.conv_filters {
            size = size.checked_sub(self.kernel_size.checked_sub(1)?)?;
            size /= self.pool_size.max(1);
            if size == 0 {
                return None;
            }
        }
        Some(size)
    }

    pub fn flattened_len(&self) -> usize {
        let channels = self.conv_filters.last().copied().unwrap_or(self.channels);
        let side = self.final_map_size().unwrap_or(0);
        channels * side * side
    }

    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.num_classes == 0 {
            return Err(ClassifierError::BuildError("Network needs at least one class".into()));
        }
        if self.channels == 0 || self.kernel_size == 0 || self.pool_size == 0 || self.dense_units == 0 {
            return Err(ClassifierError::BuildError(
                "Channels, kernel, pool and dense sizes must be positive".into(),
            ));
        }
        if self.conv_filters.is_empty() || self.conv_filters.contains(&0) {
            return Err(ClassifierError::BuildError(
                "At least one convolution block with a positive filter count is required".into(),
            ));
        }
        for rate in [self.conv_dropout, self.dense_dropout] {
            if !(0.0..1.0).contains(&rate) {
                return Err(ClassifierError::BuildError(format!(
                    "Dropout rate {} outside [0, 1)",
                    rate
                )));
            }
        }
        if self.final_map_size().is_none() {
            return Err(ClassifierError::BuildError(format!(
                "Input of {}px is too small for {} blocks of kernel {} and pool {}",
                self.input_size,
                self.conv_filters.len(),
                self.kernel_size,
                self.pool_size
            )));
        }
        Ok(())
    }
}

/// Intermediate values of one block, kept for backpropagation.
struct BlockTrace {
    input_shape: (usize, usize, usize),
    cols: ndarray::Array2<f32>,
    activation: Array3<f32>,
    argmax: Vec<(usize, usize)>,
    mask: Option<Array3<f32>>,
}

/// Everything the backward pass needs from one forward pass.
pub(crate) struct Trace {
    blocks: Vec<BlockTrace>,
    pooled_shape: (usize, usize, usize),
    flat: Array1<f32>,
    hidden: Array1<f32>,
    hidden_mask: Option<Array1<f32>>,
    hidden_out: Array1<f32>,
    pub(crate) probabilities: Array1<f32>,
}

/// Convolutional emotion classifier over `(channels, size, size)` images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionCnn {
    architecture: ArchitectureDescriptor,
    convs: Vec<Conv2d>,
    pool: MaxPool2d,
    dense: Dense,
    output: Dense,
}

impl EmotionCnn {
    /// Glorot-initialized network; the same seed always yields the same weights.
    pub fn new(architecture: ArchitectureDescriptor, seed: u64) -> Result<Self, ClassifierError> {
        architecture.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut convs = Vec::with_capacity(architecture.conv_filters.len());
        let mut in_channels = architecture.channels;
        for &filters in &architecture.conv_filters {
            convs.push(Conv2d::new(in_channels, filters, architecture.kernel_size, &mut rng));
            in_channels = filters;
        }
        let dense = Dense::new(architecture.flattened_len(), architecture.dense_units, &mut rng);
        let output = Dense::new(architecture.dense_units, architecture.num_classes, &mut rng);

        Ok(Self {
            pool: MaxPool2d {
                size: architecture.pool_size,
            },
            architecture,
            convs,
            dense,
            output,
        })
    }

    pub fn architecture(&self) -> &ArchitectureDescriptor {
        &self.architecture
    }

    pub fn num_classes(&self) -> usize {
        self.architecture.num_classes
    }

    /// Checks that deserialized weights agree with the descriptor they were saved with.
    pub fn check_consistency(&self) -> Result<(), ClassifierError> {
        self.architecture.validate()?;
        let arch = &self.architecture;
        let conv_ok = self.convs.len() == arch.conv_filters.len()
            && self
                .convs
                .iter()
                .zip(&arch.conv_filters)
                .all(|(conv, &filters)| conv.filters() == filters && conv.kernel == arch.kernel_size);
        if !conv_ok
            || self.pool.size != arch.pool_size
            || self.dense.inputs() != arch.flattened_len()
            || self.dense.outputs() != arch.dense_units
            || self.output.inputs() != arch.dense_units
            || self.output.outputs() != arch.num_classes
        {
            return Err(ClassifierError::ValidationError(
                "Stored weights do not match the architecture descriptor".into(),
            ));
        }
        Ok(())
    }

    /// Class probabilities for one image, without dropout.
    pub fn predict_proba(&self, image: &Array3<f32>) -> Result<Array1<f32>, ClassifierError> {
        Ok(self.forward(image, None)?.probabilities)
    }

    pub(crate) fn forward(
        &self,
        image: &Array3<f32>,
        mut rng: Option<&mut StdRng>,
    ) -> Result<Trace, ClassifierError> {
        let arch = &self.architecture;
        let expected = (arch.channels, arch.input_size, arch.input_size);
        if image.dim() != expected {
            return Err(ClassifierError::ShapeError(format!(
                "Expected image of shape {:?}, got {:?}",
                expected,
                image.dim()
            )));
        }

        let mut blocks = Vec::with_capacity(self.convs.len());
        let mut x = image.clone();
        for conv in &self.convs {
            let input_shape = x.dim();
            let (mut activation, cols) = conv.forward(&x)?;
            relu(&mut activation);
            let (mut pooled, argmax) = self.pool.forward(&activation);
            let mask = match rng.as_deref_mut() {
                Some(rng) => {
                    let mask = dropout_mask::<Ix3>(pooled.raw_dim(), arch.conv_dropout, rng);
                    pooled *= &mask;
                    Some(mask)
                }
                None => None,
            };
            blocks.push(BlockTrace {
                input_shape,
                cols,
                activation,
                argmax,
                mask,
            });
            x = pooled;
        }

        let pooled_shape = x.dim();
        let flat = Array1::from_iter(x.iter().copied());
        let mut hidden = self.dense.forward(flat.view());
        relu(&mut hidden);
        let (hidden_out, hidden_mask) = match rng.as_deref_mut() {
            Some(rng) => {
                let mask = dropout_mask::<Ix1>(hidden.raw_dim(), arch.dense_dropout, rng);
                (&hidden * &mask, Some(mask))
            }
            None => (hidden.clone(), None),
        };
        let probabilities = softmax(&self.output.forward(hidden_out.view()));

        Ok(Trace {
            blocks,
            pooled_shape,
            flat,
            hidden,
            hidden_mask,
            hidden_out,
            probabilities,
        })
    }

    /// Categorical cross-entropy of a trace against the true class.
    pub(crate) fn loss(trace: &Trace, target: usize) -> f32 {
        let p = trace
            .probabilities
            .get(target)
            .copied()
            .unwrap_or(0.0)
            .clamp(PROB_EPSILON, 1.0 - PROB_EPSILON);
        -p.ln()
    }

    /// Parameter gradients of the cross-entropy loss, ordered like `params_mut`.
    pub(crate) fn backward(&self, trace: Trace, target: usize) -> Result<Vec<Params>, ClassifierError> {
        if target >= self.num_classes() {
            return Err(ClassifierError::TrainingError(format!(
                "Target class {} out of range for {} classes",
                target,
                self.num_classes()
            )));
        }
        let mut grad_logits = trace.probabilities.clone();
        grad_logits[target] -= 1.0;

        let (output_grads, mut grad_hidden) = self.output.backward(trace.hidden_out.view(), &grad_logits);
        if let Some(mask) = &trace.hidden_mask {
            grad_hidden *= mask;
        }
        relu_backward(&mut grad_hidden, &trace.hidden);
        let (dense_grads, grad_flat) = self.dense.backward(trace.flat.view(), &grad_hidden);

        let mut grad = grad_flat.into_shape_with_order(trace.pooled_shape)?;
        let mut conv_grads = Vec::with_capacity(self.convs.len());
        for (i, (conv, block)) in self.convs.iter().zip(trace.blocks.iter()).enumerate().rev() {
            if let Some(mask) = &block.mask {
                grad *= mask;
            }
            let mut grad_act = self
                .pool
                .backward(&grad, &block.argmax, block.activation.dim());
            relu_backward(&mut grad_act, &block.activation);
            let (params, grad_input) = conv.backward(&block.cols, &grad_act, block.input_shape, i > 0)?;
            conv_grads.push(params);
            if let Some(g) = grad_input {
                grad = g;
            }
        }
        conv_grads.reverse();

        conv_grads.push(dense_grads);
        conv_grads.push(output_grads);
        Ok(conv_grads)
    }

    /// Trainable layers in a fixed order: convolutions, dense, output.
    pub(crate) fn params_mut(&mut self) -> Vec<&mut Params> {
        self.convs
            .iter_mut()
            .map(|c| &mut c.params)
            .chain(std::iter::once(&mut self.dense.params))
            .chain(std::iter::once(&mut self.output.params))
            .collect()
    }

    /// Total number of trainable scalars.
    pub fn parameter_count(&self) -> usize {
        self.convs
            .iter()
            .map(|c| &c.params)
            .chain([&self.dense.params, &self.output.params])
            .map(|p| p.weights.len() + p.bias.len())
            .sum()
    }
}
