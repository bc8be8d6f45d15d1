//! Building blocks of the convolutional network, with the forward and
//! backward passes needed for training. Images are `(channels, height, width)`.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::ClassifierError;

/// Weights and biases of one trainable layer. Gradients and optimizer
/// moments share this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub weights: Array2<f32>,
    pub bias: Array1<f32>,
}

impl Params {
    /// Glorot-uniform weights, zero bias.
    pub(crate) fn glorot(rows: usize, cols: usize, fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Self {
        let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
        Self {
            weights: Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..=limit)),
            bias: Array1::zeros(rows),
        }
    }

    pub(crate) fn zeros_like(other: &Params) -> Self {
        Self {
            weights: Array2::zeros(other.weights.raw_dim()),
            bias: Array1::zeros(other.bias.raw_dim()),
        }
    }

    pub(crate) fn add_assign(&mut self, other: &Params) {
        self.weights += &other.weights;
        self.bias += &other.bias;
    }

    pub(crate) fn scale(&mut self, factor: f32) {
        self.weights *= factor;
        self.bias *= factor;
    }
}

/// Valid (unpadded) convolution with stride 1, computed through im2col.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conv2d {
    pub(crate) in_channels: usize,
    pub(crate) kernel: usize,
    pub(crate) params: Params,
}

impl Conv2d {
    pub(crate) fn new(in_channels: usize, filters: usize, kernel: usize, rng: &mut StdRng) -> Self {
        let area = kernel * kernel;
        Self {
            in_channels,
            kernel,
            params: Params::glorot(filters, in_channels * area, in_channels * area, filters * area, rng),
        }
    }

    pub fn filters(&self) -> usize {
        self.params.weights.nrows()
    }

    /// Returns the activation and the unrolled input patches used by `backward`.
    pub(crate) fn forward(&self, x: &Array3<f32>) -> Result<(Array3<f32>, Array2<f32>), ClassifierError> {
        let (c, h, w) = x.dim();
        if c != self.in_channels || h < self.kernel || w < self.kernel {
            return Err(ClassifierError::ShapeError(format!(
                "Convolution expects {} channels of at least {}x{}, got {:?}",
                self.in_channels,
                self.kernel,
                self.kernel,
                x.dim()
            )));
        }
        let (oh, ow) = (h - self.kernel + 1, w - self.kernel + 1);
        let cols = im2col(x, self.kernel);
        let mut out = self.params.weights.dot(&cols);
        out += &self.params.bias.view().insert_axis(Axis(1));
        let out = out.into_shape_with_order((self.filters(), oh, ow))?;
        Ok((out, cols))
    }

    /// Gradients of the parameters and, when `need_input` is set, of the input.
    pub(crate) fn backward(
        &self,
        cols: &Array2<f32>,
        grad_out: &Array3<f32>,
        input_shape: (usize, usize, usize),
        need_input: bool,
    ) -> Result<(Params, Option<Array3<f32>>), ClassifierError> {
        let (f, oh, ow) = grad_out.dim();
        let grad = grad_out
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order((f, oh * ow))?;
        let params = Params {
            weights: grad.dot(&cols.t()),
            bias: grad.sum_axis(Axis(1)),
        };
        let grad_input = if need_input {
            let grad_cols = self.params.weights.t().dot(&grad);
            Some(col2im(&grad_cols, input_shape, self.kernel))
        } else {
            None
        };
        Ok((params, grad_input))
    }
}

/// Unrolls every `kernel`x`kernel` patch into a column, shape `(c*k*k, oh*ow)`.
pub(crate) fn im2col(x: &Array3<f32>, kernel: usize) -> Array2<f32> {
    let (c, h, w) = x.dim();
    let (oh, ow) = (h + 1 - kernel, w + 1 - kernel);
    let mut cols = Array2::zeros((c * kernel * kernel, oh * ow));
    for ch in 0..c {
        for ky in 0..kernel {
            for kx in 0..kernel {
                let row = (ch * kernel + ky) * kernel + kx;
                let patch = x.slice(s![ch, ky..ky + oh, kx..kx + ow]);
                for (dst, src) in cols.row_mut(row).iter_mut().zip(patch.iter()) {
                    *dst = *src;
                }
            }
        }
    }
    cols
}

/// Scatters column gradients back onto the input grid, summing overlaps.
pub(crate) fn col2im(cols: &Array2<f32>, shape: (usize, usize, usize), kernel: usize) -> Array3<f32> {
    let (c, h, w) = shape;
    let (oh, ow) = (h + 1 - kernel, w + 1 - kernel);
    let mut x = Array3::zeros(shape);
    for ch in 0..c {
        for ky in 0..kernel {
            for kx in 0..kernel {
                let row = (ch * kernel + ky) * kernel + kx;
                let mut patch = x.slice_mut(s![ch, ky..ky + oh, kx..kx + ow]);
                for (dst, src) in patch.iter_mut().zip(cols.row(row).iter()) {
                    *dst += *src;
                }
            }
        }
    }
    x
}

/// Non-overlapping max pooling; trailing rows and columns that do not fill
/// a window are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaxPool2d {
    pub size: usize,
}

impl MaxPool2d {
    /// Pooled output plus the `(y, x)` source of each output cell, in output order.
    pub(crate) fn forward(&self, x: &Array3<f32>) -> (Array3<f32>, Vec<(usize, usize)>) {
        let (c, h, w) = x.dim();
        let (oh, ow) = (h / self.size, w / self.size);
        let mut out = Array3::zeros((c, oh, ow));
        let mut argmax = Vec::with_capacity(c * oh * ow);
        for ch in 0..c {
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut best = (oy * self.size, ox * self.size);
                    let mut best_val = f32::NEG_INFINITY;
                    for y in oy * self.size..(oy + 1) * self.size {
                        for xx in ox * self.size..(ox + 1) * self.size {
                            let v = x[[ch, y, xx]];
                            if v > best_val {
                                best_val = v;
                                best = (y, xx);
                            }
                        }
                    }
                    out[[ch, oy, ox]] = best_val;
                    argmax.push(best);
                }
            }
        }
        (out, argmax)
    }

    pub(crate) fn backward(
        &self,
        grad_out: &Array3<f32>,
        argmax: &[(usize, usize)],
        input_shape: (usize, usize, usize),
    ) -> Array3<f32> {
        let mut grad = Array3::zeros(input_shape);
        let (c, oh, ow) = grad_out.dim();
        let mut cell = argmax.iter();
        for ch in 0..c {
            for oy in 0..oh {
                for ox in 0..ow {
                    if let Some(&(y, x)) = cell.next() {
                        grad[[ch, y, x]] += grad_out[[ch, oy, ox]];
                    }
                }
            }
        }
        grad
    }
}

/// Fully connected layer, weights shaped `(outputs, inputs)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    pub(crate) params: Params,
}

impl Dense {
    pub(crate) fn new(inputs: usize, outputs: usize, rng: &mut StdRng) -> Self {
        Self {
            params: Params::glorot(outputs, inputs, inputs, outputs, rng),
        }
    }

    pub fn inputs(&self) -> usize {
        self.params.weights.ncols()
    }

    pub fn outputs(&self) -> usize {
        self.params.weights.nrows()
    }

    pub(crate) fn forward(&self, x: ArrayView1<f32>) -> Array1<f32> {
        self.params.weights.dot(&x) + &self.params.bias
    }

    pub(crate) fn backward(&self, input: ArrayView1<f32>, grad_out: &Array1<f32>) -> (Params, Array1<f32>) {
        let weights = grad_out
            .view()
            .insert_axis(Axis(1))
            .dot(&input.insert_axis(Axis(0)));
        let params = Params {
            weights,
            bias: grad_out.clone(),
        };
        (params, self.params.weights.t().dot(grad_out))
    }
}

pub(crate) fn relu<D: ndarray::Dimension>(x: &mut ndarray::Array<f32, D>) {
    x.mapv_inplace(|v| v.max(0.0));
}

/// Zeroes gradient entries whose activation was clipped by ReLU.
pub(crate) fn relu_backward<D: ndarray::Dimension>(
    grad: &mut ndarray::Array<f32, D>,
    activation: &ndarray::Array<f32, D>,
) {
    ndarray::Zip::from(grad)
        .and(activation)
        .for_each(|g, &a| {
            if a <= 0.0 {
                *g = 0.0;
            }
        });
}

/// Inverted dropout mask: kept units are scaled by `1 / (1 - rate)`.
pub(crate) fn dropout_mask<D: ndarray::Dimension>(shape: D, rate: f32, rng: &mut StdRng) -> ndarray::Array<f32, D> {
    if rate <= 0.0 {
        return ndarray::Array::ones(shape);
    }
    let keep = 1.0 / (1.0 - rate);
    ndarray::Array::from_shape_simple_fn(shape, || if rng.gen::<f32>() >= rate { keep } else { 0.0 })
}

pub(crate) fn softmax(logits: &Array1<f32>) -> Array1<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_im2col_col2im_adjoint() {
        // <im2col(x), y> == <x, col2im(y)>
        let x = Array3::from_shape_fn((2, 5, 4), |(c, y, x)| (c * 20 + y * 4 + x) as f32 * 0.1);
        let cols = im2col(&x, 3);
        let y = Array2::from_shape_fn(cols.raw_dim(), |(i, j)| ((i + 2 * j) % 7) as f32 - 3.0);
        let lhs: f32 = (&cols * &y).sum();
        let rhs: f32 = (&x * &col2im(&y, x.dim(), 3)).sum();
        assert!((lhs - rhs).abs() < 1e-3);
    }

    #[test]
    fn test_conv_gradient_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(3);
        let conv = Conv2d::new(1, 2, 3, &mut rng);
        let x = Array3::from_shape_fn((1, 5, 5), |(_, y, x)| ((y * 5 + x) as f32 * 0.37).sin());

        // Loss = sum of outputs, so the output gradient is all ones
        let (out, cols) = conv.forward(&x).unwrap();
        let (grads, _) = conv
            .backward(&cols, &Array3::ones(out.raw_dim()), x.dim(), false)
            .unwrap();

        let eps = 1e-2;
        let mut bumped = conv.clone();
        bumped.params.weights[[1, 4]] += eps;
        let plus = bumped.forward(&x).unwrap().0.sum();
        bumped.params.weights[[1, 4]] -= 2.0 * eps;
        let minus = bumped.forward(&x).unwrap().0.sum();
        let numeric = (plus - minus) / (2.0 * eps);
        assert!((numeric - grads.weights[[1, 4]]).abs() < 1e-2);
        assert!((grads.bias[0] - 9.0).abs() < 1e-5);
    }

    #[test]
    fn test_maxpool_routes_gradient_to_max() {
        let x = Array3::from_shape_vec((1, 2, 3), vec![1.0, 5.0, 9.0, 3.0, 2.0, 0.0]).unwrap();
        let pool = MaxPool2d { size: 2 };
        let (out, argmax) = pool.forward(&x);
        assert_eq!(out.dim(), (1, 1, 1));
        assert_eq!(out[[0, 0, 0]], 5.0);
        let grad = pool.backward(&Array3::ones((1, 1, 1)), &argmax, x.dim());
        assert_eq!(grad[[0, 0, 1]], 1.0);
        assert_eq!(grad.sum(), 1.0);
    }

    #[test]
    fn test_softmax_is_a_distribution() {
        let p = softmax(&Array1::from(vec![1000.0, 1001.0, 999.0]));
        assert!((p.sum() - 1.0).abs() < 1e-6);
        assert!(p[1] > p[0] && p[0] > p[2]);
    }

    #[test]
    fn test_dropout_mask_scales_kept_units() {
        let mut rng = StdRng::seed_from_u64(1);
        let mask = dropout_mask(ndarray::Ix1(10_000), 0.25, &mut rng);
        assert!(mask.iter().all(|&m| m == 0.0 || (m - 4.0 / 3.0).abs() < 1e-6));
        let mean = mask.mean().unwrap_or(0.0);
        assert!((mean - 1.0).abs() < 0.05);
    }
}
