use ndarray::{Array, Dimension, Zip};

use super::error::ClassifierError;
use super::layers::Params;

/// Adam with bias-corrected step size.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    step: i32,
    first: Vec<Params>,
    second: Vec<Params>,
}

impl Adam {
    pub fn new(learning_rate: f32) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-7,
            step: 0,
            first: Vec::new(),
            second: Vec::new(),
        }
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Applies one update. `grads` must follow the order of `params`.
    pub fn step(&mut self, params: Vec<&mut Params>, grads: &[Params]) -> Result<(), ClassifierError> {
        if params.len() != grads.len() {
            return Err(ClassifierError::TrainingError(format!(
                "{} parameter groups but {} gradients",
                params.len(),
                grads.len()
            )));
        }
        if self.first.is_empty() {
            self.first = grads.iter().map(Params::zeros_like).collect();
            self.second = grads.iter().map(Params::zeros_like).collect();
        }

        self.step += 1;
        let correction1 = 1.0 - self.beta1.powi(self.step);
        let correction2 = 1.0 - self.beta2.powi(self.step);
        let lr = self.learning_rate * correction2.sqrt() / correction1;

        for (((param, grad), m), v) in params
            .into_iter()
            .zip(grads)
            .zip(self.first.iter_mut())
            .zip(self.second.iter_mut())
        {
            if param.weights.raw_dim() != grad.weights.raw_dim() || param.bias.raw_dim() != grad.bias.raw_dim() {
                return Err(ClassifierError::TrainingError(
                    "Gradient shape does not match parameter shape".into(),
                ));
            }
            let hyper = (lr, self.beta1, self.beta2, self.epsilon);
            update(&mut param.weights, &grad.weights, &mut m.weights, &mut v.weights, hyper);
            update(&mut param.bias, &grad.bias, &mut m.bias, &mut v.bias, hyper);
        }
        Ok(())
    }
}

fn update<D: Dimension>(
    param: &mut Array<f32, D>,
    grad: &Array<f32, D>,
    m: &mut Array<f32, D>,
    v: &mut Array<f32, D>,
    (lr, beta1, beta2, epsilon): (f32, f32, f32, f32),
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            *p -= lr * *m / (v.sqrt() + epsilon);
        });
}
