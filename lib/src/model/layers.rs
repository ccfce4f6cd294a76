use ndarray::{Array1, Array2, Axis};
use ndarray_rand::{rand_distr::Uniform, RandomExt};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Fully connected stage: `y = x W + b`, with `W` stored `in x out`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
  pub weight: Array2<f64>,
  pub bias: Array1<f64>,
}

/// Parameter gradients of one linear stage.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearGrad {
  pub weight: Array2<f64>,
  pub bias: Array1<f64>,
}

impl Linear {
  /// Uniform init in `±1/sqrt(fan_in)` for both weights and bias.
  pub fn new<R: Rng>(fan_in: usize, fan_out: usize, rng: &mut R) -> Self {
    let bound = 1.0 / (fan_in as f64).sqrt();
    let dist = Uniform::new(-bound, bound);
    Self {
      weight: Array2::random_using((fan_in, fan_out), dist, rng),
      bias: Array1::random_using(fan_out, dist, rng),
    }
  }

  pub fn fan_in(&self) -> usize {
    self.weight.nrows()
  }

  pub fn fan_out(&self) -> usize {
    self.weight.ncols()
  }

  pub fn forward(&self, x: &Array2<f64>) -> Array2<f64> {
    x.dot(&self.weight) + &self.bias
  }

  /// Returns the gradient w.r.t. the stage input alongside the parameter gradients.
  pub fn backward(&self, input: &Array2<f64>, grad_out: &Array2<f64>) -> (Array2<f64>, LinearGrad) {
    let grad = LinearGrad {
      weight: input.t().dot(grad_out),
      bias: grad_out.sum_axis(Axis(0)),
    };
    (grad_out.dot(&self.weight.t()), grad)
  }
}

pub fn leaky_relu(x: &Array2<f64>, slope: f64) -> Array2<f64> {
  x.mapv(|v| if v > 0.0 { v } else { slope * v })
}

pub fn leaky_relu_backward(input: &Array2<f64>, grad_out: &Array2<f64>, slope: f64) -> Array2<f64> {
  let mut grad = grad_out.clone();
  grad.zip_mut_with(input, |g, &x| {
    if x <= 0.0 {
      *g *= slope
    }
  });
  grad
}

/// Inverted dropout mask: kept units are scaled by `1/(1-p)` so eval needs no rescaling.
pub fn dropout_mask<R: Rng>(shape: (usize, usize), p: f64, rng: &mut R) -> Array2<f64> {
  let keep = 1.0 / (1.0 - p);
  Array2::from_shape_simple_fn(shape, || if rng.gen::<f64>() < p { 0.0 } else { keep })
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;
  use rand::{rngs::StdRng, SeedableRng};

  #[test]
  fn init_respects_fan_in_bound() {
    let mut rng = StdRng::seed_from_u64(0);
    let l = Linear::new(16, 4, &mut rng);
    assert_eq!(l.weight.dim(), (16, 4));
    assert_eq!(l.bias.len(), 4);
    assert!(l.weight.iter().chain(l.bias.iter()).all(|w| w.abs() <= 0.25));
  }

  #[test]
  fn linear_forward_adds_bias_per_row() {
    let l = Linear {
      weight: array![[1.0, 0.0], [0.0, 2.0]],
      bias: array![0.5, -1.0],
    };
    let y = l.forward(&array![[1.0, 1.0], [2.0, 3.0]]);
    assert_eq!(y, array![[1.5, 1.0], [2.5, 5.0]]);
  }

  #[test]
  fn leaky_relu_scales_negatives() {
    let y = leaky_relu(&array![[-2.0, 0.0, 3.0]], 0.01);
    assert_eq!(y, array![[-0.02, 0.0, 3.0]]);
    let g = leaky_relu_backward(&array![[-2.0, 1.0]], &array![[1.0, 1.0]], 0.01);
    assert_eq!(g, array![[0.01, 1.0]]);
  }

  #[test]
  fn dropout_mask_is_inverted() {
    let mut rng = StdRng::seed_from_u64(5);
    let m = dropout_mask((50, 50), 0.5, &mut rng);
    assert!(m.iter().all(|v| *v == 0.0 || *v == 2.0));
    let kept = m.iter().filter(|v| **v > 0.0).count();
    assert!(kept > 1000 && kept < 1500);
  }
}
