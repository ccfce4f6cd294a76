use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::layers::{dropout_mask, leaky_relu, leaky_relu_backward, Linear, LinearGrad};
use crate::{Error, Result};

/// Hyperparameters that fix the shape of the network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
  pub input_width: usize,
  pub first_width: usize,
  pub hidden_layers: usize,
  pub decay: f64,
  pub leak_rate: f64,
  pub dropout: f64,
}

impl Architecture {
  pub fn validate(&self) -> Result<()> {
    if self.input_width == 0 || self.first_width == 0 {
      return Err(Error::InvalidConfig(format!(
        "input width {} and first hidden width {} must be non-zero",
        self.input_width, self.first_width
      )));
    }
    if !(self.decay > 0.0 && self.decay <= 1.0) {
      return Err(Error::InvalidConfig(format!(
        "neuron decay must lie in (0, 1], got {}",
        self.decay
      )));
    }
    if !(0.0..1.0).contains(&self.dropout) {
      return Err(Error::InvalidConfig(format!(
        "dropout must lie in [0, 1), got {}",
        self.dropout
      )));
    }
    if !(self.leak_rate >= 0.0) {
      return Err(Error::InvalidConfig(format!(
        "leak rate must be non-negative, got {}",
        self.leak_rate
      )));
    }
    Ok(())
  }

  /// Widths of every hidden layer: `first_width`, then `hidden_layers` more,
  /// each `ceil(decay * previous)`.
  pub fn hidden_widths(&self) -> Vec<usize> {
    let mut widths = Vec::with_capacity(self.hidden_layers + 1);
    let mut width = self.first_width;
    widths.push(width);
    for _ in 0..self.hidden_layers {
      width = (self.decay * width as f64).ceil() as usize;
      widths.push(width);
    }
    widths
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stage {
  Linear(Linear),
  LeakyRelu { slope: f64 },
  Dropout { p: f64 },
}

/// What a training forward pass remembers for backprop, one entry per stage.
#[derive(Debug)]
pub struct ForwardCache {
  inputs: Vec<Array2<f64>>,
  masks: Vec<Option<Array2<f64>>>,
}

/// A strictly narrowing feed-forward regressor with a single scalar output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
  pub architecture: Architecture,
  pub stages: Vec<Stage>,
}

impl Network {
  pub fn build<R: Rng>(arch: Architecture, rng: &mut R) -> Result<Self> {
    arch.validate()?;
    let widths = arch.hidden_widths();
    let mut stages = vec![Stage::Linear(Linear::new(arch.input_width, widths[0], rng))];
    for pair in widths.windows(2) {
      stages.push(Stage::LeakyRelu { slope: arch.leak_rate });
      if arch.dropout > 0.0 {
        stages.push(Stage::Dropout { p: arch.dropout });
      }
      stages.push(Stage::Linear(Linear::new(pair[0], pair[1], rng)));
    }
    stages.push(Stage::LeakyRelu { slope: arch.leak_rate });
    stages.push(Stage::Linear(Linear::new(widths[widths.len() - 1], 1, rng)));
    Ok(Self {
      architecture: arch,
      stages,
    })
  }

  pub fn linear_stages(&self) -> impl Iterator<Item = &Linear> {
    self.stages.iter().filter_map(|s| match s {
      Stage::Linear(l) => Some(l),
      _ => None,
    })
  }

  pub fn linear_stages_mut(&mut self) -> impl Iterator<Item = &mut Linear> {
    self.stages.iter_mut().filter_map(|s| match s {
      Stage::Linear(l) => Some(l),
      _ => None,
    })
  }

  pub fn num_parameters(&self) -> usize {
    self.linear_stages().map(|l| l.weight.len() + l.bias.len()).sum()
  }

  fn check_input(&self, x: &Array2<f64>) -> Result<()> {
    if x.ncols() != self.architecture.input_width {
      return Err(Error::ArityMismatch {
        expected: self.architecture.input_width,
        got: x.ncols(),
      });
    }
    Ok(())
  }

  /// Inference pass: dropout is the identity. Returns an `n x 1` column.
  pub fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
    self.check_input(x)?;
    let mut h = x.to_owned();
    for stage in &self.stages {
      h = match stage {
        Stage::Linear(l) => l.forward(&h),
        Stage::LeakyRelu { slope } => leaky_relu(&h, *slope),
        Stage::Dropout { .. } => h,
      };
    }
    Ok(h)
  }

  /// Training pass over the full batch, keeping every stage input for `backward`.
  pub fn forward_train<R: Rng>(&self, x: &Array2<f64>, rng: &mut R) -> Result<(Array2<f64>, ForwardCache)> {
    self.check_input(x)?;
    let mut cache = ForwardCache {
      inputs: Vec::with_capacity(self.stages.len()),
      masks: Vec::with_capacity(self.stages.len()),
    };
    let mut h = x.to_owned();
    for stage in &self.stages {
      let (out, mask) = match stage {
        Stage::Linear(l) => (l.forward(&h), None),
        Stage::LeakyRelu { slope } => (leaky_relu(&h, *slope), None),
        Stage::Dropout { p } => {
          let mask = dropout_mask(h.dim(), *p, rng);
          (&h * &mask, Some(mask))
        }
      };
      cache.inputs.push(h);
      cache.masks.push(mask);
      h = out;
    }
    Ok((h, cache))
  }

  /// Backprop of `grad_out` (dLoss/dOutput) through the cached pass.
  /// Gradients come back in the order of `linear_stages`.
  pub fn backward(&self, cache: &ForwardCache, grad_out: &Array2<f64>) -> Vec<LinearGrad> {
    let mut grads = Vec::new();
    let mut g = grad_out.to_owned();
    for (i, stage) in self.stages.iter().enumerate().rev() {
      let input = &cache.inputs[i];
      g = match stage {
        Stage::Linear(l) => {
          let (g_in, grad) = l.backward(input, &g);
          grads.push(grad);
          g_in
        }
        Stage::LeakyRelu { slope } => leaky_relu_backward(input, &g, *slope),
        Stage::Dropout { .. } => match &cache.masks[i] {
          Some(mask) => g * mask,
          None => g,
        },
      };
    }
    grads.reverse();
    grads
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{array, Array2};
  use rand::{rngs::StdRng, SeedableRng};

  fn arch(input: usize, first: usize, layers: usize, decay: f64, dropout: f64) -> Architecture {
    Architecture {
      input_width: input,
      first_width: first,
      hidden_layers: layers,
      decay,
      leak_rate: 0.01,
      dropout,
    }
  }

  fn linear_shapes(net: &Network) -> Vec<(usize, usize)> {
    net.linear_stages().map(|l| (l.fan_in(), l.fan_out())).collect()
  }

  #[test]
  fn default_widths_halve() {
    let a = arch(18, 256, 3, 0.5, 0.0);
    assert_eq!(a.hidden_widths(), vec![256, 128, 64, 32]);
    let net = Network::build(a, &mut StdRng::seed_from_u64(0)).unwrap();
    assert_eq!(
      linear_shapes(&net),
      vec![(18, 256), (256, 128), (128, 64), (64, 32), (32, 1)]
    );
  }

  #[test]
  fn widths_round_up() {
    assert_eq!(arch(4, 3, 1, 0.5, 0.0).hidden_widths(), vec![3, 2]);
    assert_eq!(arch(4, 10, 3, 0.75, 0.0).hidden_widths(), vec![10, 8, 6, 5]);
  }

  #[test]
  fn stage_sequence_without_and_with_dropout() {
    let mut rng = StdRng::seed_from_u64(1);
    let plain = Network::build(arch(2, 4, 1, 0.5, 0.0), &mut rng).unwrap();
    let kinds: Vec<_> = plain
      .stages
      .iter()
      .map(|s| match s {
        Stage::Linear(_) => 'L',
        Stage::LeakyRelu { .. } => 'A',
        Stage::Dropout { .. } => 'D',
      })
      .collect();
    assert_eq!(kinds, vec!['L', 'A', 'L', 'A', 'L']);

    let dropped = Network::build(arch(2, 4, 2, 0.5, 0.2), &mut rng).unwrap();
    let drops = dropped
      .stages
      .iter()
      .filter(|s| matches!(s, Stage::Dropout { .. }))
      .count();
    assert_eq!(drops, 2);
  }

  #[test]
  fn zero_hidden_layers_is_a_single_hidden_stage() {
    let net = Network::build(arch(3, 5, 0, 0.5, 0.0), &mut StdRng::seed_from_u64(2)).unwrap();
    assert_eq!(linear_shapes(&net), vec![(3, 5), (5, 1)]);
  }

  #[test]
  fn invalid_hyperparameters_are_rejected() {
    let mut rng = StdRng::seed_from_u64(0);
    assert!(Network::build(arch(0, 4, 1, 0.5, 0.0), &mut rng).is_err());
    assert!(Network::build(arch(2, 4, 1, 0.0, 0.0), &mut rng).is_err());
    assert!(Network::build(arch(2, 4, 1, 0.5, 1.0), &mut rng).is_err());
  }

  #[test]
  fn predict_outputs_one_column_and_checks_arity() {
    let net = Network::build(arch(3, 8, 2, 0.5, 0.1), &mut StdRng::seed_from_u64(4)).unwrap();
    let x = Array2::from_shape_fn((5, 3), |(i, j)| (i + j) as f64 * 0.1);
    assert_eq!(net.predict(&x).unwrap().dim(), (5, 1));
    assert!(matches!(
      net.predict(&array![[1.0, 2.0]]),
      Err(Error::ArityMismatch { expected: 3, got: 2 })
    ));
  }

  #[test]
  fn train_pass_matches_predict_without_dropout() {
    let net = Network::build(arch(3, 8, 2, 0.5, 0.0), &mut StdRng::seed_from_u64(4)).unwrap();
    let x = Array2::from_shape_fn((4, 3), |(i, j)| (i as f64) - (j as f64));
    let (out, _) = net.forward_train(&x, &mut StdRng::seed_from_u64(9)).unwrap();
    assert_eq!(out, net.predict(&x).unwrap());
  }

  #[test]
  fn backward_matches_finite_differences() {
    let mut rng = StdRng::seed_from_u64(12);
    let mut net = Network::build(arch(3, 4, 1, 0.5, 0.0), &mut rng).unwrap();
    let x = Array2::from_shape_fn((6, 3), |(i, j)| ((i * 3 + j) as f64 * 0.37).sin());
    // loss = sum(output), so dLoss/dOutput is all ones
    let (out, cache) = net.forward_train(&x, &mut rng).unwrap();
    let grads = net.backward(&cache, &Array2::ones(out.dim()));

    let h = 1e-6;
    let analytic = grads[0].weight[[1, 2]];
    let first = |net: &mut Network| match &mut net.stages[0] {
      Stage::Linear(l) => l.weight[[1, 2]] += h,
      _ => unreachable!(),
    };
    let base = net.predict(&x).unwrap().sum();
    first(&mut net);
    let bumped = net.predict(&x).unwrap().sum();
    let numeric = (bumped - base) / h;
    assert!((numeric - analytic).abs() < 1e-4, "{numeric} vs {analytic}");
    assert_eq!(grads.len(), 3);
    assert_eq!(grads[2].bias[0], 6.0);
  }

  #[test]
  fn serde_keeps_weights() {
    let net = Network::build(arch(2, 4, 1, 0.5, 0.0), &mut StdRng::seed_from_u64(8)).unwrap();
    let json = serde_json::to_string(&net).unwrap();
    let back: Network = serde_json::from_str(&json).unwrap();
    assert_eq!(back.architecture, net.architecture);
    let x = array![[0.3, -1.2], [2.0, 0.5]];
    let diff = &net.predict(&x).unwrap() - &back.predict(&x).unwrap();
    assert!(diff.iter().all(|d| d.abs() < 1e-12));
  }
}
