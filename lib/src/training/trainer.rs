use std::time::Instant;

use ndarray::Array2;
use rand::Rng;
use serde::Serialize;
use tracing::{info, instrument, trace};

use super::{Adam, HuberLoss, ReduceLrOnPlateau};
use crate::{config::TrainConfig, model::Network, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TracePoint {
  pub epoch: usize,
  pub loss: f64,
  /// Rate in effect while this epoch's step was taken.
  pub lr: f64,
}

/// One point per epoch, append-only, in epoch order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrainingTrace {
  points: Vec<TracePoint>,
}

impl TrainingTrace {
  pub fn with_capacity(epochs: usize) -> Self {
    Self {
      points: Vec::with_capacity(epochs),
    }
  }

  pub(crate) fn push(&mut self, point: TracePoint) {
    debug_assert_eq!(point.epoch, self.points.len());
    self.points.push(point);
  }

  pub fn points(&self) -> &[TracePoint] {
    &self.points
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  pub fn first_loss(&self) -> Option<f64> {
    self.points.first().map(|p| p.loss)
  }

  pub fn last_loss(&self) -> Option<f64> {
    self.points.last().map(|p| p.loss)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingOutcome {
  pub trace: TrainingTrace,
  /// Lowest loss seen; reported only. The weights evaluated afterwards are
  /// always those of the final epoch, not the ones that reached this loss.
  pub best_loss: f64,
  pub best_epoch: usize,
  pub final_lr: f64,
  pub lr_reductions: usize,
}

pub struct Trainer {
  config: TrainConfig,
  loss: HuberLoss,
}

impl Trainer {
  pub fn new(config: TrainConfig) -> Result<Self> {
    config.validate()?;
    Ok(Self {
      loss: HuberLoss::new(config.huber_delta),
      config,
    })
  }

  pub fn loss(&self) -> HuberLoss {
    self.loss
  }

  /// Full-batch training for exactly `config.epochs` epochs. No early stopping.
  #[instrument(skip_all, fields(epochs = self.config.epochs, samples = x.nrows()))]
  pub fn train<R: Rng>(&self, network: &mut Network, x: &Array2<f64>, y: &Array2<f64>, rng: &mut R) -> Result<TrainingOutcome> {
    if y.ncols() != 1 {
      return Err(Error::ArityMismatch {
        expected: 1,
        got: y.ncols(),
      });
    }
    if x.nrows() != y.nrows() {
      return Err(Error::LengthMismatch {
        rows: x.nrows(),
        targets: y.nrows(),
      });
    }
    let mut optimizer = Adam::new(network, self.config.init_lr);
    let mut scheduler = ReduceLrOnPlateau::new(self.config.scheduler, self.config.init_lr);
    let mut trace = TrainingTrace::with_capacity(self.config.epochs);
    let (mut best_loss, mut best_epoch) = (f64::INFINITY, 0);
    let log_every = self.config.log_every.max(1);
    let start = Instant::now();

    info!(
      parameters = network.num_parameters(),
      lr = self.config.init_lr,
      "starting training"
    );
    for epoch in 0..self.config.epochs {
      let (pred, cache) = network.forward_train(x, rng)?;
      let loss = self.loss.value(&pred, y);
      if !loss.is_finite() {
        return Err(Error::Diverged { epoch, loss });
      }
      let grads = network.backward(&cache, &self.loss.gradient(&pred, y));
      optimizer.step(network, &grads);

      trace.push(TracePoint {
        epoch,
        loss,
        lr: optimizer.lr,
      });
      if loss < best_loss {
        best_loss = loss;
        best_epoch = epoch;
      }
      optimizer.lr = scheduler.step(loss);

      if epoch % log_every == 0 {
        info!(epoch, loss, lr = optimizer.lr, "training");
      } else {
        trace!(epoch, loss, "training");
      }
    }

    let elapsed = start.elapsed();
    if self.config.epochs > 0 {
      info!(
        "Finished {} epochs in {:.2}s, {:.2}µs / epoch, best loss {:.8} at epoch {}",
        self.config.epochs,
        elapsed.as_secs_f32(),
        elapsed.as_micros() as f64 / self.config.epochs as f64,
        best_loss,
        best_epoch
      );
    }

    Ok(TrainingOutcome {
      trace,
      best_loss,
      best_epoch,
      final_lr: optimizer.lr,
      lr_reductions: scheduler.reductions(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    model::{Architecture, Linear, Stage},
    scaler::standardize,
    utils::init_logging_tests,
  };
  use ndarray::{array, Array1};
  use rand::{rngs::StdRng, SeedableRng};

  fn linear_problem(n: usize, rng: &mut StdRng) -> (Array2<f64>, Array2<f64>) {
    let raw = Array2::from_shape_fn((n, 3), |_| rng.gen_range(0.0..10.0));
    let coeffs = Array1::from(vec![0.2, 0.6, -0.1]);
    let y = raw.dot(&coeffs).insert_axis(ndarray::Axis(1));
    (standardize(&raw).unwrap(), y)
  }

  fn small_config(epochs: usize) -> TrainConfig {
    TrainConfig {
      epochs,
      hidden_layers: 2,
      first_width: 16,
      init_lr: 0.02,
      log_every: 50,
      ..TrainConfig::default()
    }
  }

  fn arch(cfg: &TrainConfig) -> Architecture {
    cfg.architecture(3)
  }

  #[test]
  fn trace_has_one_point_per_epoch_in_order() {
    let _guard = init_logging_tests();
    let mut rng = StdRng::seed_from_u64(21);
    let (x, y) = linear_problem(40, &mut rng);
    let cfg = small_config(37);
    let mut net = Network::build(arch(&cfg), &mut rng).unwrap();
    let outcome = Trainer::new(cfg).unwrap().train(&mut net, &x, &y, &mut rng).unwrap();
    assert_eq!(outcome.trace.len(), 37);
    for (i, p) in outcome.trace.points().iter().enumerate() {
      assert_eq!(p.epoch, i);
    }
  }

  #[test]
  fn zero_epochs_leave_network_untouched() {
    let mut rng = StdRng::seed_from_u64(2);
    let (x, y) = linear_problem(10, &mut rng);
    let cfg = small_config(0);
    let mut net = Network::build(arch(&cfg), &mut rng).unwrap();
    let before = net.clone();
    let outcome = Trainer::new(cfg).unwrap().train(&mut net, &x, &y, &mut rng).unwrap();
    assert!(outcome.trace.is_empty());
    assert_eq!(net, before);
  }

  #[test]
  fn training_reduces_loss_on_linear_data() {
    let _guard = init_logging_tests();
    let mut rng = StdRng::seed_from_u64(5);
    let (x, y) = linear_problem(200, &mut rng);
    let cfg = small_config(500);
    let mut net = Network::build(arch(&cfg), &mut rng).unwrap();
    let outcome = Trainer::new(cfg).unwrap().train(&mut net, &x, &y, &mut rng).unwrap();
    let first = outcome.trace.first_loss().unwrap();
    let last = outcome.trace.last_loss().unwrap();
    assert!(last < 0.1 * first, "loss went from {first} to {last}");
    assert!(outcome.best_loss <= last);
  }

  /// `y = w x + b` with a single sample at `x = 1`, target 0.
  fn scalar_net(w: f64) -> Network {
    Network {
      architecture: Architecture {
        input_width: 1,
        first_width: 1,
        hidden_layers: 0,
        decay: 1.0,
        leak_rate: 0.0,
        dropout: 0.0,
      },
      stages: vec![Stage::Linear(Linear {
        weight: array![[w]],
        bias: array![0.0],
      })],
    }
  }

  #[test]
  fn best_loss_is_reported_not_restored() {
    // Adam's first step moves both parameters by ~lr, overshooting the target:
    // epoch 0 predicts 0.5 (loss 0.125), epoch 1 predicts -1.5 (loss 1.0).
    let cfg = TrainConfig {
      epochs: 2,
      init_lr: 1.0,
      ..TrainConfig::default()
    };
    let mut net = scalar_net(0.5);
    let at_best = net.clone();
    let (x, y) = (array![[1.0]], array![[0.0]]);
    let trainer = Trainer::new(cfg).unwrap();
    let outcome = trainer.train(&mut net, &x, &y, &mut StdRng::seed_from_u64(0)).unwrap();

    assert_eq!(outcome.best_epoch, 0);
    assert!((outcome.best_loss - 0.125).abs() < 1e-12);
    let last = outcome.trace.last_loss().unwrap();
    assert!((last - 1.0).abs() < 1e-6, "last loss {last}");
    assert!(last > outcome.best_loss);

    // the network keeps the weights of the final step
    assert_ne!(net, at_best);
    let w = net.linear_stages().next().unwrap().weight[[0, 0]];
    assert!(w < -0.5, "weight {w}");
    let final_loss = trainer.loss().value(&net.predict(&x).unwrap(), &y);
    assert!(final_loss > outcome.best_loss);
  }

  #[test]
  fn non_finite_loss_stops_training() {
    let mut net = scalar_net(0.5);
    let (x, y) = (array![[1.0]], array![[f64::INFINITY]]);
    let trainer = Trainer::new(small_config(10)).unwrap();
    let before = net.clone();
    assert!(matches!(
      trainer.train(&mut net, &x, &y, &mut StdRng::seed_from_u64(0)),
      Err(Error::Diverged { epoch: 0, .. })
    ));
    assert_eq!(net, before);
  }

  #[test]
  fn mismatched_targets_are_rejected() {
    let mut rng = StdRng::seed_from_u64(1);
    let (x, _) = linear_problem(10, &mut rng);
    let cfg = small_config(3);
    let mut net = Network::build(arch(&cfg), &mut rng).unwrap();
    let trainer = Trainer::new(cfg).unwrap();
    assert!(matches!(
      trainer.train(&mut net, &x, &Array2::zeros((9, 1)), &mut rng),
      Err(Error::LengthMismatch { rows: 10, targets: 9 })
    ));
    assert!(matches!(
      trainer.train(&mut net, &x, &Array2::zeros((10, 2)), &mut rng),
      Err(Error::ArityMismatch { expected: 1, got: 2 })
    ));
  }
}
