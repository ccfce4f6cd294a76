use tracing::info;

use crate::config::SchedulerConfig;

/// Min-mode plateau detector with a relative threshold.
///
/// A metric improves on the best seen so far when `metric < best * (1 - threshold)`.
/// Once more than `patience` consecutive epochs fail to improve, the rate is
/// multiplied by `factor` (never below `min_lr`) and bad epochs are ignored for
/// `cooldown` epochs.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
  config: SchedulerConfig,
  lr: f64,
  best: f64,
  bad_epochs: usize,
  cooldown_left: usize,
  last_epoch: usize,
  reductions: usize,
}

impl ReduceLrOnPlateau {
  pub fn new(config: SchedulerConfig, initial_lr: f64) -> Self {
    Self {
      config,
      lr: initial_lr,
      best: f64::INFINITY,
      bad_epochs: 0,
      cooldown_left: 0,
      last_epoch: 0,
      reductions: 0,
    }
  }

  pub fn lr(&self) -> f64 {
    self.lr
  }

  pub fn best(&self) -> f64 {
    self.best
  }

  pub fn reductions(&self) -> usize {
    self.reductions
  }

  fn is_better(&self, metric: f64) -> bool {
    metric < self.best * (1.0 - self.config.threshold)
  }

  /// Feeds one epoch's metric and returns the rate to use from now on.
  pub fn step(&mut self, metric: f64) -> f64 {
    self.last_epoch += 1;
    if self.is_better(metric) {
      self.best = metric;
      self.bad_epochs = 0;
    } else {
      self.bad_epochs += 1;
    }

    if self.cooldown_left > 0 {
      self.cooldown_left -= 1;
      self.bad_epochs = 0;
    }

    if self.bad_epochs > self.config.patience {
      let new_lr = (self.lr * self.config.factor).max(self.config.min_lr);
      if self.lr - new_lr > self.config.eps {
        info!(epoch = self.last_epoch, from = self.lr, to = new_lr, "reducing learning rate");
        self.lr = new_lr;
        self.reductions += 1;
      }
      self.cooldown_left = self.config.cooldown;
      self.bad_epochs = 0;
    }
    self.lr
  }
}
