//! Immutable run configuration. Defaults reproduce the hyperparameters the
//! calibration was tuned with.

use serde::{Deserialize, Serialize};

use crate::{
  dataset::DatasetSchema,
  evaluate::BucketGrid,
  model::Architecture,
  scaler::Scaling,
  Error, Result,
};

/// Learning-rate decay on a loss plateau.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Epochs without significant progress before the rate is decayed.
  pub patience: usize,
  /// Epochs to wait after a decay before counting bad epochs again.
  pub cooldown: usize,
  /// Multiplier applied to the rate on every decay.
  pub factor: f64,
  /// Relative loss reduction that counts as progress.
  pub threshold: f64,
  pub min_lr: f64,
  /// Decays smaller than this are skipped.
  pub eps: f64,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      patience: 100,
      cooldown: 100,
      factor: 0.5,
      threshold: 1e-4,
      min_lr: 0.0,
      eps: 1e-11,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
  pub epochs: usize,
  pub hidden_layers: usize,
  pub first_width: usize,
  /// Fraction each hidden layer keeps of the previous width (rounded up).
  pub decay: f64,
  pub init_lr: f64,
  pub scheduler: SchedulerConfig,
  /// Negative slope of the leaky ReLU.
  pub leak_rate: f64,
  /// Zero disables the dropout stages entirely.
  pub dropout: f64,
  pub huber_delta: f64,
  pub log_every: usize,
}

impl Default for TrainConfig {
  fn default() -> Self {
    Self {
      epochs: 10_000,
      hidden_layers: 3,
      first_width: 256,
      decay: 0.5,
      init_lr: 0.02,
      scheduler: SchedulerConfig::default(),
      leak_rate: 0.01,
      dropout: 0.0,
      huber_delta: 1.0,
      log_every: 100,
    }
  }
}

impl TrainConfig {
  pub fn architecture(&self, input_width: usize) -> Architecture {
    Architecture {
      input_width,
      first_width: self.first_width,
      hidden_layers: self.hidden_layers,
      decay: self.decay,
      leak_rate: self.leak_rate,
      dropout: self.dropout,
    }
  }

  pub fn validate(&self) -> Result<()> {
    if !(self.init_lr > 0.0) {
      return Err(Error::InvalidConfig(format!(
        "initial learning rate must be positive, got {}",
        self.init_lr
      )));
    }
    if !(self.huber_delta > 0.0) {
      return Err(Error::InvalidConfig(format!(
        "huber delta must be positive, got {}",
        self.huber_delta
      )));
    }
    let s = &self.scheduler;
    if !(s.factor > 0.0 && s.factor < 1.0) {
      return Err(Error::InvalidConfig(format!(
        "scheduler factor must lie in (0, 1), got {}",
        s.factor
      )));
    }
    if s.threshold < 0.0 || s.min_lr < 0.0 {
      return Err(Error::InvalidConfig(
        "scheduler threshold and min_lr must be non-negative".to_string(),
      ));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
  pub loss_plot: String,
  pub histogram_plot: String,
  pub summary: String,
  pub model: String,
  /// Bins per bucket histogram.
  pub bins: usize,
  /// Displayed energy range of the histogram plot, in GeV.
  pub display_range: (f64, f64),
}

impl Default for ReportConfig {
  fn default() -> Self {
    Self {
      loss_plot: "Loss_Plot.png".to_string(),
      histogram_plot: "NN_Hist.png".to_string(),
      summary: "NN_Summary.json".to_string(),
      model: "NN_Model.json".to_string(),
      bins: 100,
      display_range: (0.0, 20.0),
    }
  }
}

/// Everything one calibration run needs, fixed before the run starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
  pub schema: DatasetSchema,
  pub delimiter: u8,
  pub test_fraction: f64,
  /// Without a seed the split, init and dropout draw from entropy and runs are not reproducible.
  pub seed: Option<u64>,
  pub scaling: Scaling,
  pub train: TrainConfig,
  pub grid: BucketGrid,
  pub report: ReportConfig,
}

impl Default for RunConfig {
  fn default() -> Self {
    Self {
      schema: DatasetSchema::default(),
      delimiter: b',',
      test_fraction: 0.4,
      seed: None,
      scaling: Scaling::Shared,
      train: TrainConfig::default(),
      grid: BucketGrid::default(),
      report: ReportConfig::default(),
    }
  }
}

impl RunConfig {
  pub fn validate(&self) -> Result<()> {
    if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
      return Err(Error::InvalidConfig(format!(
        "test fraction must lie in (0, 1), got {}",
        self.test_fraction
      )));
    }
    if self.report.bins == 0 {
      return Err(Error::InvalidConfig("histogram needs at least one bin".to_string()));
    }
    let (lo, hi) = self.report.display_range;
    if !(lo < hi) {
      return Err(Error::InvalidConfig(format!(
        "display range {lo}..{hi} is empty"
      )));
    }
    self.train.validate()?;
    self.grid.validate()?;
    self.train.architecture(self.schema.features.len()).validate()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_are_valid() {
    RunConfig::default().validate().unwrap();
  }

  #[test]
  fn rejects_degenerate_split() {
    let cfg = RunConfig {
      test_fraction: 1.0,
      ..RunConfig::default()
    };
    assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
  }

  #[test]
  fn rejects_scheduler_factor_outside_unit_interval() {
    let mut cfg = TrainConfig::default();
    cfg.scheduler.factor = 1.5;
    assert!(cfg.validate().is_err());
  }

  #[test]
  fn partial_yaml_keeps_defaults() {
    let cfg: TrainConfig = serde_yaml::from_str("epochs: 5\nscheduler:\n  patience: 3\n").unwrap();
    assert_eq!(cfg.epochs, 5);
    assert_eq!(cfg.scheduler.patience, 3);
    assert_eq!(cfg.scheduler.cooldown, 100);
    assert_eq!(cfg.first_width, 256);
  }
}
