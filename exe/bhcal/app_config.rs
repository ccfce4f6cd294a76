use bhcal_calib::{
  config::{ReportConfig, RunConfig, SchedulerConfig},
  dataset::DatasetSchema,
  evaluate::BucketGrid,
  scaler::Scaling,
  Error,
};
use serde::Deserialize;

/// Overrides layered on top of the built-in defaults.
/// Also defines the config file format (every field can be omitted).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
  pub epochs: Option<usize>,
  pub hidden_layers: Option<usize>,
  pub first_width: Option<usize>,
  pub decay: Option<f64>,
  pub init_lr: Option<f64>,
  pub leak_rate: Option<f64>,
  pub dropout: Option<f64>,
  pub huber_delta: Option<f64>,
  pub log_every: Option<usize>,
  pub scheduler: Option<SchedulerConfig>,
  /// Fixes the split, init and dropout draws; runs without it are not reproducible
  pub seed: Option<u64>,
  pub test_fraction: Option<f64>,
  pub scaling: Option<Scaling>,
  pub delimiter: Option<char>,
  pub schema: Option<DatasetSchema>,
  pub grid: Option<BucketGrid>,
  pub report: Option<ReportConfig>,
}

impl AppConfig {
  // merge configs where the second overwrites the first
  pub fn merge(self, other: Self) -> Self {
    Self {
      epochs: other.epochs.or(self.epochs),
      hidden_layers: other.hidden_layers.or(self.hidden_layers),
      first_width: other.first_width.or(self.first_width),
      decay: other.decay.or(self.decay),
      init_lr: other.init_lr.or(self.init_lr),
      leak_rate: other.leak_rate.or(self.leak_rate),
      dropout: other.dropout.or(self.dropout),
      huber_delta: other.huber_delta.or(self.huber_delta),
      log_every: other.log_every.or(self.log_every),
      scheduler: other.scheduler.or(self.scheduler),
      seed: other.seed.or(self.seed),
      test_fraction: other.test_fraction.or(self.test_fraction),
      scaling: other.scaling.or(self.scaling),
      delimiter: other.delimiter.or(self.delimiter),
      schema: other.schema.or(self.schema),
      grid: other.grid.or(self.grid),
      report: other.report.or(self.report),
    }
  }

  pub fn into_run_config(self) -> Result<RunConfig, Error> {
    let mut cfg = RunConfig::default();
    let t = &mut cfg.train;
    t.epochs = self.epochs.unwrap_or(t.epochs);
    t.hidden_layers = self.hidden_layers.unwrap_or(t.hidden_layers);
    t.first_width = self.first_width.unwrap_or(t.first_width);
    t.decay = self.decay.unwrap_or(t.decay);
    t.init_lr = self.init_lr.unwrap_or(t.init_lr);
    t.leak_rate = self.leak_rate.unwrap_or(t.leak_rate);
    t.dropout = self.dropout.unwrap_or(t.dropout);
    t.huber_delta = self.huber_delta.unwrap_or(t.huber_delta);
    t.log_every = self.log_every.unwrap_or(t.log_every);
    t.scheduler = self.scheduler.unwrap_or(t.scheduler);

    cfg.seed = self.seed;
    cfg.test_fraction = self.test_fraction.unwrap_or(cfg.test_fraction);
    cfg.scaling = self.scaling.unwrap_or(cfg.scaling);
    if let Some(d) = self.delimiter {
      cfg.delimiter = delimiter_byte(d)?;
    }
    cfg.schema = self.schema.unwrap_or(cfg.schema);
    cfg.grid = self.grid.unwrap_or(cfg.grid);
    cfg.report = self.report.unwrap_or(cfg.report);
    cfg.validate()?;
    Ok(cfg)
  }
}

pub fn delimiter_byte(d: char) -> Result<u8, Error> {
  if d.is_ascii() {
    Ok(d as u8)
  } else {
    Err(Error::InvalidConfig(format!("delimiter {d:?} is not a single ascii character")))
  }
}
