use std::path::PathBuf;

use thiserror::Error;

/// Every failure the calibration pipeline can surface. There are no retries anywhere:
/// the first error aborts the run.
#[derive(Debug, Error)]
pub enum Error {
  #[error("i/o error on {path:?}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("malformed event table: {0}")]
  Csv(#[from] csv::Error),
  #[error("json (de)serialization failed: {0}")]
  Json(#[from] serde_json::Error),
  #[error("yaml (de)serialization failed: {0}")]
  Yaml(#[from] serde_yaml::Error),
  #[error("field `{name}` is missing from the event table header")]
  MissingField { name: String },
  #[error("record {record}: field `{field}` holds `{value}`, which is not a number")]
  Parse {
    record: usize,
    field: String,
    value: String,
  },
  #[error("the event source yielded zero records")]
  EmptyDataset,
  #[error("splitting {total} samples at test fraction {test_fraction} leaves an empty subset")]
  EmptySplit { total: usize, test_fraction: f64 },
  #[error("need at least {needed} samples, got {got}")]
  TooFewSamples { needed: usize, got: usize },
  #[error("expected {expected} feature columns, got {got}")]
  ArityMismatch { expected: usize, got: usize },
  #[error("{rows} feature rows but {targets} targets")]
  LengthMismatch { rows: usize, targets: usize },
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),
  #[error("training diverged at epoch {epoch}: loss is {loss}")]
  Diverged { epoch: usize, loss: f64 },
  #[error("plotting failed: {0}")]
  Plot(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
  pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Error::Io {
      path: path.into(),
      source,
    }
  }
}
