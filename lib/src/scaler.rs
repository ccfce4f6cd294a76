use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Keeps standardized columns finite when a channel never fires.
pub const EPSILON: f64 = 1e-8;

/// Where evaluation-set scaling statistics come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scaling {
  /// Fit on the training set, reuse for the evaluation set.
  #[default]
  Shared,
  /// Each subset is standardized with its own statistics.
  PerSubset,
}

/// Per-column mean and (unbiased) standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
  pub mean: Array1<f64>,
  pub std: Array1<f64>,
}

impl Scaler {
  pub fn fit(table: &Array2<f64>) -> Result<Self> {
    let n = table.nrows();
    if n < 2 {
      return Err(Error::TooFewSamples { needed: 2, got: n });
    }
    let mean = table
      .mean_axis(Axis(0))
      .ok_or(Error::TooFewSamples { needed: 2, got: n })?;
    let std = table.std_axis(Axis(0), 1.0);
    Ok(Self { mean, std })
  }

  pub fn arity(&self) -> usize {
    self.mean.len()
  }

  pub fn transform(&self, table: &Array2<f64>) -> Result<Array2<f64>> {
    if table.ncols() != self.arity() {
      return Err(Error::ArityMismatch {
        expected: self.arity(),
        got: table.ncols(),
      });
    }
    let denom = &self.std + EPSILON;
    Ok((table - &self.mean) / &denom)
  }
}

/// Fits and applies in one go. Nothing is retained between calls.
pub fn standardize(table: &Array2<f64>) -> Result<Array2<f64>> {
  Scaler::fit(table)?.transform(table)
}
