use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{model::Network, training::HuberLoss, Error, Result};

/// Candidate bucket centers `0, step, 2 step, ...` below `upper`; a truth value
/// belongs to a center when it lies strictly within `half_width` of it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketGrid {
  pub step: f64,
  pub half_width: f64,
  pub upper: f64,
}

impl Default for BucketGrid {
  fn default() -> Self {
    Self {
      step: 0.5,
      half_width: 0.25,
      upper: 30.0,
    }
  }
}

impl BucketGrid {
  pub fn validate(&self) -> Result<()> {
    if !(self.step > 0.0 && self.half_width > 0.0 && self.upper > 0.0) {
      return Err(Error::InvalidConfig(format!("degenerate bucket grid {self:?}")));
    }
    Ok(())
  }

  pub fn len(&self) -> usize {
    (self.upper / self.step).ceil() as usize
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn center(&self, index: usize) -> f64 {
    index as f64 * self.step
  }

  /// Grid indices whose window contains `truth`. With windows no wider than the
  /// step this is at most one index.
  pub fn matching(&self, truth: f64) -> impl Iterator<Item = usize> + '_ {
    let lo = ((truth - self.half_width) / self.step).floor().max(0.0) as usize;
    let hi = (((truth + self.half_width) / self.step).ceil().max(0.0) as usize).min(self.len().saturating_sub(1));
    (lo..=hi).filter(move |&k| {
      let c = self.center(k);
      truth > c - self.half_width && truth < c + self.half_width
    })
  }
}

/// Predictions grouped by the true-energy bucket of their sample, ordered by center.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketMap {
  grid: BucketGrid,
  buckets: BTreeMap<usize, Vec<f64>>,
}

impl BucketMap {
  pub fn build(truths: &[f64], predictions: &[f64], grid: BucketGrid) -> Result<Self> {
    if truths.len() != predictions.len() {
      return Err(Error::LengthMismatch {
        rows: predictions.len(),
        targets: truths.len(),
      });
    }
    let mut buckets: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for (&truth, &pred) in truths.iter().zip(predictions) {
      if truth.is_nan() {
        continue;
      }
      for k in grid.matching(truth) {
        buckets.entry(k).or_default().push(pred);
      }
    }
    Ok(Self { grid, buckets })
  }

  pub fn len(&self) -> usize {
    self.buckets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buckets.is_empty()
  }

  pub fn centers(&self) -> Vec<f64> {
    self.buckets.keys().map(|&k| self.grid.center(k)).collect()
  }

  /// `(center, predictions)` in ascending center order.
  pub fn iter(&self) -> impl Iterator<Item = (f64, &[f64])> + '_ {
    self
      .buckets
      .iter()
      .map(|(&k, v)| (self.grid.center(k), v.as_slice()))
  }

  pub fn get(&self, center: f64) -> Option<&[f64]> {
    let k = (center / self.grid.step).round();
    if k < 0.0 || (self.grid.center(k as usize) - center).abs() > 1e-9 {
      return None;
    }
    self.buckets.get(&(k as usize)).map(|v| v.as_slice())
  }

  pub fn summaries(&self) -> Vec<BucketSummary> {
    self
      .iter()
      .map(|(center, preds)| BucketSummary::new(center, preds))
      .collect()
  }
}

/// Resolution and linearity of the calibrated energy in one bucket.
///
/// Both come from the sample moments of the bucket's predictions. They are not
/// the sigma and mu of a Gaussian fit over a restricted range, so tails pull
/// `resolution` above a fitted value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSummary {
  pub center: f64,
  pub count: usize,
  pub mean: f64,
  pub std_dev: f64,
  /// `std_dev / mean`
  pub resolution: f64,
  /// `mean / center`; none for the zero bucket.
  pub linearity: Option<f64>,
}

impl BucketSummary {
  fn new(center: f64, preds: &[f64]) -> Self {
    let n = preds.len() as f64;
    let mean = preds.iter().sum::<f64>() / n;
    let var = if preds.len() > 1 {
      preds.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
      0.0
    };
    let std_dev = var.sqrt();
    Self {
      center,
      count: preds.len(),
      mean,
      std_dev,
      resolution: std_dev / mean,
      linearity: (center != 0.0).then(|| mean / center),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
  pub predictions: Vec<f64>,
  pub loss: f64,
  pub buckets: BucketMap,
}

/// Runs the trained network once over the evaluation set and buckets the predictions.
#[instrument(skip_all, fields(samples = x.nrows()))]
pub fn evaluate(network: &Network, x: &Array2<f64>, y: &Array2<f64>, loss: &HuberLoss, grid: BucketGrid) -> Result<Evaluation> {
  if y.ncols() != 1 {
    return Err(Error::ArityMismatch {
      expected: 1,
      got: y.ncols(),
    });
  }
  if y.nrows() != x.nrows() {
    return Err(Error::LengthMismatch {
      rows: x.nrows(),
      targets: y.nrows(),
    });
  }
  let pred = network.predict(x)?;
  let loss = loss.value(&pred, y);
  let predictions: Vec<f64> = pred.iter().copied().collect();
  let truths: Vec<f64> = y.iter().copied().collect();
  let buckets = BucketMap::build(&truths, &predictions, grid)?;
  info!(loss, buckets = buckets.len(), "evaluated");
  Ok(Evaluation {
    predictions,
    loss,
    buckets,
  })
}
