//! Plots and JSON artifacts written at the end of a run.

use std::path::Path;

use itertools::{Itertools, MinMaxResult};
use plotters::prelude::*;
use serde::Serialize;
use tracing::{info, instrument};

use crate::{evaluate::BucketMap, training::TrainingTrace, utils::serialize_to_file, Error, Result};

type PlotResult = std::result::Result<(), Box<dyn std::error::Error>>;

const PLOT_SIZE: (u32, u32) = (1200, 800);

/// Equal-width bins over `[lo, hi]`; the last bin includes `hi`.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
  pub lo: f64,
  pub hi: f64,
  pub counts: Vec<usize>,
}

impl Histogram {
  pub fn bin_width(&self) -> f64 {
    (self.hi - self.lo) / self.counts.len() as f64
  }

  /// `(left edge, right edge, count)` per bin.
  pub fn bins(&self) -> impl Iterator<Item = (f64, f64, usize)> + '_ {
    let w = self.bin_width();
    self
      .counts
      .iter()
      .enumerate()
      .map(move |(i, &c)| (self.lo + i as f64 * w, self.lo + (i + 1) as f64 * w, c))
  }

  pub fn max_count(&self) -> usize {
    self.counts.iter().copied().max().unwrap_or(0)
  }
}

/// Bins `values` over their own min..max. A single distinct value gets a unit-wide
/// range around it. Non-finite values are ignored; `None` if nothing is left.
pub fn histogram(values: &[f64], bins: usize) -> Option<Histogram> {
  let bins = bins.max(1);
  let (lo, hi) = match values.iter().copied().filter(|v| v.is_finite()).minmax_by(|a, b| a.total_cmp(b)) {
    MinMaxResult::NoElements => return None,
    MinMaxResult::OneElement(v) => (v - 0.5, v + 0.5),
    MinMaxResult::MinMax(lo, hi) if lo == hi => (lo - 0.5, hi + 0.5),
    MinMaxResult::MinMax(lo, hi) => (lo, hi),
  };
  let width = (hi - lo) / bins as f64;
  let mut counts = vec![0usize; bins];
  for v in values.iter().filter(|v| v.is_finite()) {
    let idx = (((v - lo) / width).floor() as usize).min(bins - 1);
    counts[idx] += 1;
  }
  Some(Histogram { lo, hi, counts })
}

/// Step outline of `hist` restricted to `range`, as a closed polyline on the x axis.
fn step_outline(hist: &Histogram, range: (f64, f64)) -> Vec<(f64, f64)> {
  let visible: Vec<_> = hist
    .bins()
    .filter(|(l, r, _)| *r > range.0 && *l < range.1)
    .map(|(l, r, c)| (l.max(range.0), r.min(range.1), c as f64))
    .collect();
  let (first, last) = match (visible.first(), visible.last()) {
    (Some(f), Some(l)) => (f.0, l.1),
    _ => return Vec::new(),
  };
  let mut points = Vec::with_capacity(visible.len() * 2 + 2);
  points.push((first, 0.0));
  for (l, r, c) in visible {
    points.push((l, c));
    points.push((r, c));
  }
  points.push((last, 0.0));
  points
}

fn plot_error(e: Box<dyn std::error::Error>) -> Error {
  Error::Plot(e.to_string())
}

/// Loss against epoch on a logarithmic loss axis.
#[instrument(skip(trace))]
pub fn plot_loss(trace: &TrainingTrace, path: &Path) -> Result<()> {
  draw_loss(trace, path).map_err(plot_error)?;
  info!("wrote loss plot");
  Ok(())
}

fn draw_loss(trace: &TrainingTrace, path: &Path) -> PlotResult {
  let points: Vec<(f64, f64)> = trace
    .points()
    .iter()
    .filter(|p| p.loss > 0.0)
    .map(|p| (p.epoch as f64, p.loss))
    .collect();
  let (y_min, y_max) = match points.iter().map(|p| p.1).minmax_by(|a, b| a.total_cmp(b)) {
    MinMaxResult::NoElements => (1e-3, 1.0),
    MinMaxResult::OneElement(v) => (v / 2.0, v * 2.0),
    MinMaxResult::MinMax(lo, hi) => (lo / 1.5, hi * 1.5),
  };
  let x_max = trace.len().max(1) as f64;

  let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
  root.fill(&WHITE)?;
  let mut chart = ChartBuilder::on(&root)
    .margin(12)
    .x_label_area_size(46)
    .y_label_area_size(80)
    .build_cartesian_2d(0.0..x_max, (y_min..y_max).log_scale())?;
  chart.configure_mesh().x_desc("Epochs").y_desc("Loss").draw()?;
  chart.draw_series(LineSeries::new(points, RED.stroke_width(2)))?;
  root.present()?;
  Ok(())
}

/// One step histogram per bucket, overlaid, labelled by bucket center.
#[instrument(skip(buckets))]
pub fn plot_buckets(buckets: &BucketMap, range: (f64, f64), bins: usize, path: &Path) -> Result<()> {
  draw_buckets(buckets, range, bins, path).map_err(plot_error)?;
  info!(buckets = buckets.len(), "wrote bucket histograms");
  Ok(())
}

fn draw_buckets(buckets: &BucketMap, range: (f64, f64), bins: usize, path: &Path) -> PlotResult {
  let outlines: Vec<(f64, Vec<(f64, f64)>)> = buckets
    .iter()
    .filter_map(|(center, preds)| histogram(preds, bins).map(|h| (center, step_outline(&h, range))))
    .collect();
  let y_max = outlines
    .iter()
    .flat_map(|(_, pts)| pts.iter().map(|p| p.1))
    .fold(1.0, f64::max)
    * 1.1;

  let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
  root.fill(&WHITE)?;
  let mut chart = ChartBuilder::on(&root)
    .margin(12)
    .x_label_area_size(46)
    .y_label_area_size(60)
    .build_cartesian_2d(range.0..range.1, 0.0..y_max)?;
  chart.configure_mesh().x_desc("Energy (GeV)").draw()?;

  for (i, (center, outline)) in outlines.into_iter().enumerate() {
    let color = Palette99::pick(i).to_rgba();
    chart
      .draw_series(LineSeries::new(outline, color.stroke_width(2)))?
      .label(format!("{center:.1} GeV"))
      .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
  }
  if !buckets.is_empty() {
    chart
      .configure_series_labels()
      .background_style(WHITE.mix(0.8))
      .border_style(BLACK)
      .draw()?;
  }
  root.present()?;
  Ok(())
}

pub fn write_summary<T: Serialize>(path: &Path, summary: &T) -> Result<()> {
  serialize_to_file(path, summary)?;
  info!(path = %path.display(), "wrote summary");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::training::TracePoint;

  #[test]
  fn histogram_spans_data_and_counts_every_value() {
    let h = histogram(&[0.0, 1.0, 2.0, 3.0, 4.0], 4).unwrap();
    assert_eq!((h.lo, h.hi), (0.0, 4.0));
    assert_eq!(h.counts, vec![1, 1, 1, 2]);
    assert_eq!(h.counts.iter().sum::<usize>(), 5);
  }

  #[test]
  fn histogram_of_a_constant_gets_unit_range() {
    let h = histogram(&[2.0, 2.0], 10).unwrap();
    assert_eq!((h.lo, h.hi), (1.5, 2.5));
    assert_eq!(h.max_count(), 2);
  }

  #[test]
  fn histogram_of_nothing_is_none() {
    assert!(histogram(&[], 10).is_none());
    assert!(histogram(&[f64::NAN], 10).is_none());
  }

  #[test]
  fn outline_is_clipped_to_display_range() {
    let h = histogram(&[-2.0, 1.0, 3.0, 6.0], 4).unwrap();
    let pts = step_outline(&h, (0.0, 4.0));
    assert!(pts.iter().all(|(x, _)| (0.0..=4.0).contains(x)));
    assert_eq!(pts.first(), Some(&(0.0, 0.0)));
    assert_eq!(pts.last(), Some(&(4.0, 0.0)));
  }

  #[test]
  fn outline_outside_range_is_empty() {
    let h = histogram(&[25.0, 26.0], 5).unwrap();
    assert!(step_outline(&h, (0.0, 20.0)).is_empty());
  }

  #[test]
  fn summary_is_written_as_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.json");
    write_summary(&path, &vec![1.0, 2.5]).unwrap();
    let back: Vec<f64> = crate::utils::deserialize_from_file(&path).unwrap();
    assert_eq!(back, vec![1.0, 2.5]);
  }

  #[ignore = "needs system fonts for axis labels"]
  #[test]
  fn plots_are_written() {
    let dir = tempfile::tempdir().unwrap();
    let map = BucketMap::build(&[2.0, 2.1, 5.0], &[1.9, 2.3, 4.7], Default::default()).unwrap();
    let path = dir.path().join("hist.png");
    plot_buckets(&map, (0.0, 20.0), 100, &path).unwrap();
    assert!(path.exists());

    let mut trace = TrainingTrace::default();
    for epoch in 0..50 {
      trace.push(TracePoint {
        epoch,
        loss: 10.0 * 0.9f64.powi(epoch as i32),
        lr: 0.02,
      });
    }
    let path = dir.path().join("loss.png");
    plot_loss(&trace, &path).unwrap();
    assert!(std::fs::metadata(&path).unwrap().len() > 0);
  }
}
