use std::path::{Path, PathBuf};

use ndarray::Array2;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::{
  config::RunConfig,
  dataset::{read_dataset, read_features, split_dataset, Dataset, DatasetSchema},
  evaluate::{evaluate, BucketSummary, Evaluation},
  model::Network,
  report,
  scaler::{Scaler, Scaling},
  training::{Trainer, TrainingOutcome},
  utils::{deserialize_from_file, serialize_to_file},
  Error, Result,
};

/// Everything needed to apply a trained calibration to new events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
  pub schema: DatasetSchema,
  pub scaler: Scaler,
  pub network: Network,
}

impl ModelArtifact {
  pub fn predict(&self, features: &Array2<f64>) -> Result<Vec<f64>> {
    let x = self.scaler.transform(features)?;
    Ok(self.network.predict(&x)?.iter().copied().collect())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
  pub train_samples: usize,
  pub eval_samples: usize,
  pub epochs: usize,
  pub final_train_loss: Option<f64>,
  pub best_train_loss: f64,
  pub best_epoch: usize,
  pub eval_loss: f64,
  pub lr_reductions: usize,
  pub buckets: Vec<BucketSummary>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutputPaths {
  pub loss_plot: PathBuf,
  pub histogram_plot: PathBuf,
  pub summary: PathBuf,
  pub model: PathBuf,
}

impl OutputPaths {
  pub fn in_dir(dir: &Path, config: &RunConfig) -> Self {
    let r = &config.report;
    Self {
      loss_plot: dir.join(&r.loss_plot),
      histogram_plot: dir.join(&r.histogram_plot),
      summary: dir.join(&r.summary),
      model: dir.join(&r.model),
    }
  }
}

/// Result of training and evaluating on an in-memory dataset, before anything is written.
#[derive(Debug, Clone)]
pub struct Calibration {
  pub outcome: TrainingOutcome,
  pub evaluation: Evaluation,
  pub model: ModelArtifact,
  pub summary: RunSummary,
}

#[derive(Debug, Clone)]
pub struct CalibrationRun {
  pub calibration: Calibration,
  pub outputs: OutputPaths,
}

pub fn make_rng(seed: Option<u64>) -> StdRng {
  match seed {
    Some(seed) => StdRng::seed_from_u64(seed),
    None => {
      warn!("no seed configured, this run is not reproducible");
      StdRng::from_entropy()
    }
  }
}

/// Split, scale, build, train and evaluate. Pure computation, no files touched.
#[instrument(skip_all, fields(samples = dataset.len()))]
pub fn calibrate(dataset: &Dataset, config: &RunConfig) -> Result<Calibration> {
  config.validate()?;
  if dataset.arity() != config.schema.features.len() {
    return Err(Error::ArityMismatch {
      expected: config.schema.features.len(),
      got: dataset.arity(),
    });
  }
  let mut rng = make_rng(config.seed);
  let (train, test) = split_dataset(dataset, config.test_fraction, &mut rng)?;

  let scaler = Scaler::fit(&train.features)?;
  let x_train = scaler.transform(&train.features)?;
  let x_test = match config.scaling {
    Scaling::Shared => scaler.transform(&test.features)?,
    Scaling::PerSubset => Scaler::fit(&test.features)?.transform(&test.features)?,
  };
  let (y_train, y_test) = (train.target_column(), test.target_column());

  let mut network = Network::build(config.train.architecture(dataset.arity()), &mut rng)?;
  let trainer = Trainer::new(config.train)?;
  let outcome = trainer.train(&mut network, &x_train, &y_train, &mut rng)?;
  let evaluation = evaluate(&network, &x_test, &y_test, &trainer.loss(), config.grid)?;

  let summary = RunSummary {
    train_samples: train.len(),
    eval_samples: test.len(),
    epochs: outcome.trace.len(),
    final_train_loss: outcome.trace.last_loss(),
    best_train_loss: outcome.best_loss,
    best_epoch: outcome.best_epoch,
    eval_loss: evaluation.loss,
    lr_reductions: outcome.lr_reductions,
    buckets: evaluation.buckets.summaries(),
  };
  Ok(Calibration {
    outcome,
    evaluation,
    model: ModelArtifact {
      schema: config.schema.clone(),
      scaler,
      network,
    },
    summary,
  })
}

/// Full run from an event table to plots, summary and saved model in `out_dir`.
#[instrument(skip(config))]
pub fn run_calibration(data: &Path, out_dir: &Path, config: &RunConfig) -> Result<CalibrationRun> {
  config.validate()?;
  let dataset = read_dataset(data, &config.schema, config.delimiter)?;
  let calibration = calibrate(&dataset, config)?;

  std::fs::create_dir_all(out_dir).map_err(|e| Error::io(out_dir, e))?;
  let outputs = OutputPaths::in_dir(out_dir, config);
  serialize_to_file(&outputs.model, &calibration.model)?;
  report::write_summary(&outputs.summary, &calibration.summary)?;
  report::plot_loss(&calibration.outcome.trace, &outputs.loss_plot)?;
  report::plot_buckets(
    &calibration.evaluation.buckets,
    config.report.display_range,
    config.report.bins,
    &outputs.histogram_plot,
  )?;
  info!(
    eval_loss = calibration.summary.eval_loss,
    buckets = calibration.summary.buckets.len(),
    "calibration finished"
  );
  Ok(CalibrationRun { calibration, outputs })
}

/// Loads a saved model and predicts calibrated energies for every event in `data`.
/// The truth column is not needed and is ignored when present.
#[instrument]
pub fn apply_model(model: &Path, data: &Path, delimiter: u8) -> Result<Vec<f64>> {
  let artifact: ModelArtifact = deserialize_from_file(model)?;
  let features = read_features(data, &artifact.schema.features, delimiter)?;
  let predictions = artifact.predict(&features)?;
  info!(events = predictions.len(), "applied calibration");
  Ok(predictions)
}

pub fn write_predictions(path: &Path, predictions: &[f64]) -> Result<()> {
  let mut wtr = csv::Writer::from_path(path)?;
  wtr.write_record(["eCalib"])?;
  for p in predictions {
    wtr.write_record([p.to_string()])?;
  }
  wtr.flush().map_err(|e| Error::io(path, e))
}
