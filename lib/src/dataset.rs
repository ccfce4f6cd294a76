use std::path::Path;

use ndarray::{Array1, Array2, Axis};
use rand::{seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{Error, Result};

/// Channel sums of the calibration tuple fed to the network, in input order.
pub const DEFAULT_FEATURES: [&str; 18] = [
  "eLeadBHCal",
  "eLeadBEMC",
  "eSumScFiLayer1",
  "eSumScFiLayer2",
  "eSumScFiLayer3",
  "eSumScFiLayer4",
  "eSumScFiLayer5",
  "eSumScFiLayer6",
  "eSumScFiLayer7",
  "eSumScFiLayer8",
  "eSumScFiLayer9",
  "eSumScFiLayer10",
  "eSumScFiLayer11",
  "eSumScFiLayer12",
  "eSumImageLayer1",
  "eSumImageLayer3",
  "eSumImageLayer4",
  "eSumImageLayer6",
];

/// True particle energy.
pub const DEFAULT_TARGET: &str = "ePar";

/// Which named columns of the event table are features and which one is the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetSchema {
  pub features: Vec<String>,
  pub target: String,
}

impl Default for DatasetSchema {
  fn default() -> Self {
    Self {
      features: DEFAULT_FEATURES.iter().map(|s| s.to_string()).collect(),
      target: DEFAULT_TARGET.to_string(),
    }
  }
}

/// Samples held fully in memory: one feature row and one target per event.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
  pub feature_names: Vec<String>,
  pub features: Array2<f64>,
  pub targets: Array1<f64>,
}

impl Dataset {
  pub fn new(feature_names: Vec<String>, features: Array2<f64>, targets: Array1<f64>) -> Result<Self> {
    if features.ncols() != feature_names.len() {
      return Err(Error::ArityMismatch {
        expected: feature_names.len(),
        got: features.ncols(),
      });
    }
    if features.nrows() != targets.len() {
      return Err(Error::LengthMismatch {
        rows: features.nrows(),
        targets: targets.len(),
      });
    }
    Ok(Self {
      feature_names,
      features,
      targets,
    })
  }

  pub fn len(&self) -> usize {
    self.targets.len()
  }

  pub fn is_empty(&self) -> bool {
    self.targets.is_empty()
  }

  pub fn arity(&self) -> usize {
    self.feature_names.len()
  }

  /// Targets as an `n x 1` column, the shape the network outputs.
  pub fn target_column(&self) -> Array2<f64> {
    self.targets.clone().insert_axis(Axis(1))
  }

  fn select(&self, rows: &[usize]) -> Self {
    Self {
      feature_names: self.feature_names.clone(),
      features: self.features.select(Axis(0), rows),
      targets: self.targets.select(Axis(0), rows),
    }
  }
}

/// Parses a delimited event table with a header row, picking columns by name.
pub fn parse_dataset<R: std::io::Read>(reader: R, schema: &DatasetSchema, delimiter: u8) -> Result<Dataset> {
  let (features, targets) = parse_table(reader, &schema.features, Some(&schema.target), delimiter)?;
  Dataset::new(schema.features.clone(), features, Array1::from(targets))
}

/// Like [`parse_dataset`] but reads only the feature columns, so tables
/// without the truth column can be calibrated.
pub fn parse_features<R: std::io::Read>(reader: R, features: &[String], delimiter: u8) -> Result<Array2<f64>> {
  Ok(parse_table(reader, features, None, delimiter)?.0)
}

fn parse_table<R: std::io::Read>(
  reader: R,
  features: &[String],
  target: Option<&str>,
  delimiter: u8,
) -> Result<(Array2<f64>, Vec<f64>)> {
  let mut rdr = csv::ReaderBuilder::new()
    .delimiter(delimiter)
    .trim(csv::Trim::All)
    .from_reader(reader);

  let headers = rdr.headers()?.clone();
  let column = |name: &str| {
    headers
      .iter()
      .position(|h| h == name)
      .ok_or_else(|| Error::MissingField { name: name.to_string() })
  };
  let feature_cols = features
    .iter()
    .map(|name| column(name))
    .collect::<Result<Vec<_>>>()?;
  let target_col = target.map(|name| column(name).map(|col| (col, name))).transpose()?;

  // energies are finite; NaN or inf cells are malformed, not numbers
  let parse = |record: &csv::StringRecord, idx: usize, field: &str, n: usize| -> Result<f64> {
    let raw = record.get(idx).ok_or_else(|| Error::MissingField {
      name: field.to_string(),
    })?;
    match raw.parse::<f64>() {
      Ok(v) if v.is_finite() => Ok(v),
      _ => Err(Error::Parse {
        record: n,
        field: field.to_string(),
        value: raw.to_string(),
      }),
    }
  };

  let mut flat: Vec<f64> = Vec::new();
  let mut targets: Vec<f64> = Vec::new();
  let mut rows = 0;
  for (n, record) in rdr.records().enumerate() {
    let record = record?;
    for (col, name) in feature_cols.iter().zip(features.iter()) {
      flat.push(parse(&record, *col, name, n)?);
    }
    if let Some((col, name)) = target_col {
      targets.push(parse(&record, col, name, n)?);
    }
    rows += 1;
  }

  if rows == 0 {
    return Err(Error::EmptyDataset);
  }
  let table = Array2::from_shape_vec((rows, features.len()), flat).map_err(|e| Error::InvalidConfig(e.to_string()))?;
  Ok((table, targets))
}

#[instrument(skip(schema))]
pub fn read_dataset(path: &Path, schema: &DatasetSchema, delimiter: u8) -> Result<Dataset> {
  let file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
  let ds = parse_dataset(file, schema, delimiter)?;
  info!(records = ds.len(), features = ds.arity(), "read event table");
  Ok(ds)
}

#[instrument(skip(features))]
pub fn read_features(path: &Path, features: &[String], delimiter: u8) -> Result<Array2<f64>> {
  let file = std::fs::File::open(path).map_err(|e| Error::io(path, e))?;
  let table = parse_features(file, features, delimiter)?;
  info!(records = table.nrows(), features = table.ncols(), "read feature table");
  Ok(table)
}

/// Shuffles and partitions into `(train, test)`; the test subset gets
/// `ceil(test_fraction * n)` samples.
pub fn split_dataset<R: Rng>(ds: &Dataset, test_fraction: f64, rng: &mut R) -> Result<(Dataset, Dataset)> {
  let total = ds.len();
  let n_test = (test_fraction * total as f64).ceil() as usize;
  if n_test == 0 || n_test >= total {
    return Err(Error::EmptySplit { total, test_fraction });
  }
  let mut idx: Vec<usize> = (0..total).collect();
  idx.shuffle(rng);
  let (test_idx, train_idx) = idx.split_at(n_test);
  debug!(train = train_idx.len(), test = test_idx.len(), "split dataset");
  Ok((ds.select(train_idx), ds.select(test_idx)))
}
