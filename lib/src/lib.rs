//! Multilayer-perceptron calibration of BHCal cluster energies against the
//! true particle energy, plus the particle-gun steering the samples come from.

pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluate;
pub mod gun;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod scaler;
pub mod training;
pub mod utils;

pub use error::{Error, Result};
pub use pipeline::{apply_model, calibrate, run_calibration};
