mod app_config;

use bhcal_calib::{apply_model, gun::ParticleGun, pipeline, run_calibration, utils};

use app_config::{delimiter_byte, AppConfig};
use clap::{Parser, Subcommand};
use std::{error::Error, path::PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Train the calibration network and write plots, summary and model
  Train {
    /// Event table with a header row of field names
    #[arg(short, long, value_name = "PATH")]
    data: PathBuf,
    /// YAML file overriding the default hyperparameters
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(short, long, value_name = "INT")]
    epochs: Option<usize>,
    #[arg(long, value_name = "INT")]
    seed: Option<u64>,
    #[arg(long)]
    delimiter: Option<char>,
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    out_dir: PathBuf,
  },
  /// Apply a saved model to an event table
  Apply {
    #[arg(short, long, value_name = "PATH")]
    model: PathBuf,
    #[arg(short, long, value_name = "PATH")]
    data: PathBuf,
    #[arg(short, long, value_name = "PATH", default_value = "NN_Predictions.csv")]
    output: PathBuf,
    #[arg(long, default_value_t = ',')]
    delimiter: char,
  },
  /// Render the particle-gun steering for the simulation driver
  Gun {
    /// YAML file with gun settings, defaults otherwise
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Write the steering here instead of stdout
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,
  },
}

fn main() -> Result<(), Box<dyn Error>> {
  utils::init_logging()?;
  let args = Cli::parse();

  match args.command {
    Command::Train {
      data,
      config,
      epochs,
      seed,
      delimiter,
      out_dir,
    } => {
      let file_config = match config {
        Some(path) => utils::yaml_from_file::<AppConfig>(&path)?,
        None => AppConfig::default(),
      };
      let cli_config = AppConfig {
        epochs,
        seed,
        delimiter,
        ..AppConfig::default()
      };
      let run_config = file_config.merge(cli_config).into_run_config()?;
      let run = run_calibration(&data, &out_dir, &run_config)?;
      info!(
        eval_loss = run.calibration.summary.eval_loss,
        model = %run.outputs.model.display(),
        "done"
      );
    }
    Command::Apply {
      model,
      data,
      output,
      delimiter,
    } => {
      let predictions = apply_model(&model, &data, delimiter_byte(delimiter)?)?;
      pipeline::write_predictions(&output, &predictions)?;
      info!(events = predictions.len(), output = %output.display(), "done");
    }
    Command::Gun { config, output } => {
      let gun = match config {
        Some(path) => utils::yaml_from_file::<ParticleGun>(&path)?,
        None => ParticleGun::default(),
      };
      let steering = gun.render_steering()?;
      match output {
        Some(path) => std::fs::write(&path, steering)?,
        None => print!("{steering}"),
      }
    }
  }
  Ok(())
}
