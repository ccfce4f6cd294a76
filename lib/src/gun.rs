//! Single-particle gun settings handed to the detector simulation driver.
//! Nothing here runs a simulation; the gun is validated and rendered as steering.

use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AngularDistribution {
  Uniform,
  #[default]
  CosTheta,
  Eta,
  Ffbar,
}

impl fmt::Display for AngularDistribution {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      AngularDistribution::Uniform => "uniform",
      AngularDistribution::CosTheta => "cos(theta)",
      AngularDistribution::Eta => "eta",
      AngularDistribution::Ffbar => "ffbar",
    };
    f.write_str(name)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleGun {
  pub particle: String,
  pub energy_gev: f64,
  pub multiplicity: u32,
  pub position_mm: [f64; 3],
  pub distribution: AngularDistribution,
  pub theta_min_deg: f64,
  pub theta_max_deg: f64,
}

impl Default for ParticleGun {
  /// 10 GeV mu+ into the central barrel.
  fn default() -> Self {
    Self {
      particle: "mu+".to_string(),
      energy_gev: 10.0,
      multiplicity: 1,
      position_mm: [0.0; 3],
      distribution: AngularDistribution::CosTheta,
      theta_min_deg: 33.5,
      theta_max_deg: 146.0,
    }
  }
}

impl ParticleGun {
  pub fn validate(&self) -> Result<()> {
    if self.particle.trim().is_empty() {
      return Err(Error::InvalidConfig("particle gun needs a particle name".to_string()));
    }
    if !(self.energy_gev > 0.0) {
      return Err(Error::InvalidConfig(format!(
        "particle gun energy must be positive, got {} GeV",
        self.energy_gev
      )));
    }
    if self.multiplicity == 0 {
      return Err(Error::InvalidConfig("particle gun multiplicity must be at least 1".to_string()));
    }
    if !(0.0 <= self.theta_min_deg && self.theta_min_deg < self.theta_max_deg && self.theta_max_deg <= 180.0) {
      return Err(Error::InvalidConfig(format!(
        "theta range {}..{} deg must satisfy 0 <= min < max <= 180",
        self.theta_min_deg, self.theta_max_deg
      )));
    }
    Ok(())
  }

  /// Steering snippet with `SIM.gun.*` assignments, in the simulation driver's units.
  pub fn render_steering(&self) -> Result<String> {
    self.validate()?;
    let position = self.position_mm.iter().map(|v| format!("{v:?}*mm")).join(", ");
    let lines = [
      "from DDSim.DD4hepSimulation import DD4hepSimulation".to_string(),
      "from g4units import mm, GeV, MeV, degree".to_string(),
      "SIM = DD4hepSimulation()".to_string(),
      String::new(),
      format!("SIM.gun.energy       = {:?}*GeV", self.energy_gev),
      format!("SIM.gun.particle     = \"{}\"", self.particle),
      format!("SIM.gun.multiplicity = {}", self.multiplicity),
      format!("SIM.gun.position     = ({position})"),
      format!("SIM.gun.distribution = \"{}\"", self.distribution),
      format!("SIM.gun.thetaMin     = {:?}*degree", self.theta_min_deg),
      format!("SIM.gun.thetaMax     = {:?}*degree", self.theta_max_deg),
    ];
    Ok(lines.iter().join("\n") + "\n")
  }
}
