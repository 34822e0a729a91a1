use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::{BandSet, CalibrationConfig, SearchMethod};
use crate::sim::{Population, StylisedEngine};

/// Settings for a run of the analysis, loaded from TOML.
///
/// Every field has a default, so an empty file (or no file) is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub calibration: CalibrationSettings,
    #[serde(default)]
    pub bands: BandSettings,
    #[serde(default)]
    pub population: PopulationSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSettings {
    /// Largest acceptable |net revenue|, in pounds per year.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,

    /// Calibration step in pounds per week.
    #[serde(default = "default_step_weeks")]
    pub step_weeks: f64,

    #[serde(default = "default_weeks_per_year")]
    pub weeks_per_year: f64,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default)]
    pub method: SearchMethod,
}

fn default_tolerance() -> f64 {
    1e9
}

fn default_step_weeks() -> f64 {
    1.0
}

fn default_weeks_per_year() -> f64 {
    52.0
}

fn default_max_iterations() -> u32 {
    1_000
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            step_weeks: default_step_weeks(),
            weeks_per_year: default_weeks_per_year(),
            max_iterations: default_max_iterations(),
            method: SearchMethod::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSettings {
    /// Half-width of the "No change" band around zero relative gain.
    #[serde(default = "default_no_change_threshold")]
    pub no_change_threshold: f64,

    #[serde(default = "default_large_change_threshold")]
    pub large_change_threshold: f64,
}

fn default_no_change_threshold() -> f64 {
    crate::core::DEFAULT_NO_CHANGE_THRESHOLD
}

fn default_large_change_threshold() -> f64 {
    crate::core::DEFAULT_LARGE_CHANGE_THRESHOLD
}

impl Default for BandSettings {
    fn default() -> Self {
        Self {
            no_change_threshold: default_no_change_threshold(),
            large_change_threshold: default_large_change_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSettings {
    /// JSON population file. When absent a synthetic population is generated.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_households")]
    pub households: usize,

    #[serde(default = "default_seed")]
    pub seed: u64,

    /// People the sample stands for when summing aggregates.
    #[serde(default = "default_represents")]
    pub represents: f64,
}

fn default_households() -> usize {
    2_000
}

fn default_seed() -> u64 {
    42
}

fn default_represents() -> f64 {
    66_800_000.0
}

impl Default for PopulationSettings {
    fn default() -> Self {
        Self {
            path: None,
            households: default_households(),
            seed: default_seed(),
            represents: default_represents(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let calibration = &self.calibration;
        if !calibration.weeks_per_year.is_finite() || calibration.weeks_per_year <= 0.0 {
            bail!(
                "calibration.weeks_per_year must be > 0, got {}",
                calibration.weeks_per_year
            );
        }
        if self.population.path.is_none() && self.population.households == 0 {
            bail!("population.households must be > 0");
        }
        if !self.population.represents.is_finite() || self.population.represents <= 0.0 {
            bail!(
                "population.represents must be > 0, got {}",
                self.population.represents
            );
        }
        // Surface calibration and band errors here rather than mid-run.
        self.calibration_config()?;
        self.band_set()?;
        Ok(())
    }

    /// Calibration settings as the core expects them: the step is annual.
    pub fn calibration_config(&self) -> Result<CalibrationConfig> {
        let c = &self.calibration;
        let step = c.step_weeks * c.weeks_per_year;
        if !step.is_finite() || step <= 0.0 {
            bail!("calibration.step_weeks must be > 0, got {}", c.step_weeks);
        }
        if c.tolerance.is_nan() || c.tolerance < 0.0 {
            bail!("calibration.tolerance must be >= 0, got {}", c.tolerance);
        }
        if c.max_iterations == 0 {
            bail!("calibration.max_iterations must be > 0");
        }
        Ok(CalibrationConfig {
            target_revenue: 0.0,
            tolerance: c.tolerance,
            step,
            max_iterations: c.max_iterations,
            method: c.method,
        })
    }

    pub fn band_set(&self) -> Result<BandSet> {
        Ok(BandSet::standard(
            self.bands.no_change_threshold,
            self.bands.large_change_threshold,
        )?)
    }

    pub fn population(&self) -> Result<Population> {
        match &self.population.path {
            Some(path) => {
                let json = fs::read_to_string(path).with_context(|| {
                    format!("Failed to read population from {}", path.display())
                })?;
                Population::from_json(&json).with_context(|| {
                    format!("Failed to parse population from {}", path.display())
                })
            }
            None => Ok(Population::synthetic(
                self.population.households,
                self.population.seed,
            )),
        }
    }

    pub fn engine(&self) -> Result<StylisedEngine> {
        let engine = StylisedEngine::new(self.population()?)
            .grossed_up_to(self.population.represents)?;
        Ok(engine)
    }
}
