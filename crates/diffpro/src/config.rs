//! Diffusion parameters and session options
//!
//! Parameters live next to a checkpoint as `params.json` and use the field
//! names the training code writes:
//!
//! ```json
//! {
//!   "n_steps": 1000,
//!   "beta_schedule": "linear",
//!   "beta_start": 0.0001,
//!   "beta_end": 0.02,
//!   "image_channels": 2,
//!   "image_size_h": 128,
//!   "image_size_w": 128
//! }
//! ```

use std::fs;
use std::path::Path;

use diffpro_samplers::{BetaSchedule, DdpmConfig, ScheduleConfig};
use serde::{Deserialize, Serialize};

use crate::error::{DiffusionError, Result};
use crate::pipeline::{DebugConfig, SnapshotPolicy};

/// File name of the parameter file inside a model directory
pub const PARAMS_FILE: &str = "params.json";

/// Diffusion hyperparameters and sample geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffusionParams {
    /// Total number of diffusion steps (T)
    pub n_steps: usize,
    /// Schedule name: `linear`, `scaled_linear` or `cosine`
    pub beta_schedule: String,
    pub beta_start: f64,
    pub beta_end: f64,
    /// Channels per sample (onset + sustain)
    pub image_channels: usize,
    /// Time steps per sample
    pub image_size_h: usize,
    /// Pitches per sample
    pub image_size_w: usize,
}

impl Default for DiffusionParams {
    fn default() -> Self {
        Self {
            n_steps: 1000,
            beta_schedule: BetaSchedule::Linear.name().to_string(),
            beta_start: 1e-4,
            beta_end: 0.02,
            image_channels: 2,
            image_size_h: 128,
            image_size_w: 128,
        }
    }
}

impl DiffusionParams {
    /// Load and validate parameters from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let params: Self = serde_json::from_str(&content)?;
        params.validate()?;
        Ok(params)
    }

    /// Load `params.json` from a model directory
    pub fn from_model_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::from_file(dir.as_ref().join(PARAMS_FILE))
    }

    /// Write parameters as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check that the parameters describe a usable schedule and geometry
    pub fn validate(&self) -> Result<()> {
        if self.n_steps == 0 {
            return Err(DiffusionError::config("n_steps must be at least 1"));
        }
        if self.beta_schedule()? != BetaSchedule::Cosine {
            for (name, value) in [("beta_start", self.beta_start), ("beta_end", self.beta_end)] {
                if !(value > 0.0 && value < 1.0) {
                    return Err(DiffusionError::config(format!(
                        "{name} must lie in (0, 1), got {value}"
                    )));
                }
            }
        }
        if self.image_channels == 0 || self.image_size_h == 0 || self.image_size_w == 0 {
            return Err(DiffusionError::config(format!(
                "sample geometry must be non-empty, got {:?}",
                self.geometry().dims(1)
            )));
        }
        Ok(())
    }

    /// Parsed schedule name
    pub fn beta_schedule(&self) -> Result<BetaSchedule> {
        BetaSchedule::from_name(&self.beta_schedule).ok_or_else(|| {
            DiffusionError::config(format!("unknown beta schedule '{}'", self.beta_schedule))
        })
    }

    /// Schedule configuration for the sampler crate
    pub fn schedule_config(&self) -> Result<ScheduleConfig> {
        Ok(ScheduleConfig {
            n_steps: self.n_steps,
            beta_start: self.beta_start,
            beta_end: self.beta_end,
            schedule: self.beta_schedule()?,
        })
    }

    pub fn geometry(&self) -> SampleGeometry {
        SampleGeometry {
            channels: self.image_channels,
            height: self.image_size_h,
            width: self.image_size_w,
        }
    }
}

/// Per-sample shape `[channels, height, width]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleGeometry {
    pub channels: usize,
    /// Time axis
    pub height: usize,
    /// Pitch axis
    pub width: usize,
}

impl SampleGeometry {
    /// Full tensor shape for `batch` samples
    pub fn dims(&self, batch: usize) -> [usize; 4] {
        [batch, self.channels, self.height, self.width]
    }
}

/// Options that shape a session's runs without changing the model
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Which loop iterations emit a diagnostic snapshot
    pub snapshots: SnapshotPolicy,
    /// Debug output flags
    pub debug: DebugConfig,
    /// Draw a progress bar over the reverse chain
    pub show_progress: bool,
    /// Reverse step variant
    pub ddpm: DdpmConfig,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            snapshots: SnapshotPolicy::default(),
            debug: DebugConfig::default(),
            show_progress: false,
            ddpm: DdpmConfig::default(),
        }
    }
}

/// Arguments of the default `predict` invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictDefaults {
    pub n_samples: usize,
    pub init_cond: bool,
    pub init_step: Option<usize>,
}

impl Default for PredictDefaults {
    fn default() -> Self {
        Self {
            n_samples: 16,
            init_cond: false,
            init_step: Some(100),
        }
    }
}
