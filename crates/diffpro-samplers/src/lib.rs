//! diffpro-samplers: DDPM schedule math and sampling steps
//!
//! - [`ScheduleCoefficients`]: every per-timestep coefficient derived from a β schedule
//! - [`DdpmSampler`]: the ancestral reverse step and the closed-form forward step
//! - [`NoiseSource`]: injectable standard-normal draws (backend RNG or seeded)

pub mod ddpm;
pub mod error;
pub mod noise;
pub mod scheduler;

pub use ddpm::{DdpmConfig, DdpmSampler, VarianceType};
pub use error::SamplerError;
pub use noise::{BackendNoise, NoiseSource, SeededNoise};
pub use scheduler::{
    gather_rows, reverse_timesteps, BetaSchedule, ScheduleCoefficients, ScheduleConfig,
};
