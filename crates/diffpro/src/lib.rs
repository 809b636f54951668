//! diffpro: DDPM inference for piano-roll diffusion models
//!
//! Generates 2-channel piano rolls (`prmat2c`: note onsets and sustains over
//! time × pitch) by running the DDPM reverse chain with a caller-supplied
//! noise estimator. Generation starts from Gaussian noise or from a real song
//! forward-noised to an intermediate step.
//!
//! # Example
//!
//! ```ignore
//! use diffpro::{FileExporter, InferenceSession, PredictDefaults, SongLibrary};
//! use diffpro::backends::{default_device, DefaultBackend};
//!
//! let mut session = InferenceSession::<DefaultBackend, _>::from_model_dir(
//!     unet,
//!     "checkpoints/prmat2c",
//!     default_device(),
//! )?
//! .with_exporter(FileExporter::new("exp")?)
//! .with_conditioning(SongLibrary::open("data/val")?.with_index(3)?);
//!
//! let defaults = PredictDefaults::default();
//! let x0 = session.predict(defaults.n_samples, defaults.init_cond, defaults.init_step)?;
//! ```

pub use diffpro_samplers as samplers;

pub mod backends;
pub mod conditioning;
pub mod config;
pub mod denoiser;
pub mod error;
pub mod export;
pub mod loader;
pub mod pipeline;

pub use conditioning::{ConditioningSource, FixedConditioning, SongLibrary};
pub use config::{DiffusionParams, PredictDefaults, SampleGeometry, SessionOptions};
pub use denoiser::NoisePredictor;
pub use error::{DiffusionError, ErrorKind, Result};
pub use export::{ExportSink, FileExporter, Note, NullExporter};
pub use pipeline::{
    DebugConfig, DiagnosticSnapshot, InferenceSession, SamplingLoop, SamplingOutcome,
    SnapshotPolicy,
};

pub use diffpro_samplers::{
    BackendNoise, BetaSchedule, DdpmConfig, NoiseSource, ScheduleCoefficients, SeededNoise,
    VarianceType,
};
