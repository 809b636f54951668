//! Inference session: owns the schedule, model handle, device and collaborators

use std::path::Path;

use burn::prelude::*;
use chrono::NaiveDateTime;
use diffpro_samplers::{BackendNoise, DdpmSampler, NoiseSource, ScheduleCoefficients};

use super::sampling::{SamplingLoop, SamplingOutcome};
use crate::conditioning::ConditioningSource;
use crate::config::{DiffusionParams, SessionOptions};
use crate::denoiser::NoisePredictor;
use crate::error::{DiffusionError, Result};
use crate::export::{ExportSink, NullExporter};

/// Label of the final sample's image
pub const FINAL_LABEL: &str = "x0";

/// Label of the conditioning sample's note sequence
pub const ORIGIN_LABEL: &str = "origin_x";

/// Note-sequence label for a `predict` result
///
/// `ddpm_prmat2c_[uncond]_<MM-DD_HHMMSS>` for unconditional runs and
/// `ddpm_prmat2c_init_[<song>]_<MM-DD_HHMMSS>` for conditional ones.
pub fn output_stamp(song: Option<&str>, now: &NaiveDateTime) -> String {
    let time = now.format("%m-%d_%H%M%S");
    match song {
        None => format!("ddpm_prmat2c_[uncond]_{time}"),
        Some(song) => format!("ddpm_prmat2c_init_[{song}]_{time}"),
    }
}

/// Top-level DDPM inference over piano-roll samples
///
/// The session is bound to one device. Noise, conditioning and export are
/// pluggable; by default noise comes from the backend RNG and exports are
/// discarded.
pub struct InferenceSession<B: Backend, M> {
    model: M,
    params: DiffusionParams,
    sampler: DdpmSampler<B>,
    device: B::Device,
    options: SessionOptions,
    noise: Box<dyn NoiseSource<B>>,
    exporter: Box<dyn ExportSink<B>>,
    conditioning: Option<Box<dyn ConditioningSource<B>>>,
}

impl<B: Backend, M: NoisePredictor<B>> InferenceSession<B, M> {
    /// Create a session, deriving the schedule coefficients from `params`
    pub fn new(model: M, params: DiffusionParams, device: B::Device) -> Result<Self> {
        params.validate()?;
        let coefficients = ScheduleCoefficients::from_config(&params.schedule_config()?)?;
        let options = SessionOptions::default();
        log::info!(
            "DDPM session: {} steps, {} schedule, sample {:?}",
            params.n_steps,
            params.beta_schedule,
            params.geometry().dims(1)
        );

        Ok(Self {
            model,
            params,
            sampler: DdpmSampler::new(coefficients, options.ddpm.clone()),
            device,
            options,
            noise: Box::new(BackendNoise),
            exporter: Box::new(NullExporter),
            conditioning: None,
        })
    }

    /// Create a session from the `params.json` of a model directory
    pub fn from_model_dir<P: AsRef<Path>>(model: M, dir: P, device: B::Device) -> Result<Self> {
        Self::new(model, DiffusionParams::from_model_dir(dir)?, device)
    }

    pub fn with_noise(mut self, noise: impl NoiseSource<B> + 'static) -> Self {
        self.noise = Box::new(noise);
        self
    }

    pub fn with_exporter(mut self, exporter: impl ExportSink<B> + 'static) -> Self {
        self.exporter = Box::new(exporter);
        self
    }

    pub fn with_conditioning(mut self, source: impl ConditioningSource<B> + 'static) -> Self {
        self.conditioning = Some(Box::new(source));
        self
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.sampler = DdpmSampler::new(self.sampler.coefficients().clone(), options.ddpm.clone());
        self.options = options;
        self
    }

    pub fn coefficients(&self) -> &ScheduleCoefficients {
        self.sampler.coefficients()
    }

    pub fn params(&self) -> &DiffusionParams {
        &self.params
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Generate `n_samples` samples
    ///
    /// Without `init_cond`, sampling starts from pure noise and runs
    /// `init_step` transitions (all `T` by default). With `init_cond`, the
    /// condition is forward-noised to `init_step`, which is then required,
    /// and denoised from `init_step - 1` down to 0. A condition with batch 1
    /// is repeated across all samples; a larger batch sets the sample count.
    pub fn sample(
        &mut self,
        n_samples: usize,
        init_cond: Option<Tensor<B, 4>>,
        init_step: Option<usize>,
    ) -> Result<Tensor<B, 4>> {
        Ok(self.sample_with_outcome(n_samples, init_cond, init_step)?.sample)
    }

    /// Like [`sample`](Self::sample), also reporting steps and snapshots
    pub fn sample_with_outcome(
        &mut self,
        n_samples: usize,
        init_cond: Option<Tensor<B, 4>>,
        init_step: Option<usize>,
    ) -> Result<SamplingOutcome<B>> {
        let n_steps = self.params.n_steps;
        let geometry = self.params.geometry();
        if n_samples == 0 {
            return Err(DiffusionError::config("n_samples must be at least 1"));
        }

        let (x, steps) = match init_cond {
            None => {
                let steps = init_step.unwrap_or(n_steps);
                if steps == 0 || steps > n_steps {
                    return Err(DiffusionError::config(format!(
                        "init_step must be in 1..={n_steps}, got {steps}"
                    )));
                }
                log::info!("Sampling {n_samples} from noise over {steps} steps");
                let x = self
                    .noise
                    .standard_normal(geometry.dims(n_samples), &self.device);
                (x, steps)
            }
            Some(cond) => {
                let steps = init_step.ok_or_else(|| {
                    DiffusionError::config("a conditioning sample requires an explicit init_step")
                })?;
                if steps == 0 || steps >= n_steps {
                    return Err(DiffusionError::config(format!(
                        "conditional init_step must be in 1..{n_steps}, got {steps}"
                    )));
                }
                let cond = self.fit_condition(cond, n_samples)?;
                let batch = cond.dims()[0];
                log::info!("Sampling {batch} from condition noised to t={steps}");
                let x = self
                    .sampler
                    .q_sample(cond, &vec![steps; batch], &mut *self.noise)?;
                (x, steps)
            }
        };

        SamplingLoop::new(&self.sampler, &self.options).run(
            &self.model,
            x,
            steps,
            &mut *self.noise,
            &mut *self.exporter,
        )
    }

    /// Move the condition to the session device and match the batch
    ///
    /// A batch-1 condition is repeated to `n_samples` rows. A larger batch is
    /// a whole song and keeps one row per segment.
    fn fit_condition(&self, cond: Tensor<B, 4>, n_samples: usize) -> Result<Tensor<B, 4>> {
        let [batch, channels, height, width] = cond.dims();
        let expected = self.params.geometry().dims(n_samples);
        if [channels, height, width][..] != expected[1..] {
            return Err(DiffusionError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: cond.dims().to_vec(),
            });
        }

        let cond = cond.to_device(&self.device);
        match batch {
            0 => Err(DiffusionError::config("condition has an empty batch")),
            1 => Ok(cond.repeat_dim(0, n_samples)),
            b => {
                if b != n_samples {
                    log::warn!("Condition has {b} segments, overriding n_samples={n_samples}");
                }
                Ok(cond)
            }
        }
    }

    /// Generate and export `n_samples` samples
    ///
    /// Unconditional runs cover all `T` steps and ignore `init_step`.
    /// Conditional runs take their sample from the configured
    /// conditioning source and also export it as `origin_x`. A whole-song
    /// source yields one sample per segment instead of `n_samples`. The result is
    /// exported as image `x0` and as a time-stamped note sequence.
    pub fn predict(
        &mut self,
        n_samples: usize,
        init_cond: bool,
        init_step: Option<usize>,
    ) -> Result<Tensor<B, 4>> {
        let now = chrono::Local::now().naive_local();

        let (x, label) = if init_cond {
            if init_step.is_none() {
                return Err(DiffusionError::config(
                    "conditional predict requires an explicit init_step",
                ));
            }
            let source = self.conditioning.as_mut().ok_or_else(|| {
                DiffusionError::config("conditional predict requires a conditioning source")
            })?;
            let (song, cond) = source
                .select(&self.device)
                .map_err(|e| DiffusionError::external("Conditioning source failed", e))?;
            self.exporter
                .export_note_sequence(&cond, ORIGIN_LABEL)
                .map_err(|e| DiffusionError::external("Failed to export condition", e))?;

            let x = self.sample(n_samples, Some(cond), init_step)?;
            (x, output_stamp(Some(&song), &now))
        } else {
            let x = self.sample(n_samples, None, None)?;
            (x, output_stamp(None, &now))
        };

        self.exporter
            .export_image(&x, FINAL_LABEL)
            .and_then(|_| self.exporter.export_note_sequence(&x, &label))
            .map_err(|e| DiffusionError::external(format!("Failed to export {label}"), e))?;
        log::info!("Exported {} and {}", FINAL_LABEL, label);

        Ok(x)
    }
}
