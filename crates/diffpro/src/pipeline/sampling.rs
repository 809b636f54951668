//! The DDPM reverse chain

use burn::prelude::*;
use diffpro_samplers::{reverse_timesteps, DdpmSampler, NoiseSource};
use indicatif::{ProgressBar, ProgressStyle};

use super::{check_finite_if, tensor_stats, DebugConfig, DiagnosticSnapshot, SnapshotPolicy};
use crate::config::SessionOptions;
use crate::denoiser::{timestep_tensor, NoisePredictor};
use crate::error::{DiffusionError, Result};
use crate::export::ExportSink;

/// Result of a completed reverse chain
#[derive(Debug, Clone)]
pub struct SamplingOutcome<B: Backend> {
    /// Terminal sample x_0
    pub sample: Tensor<B, 4>,
    /// Transitions applied
    pub steps: usize,
    /// Snapshots emitted, in order
    pub snapshots: Vec<DiagnosticSnapshot>,
}

/// Runs `init_step` reverse transitions, from timestep `init_step - 1` down to 0
pub struct SamplingLoop<'a, B: Backend> {
    sampler: &'a DdpmSampler<B>,
    snapshots: &'a SnapshotPolicy,
    debug: DebugConfig,
    show_progress: bool,
}

impl<'a, B: Backend> SamplingLoop<'a, B> {
    pub fn new(sampler: &'a DdpmSampler<B>, options: &'a SessionOptions) -> Self {
        Self {
            sampler,
            snapshots: &options.snapshots,
            debug: options.debug,
            show_progress: options.show_progress,
        }
    }

    fn progress_bar(&self, steps: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(steps as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb
    }

    /// Denoise `x` through `init_step` transitions
    ///
    /// Every snapshot the policy selects is handed to `exporter` as both an
    /// image and a note sequence labelled `x<t>`. Any error aborts the chain.
    pub fn run<M, N, E>(
        &self,
        model: &M,
        mut x: Tensor<B, 4>,
        init_step: usize,
        noise: &mut N,
        exporter: &mut E,
    ) -> Result<SamplingOutcome<B>>
    where
        M: NoisePredictor<B> + ?Sized,
        N: NoiseSource<B> + ?Sized,
        E: ExportSink<B> + ?Sized,
    {
        let n_steps = self.sampler.num_steps();
        if init_step > n_steps {
            return Err(DiffusionError::config(format!(
                "init_step {init_step} exceeds the {n_steps} diffusion steps"
            )));
        }

        let dims = x.dims();
        let batch = dims[0];
        let device = x.device();

        if self.debug.sampler {
            log::debug!("DDPM sampler, {} steps, shape {:?}", init_step, dims);
            log::debug!("Initial sample: {}", tensor_stats(&x));
        }

        let pb = self.progress_bar(init_step);
        let mut snapshots = Vec::new();

        for (i, t) in reverse_timesteps(init_step).into_iter().enumerate() {
            let eps_theta = model
                .predict_noise(x.clone(), timestep_tensor::<B>(t, batch, &device))
                .map_err(|e| {
                    DiffusionError::external(format!("Noise predictor failed at t={t}"), e)
                })?;
            if eps_theta.dims() != dims {
                return Err(DiffusionError::ShapeMismatch {
                    expected: dims.to_vec(),
                    actual: eps_theta.dims().to_vec(),
                });
            }
            check_finite_if(&eps_theta, "eps_theta", t, self.debug.nan)?;

            x = self.sampler.p_sample(x, &vec![t; batch], eps_theta, noise)?;
            check_finite_if(&x, "sample", t, self.debug.nan)?;

            if self.debug.sampler && i < 3 {
                log::debug!("Step {} (t={}) - sample: {}", i, t, tensor_stats(&x));
            }

            if self.snapshots.should_snapshot(i) {
                let snapshot = DiagnosticSnapshot {
                    step_index: i,
                    timestep: t,
                };
                let label = snapshot.label();
                if self.debug.sampler {
                    log::debug!("Snapshot {}: {}", label, tensor_stats(&x));
                }
                exporter
                    .export_image(&x, &label)
                    .and_then(|_| exporter.export_note_sequence(&x, &label))
                    .map_err(|e| {
                        DiffusionError::external(format!("Failed to export snapshot {label}"), e)
                    })?;
                snapshots.push(snapshot);
            }

            pb.inc(1);
        }
        pb.finish_and_clear();

        if self.debug.sampler {
            log::debug!("Final sample: {}", tensor_stats(&x));
        }

        Ok(SamplingOutcome {
            sample: x,
            steps: init_step,
            snapshots,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::NullExporter;
    use burn_ndarray::NdArray;
    use diffpro_samplers::{DdpmConfig, ScheduleCoefficients, SeededNoise};
    use std::cell::RefCell;

    type TB = NdArray<f32>;

    fn sampler(n: usize) -> DdpmSampler<TB> {
        DdpmSampler::new(
            ScheduleCoefficients::linear(n, 1e-4, 0.02).unwrap(),
            DdpmConfig::default(),
        )
    }

    #[test]
    fn test_visits_timesteps_in_reverse() {
        let sampler = sampler(20);
        let options = SessionOptions::default();
        let seen = RefCell::new(Vec::new());
        let model = |x: Tensor<TB, 4>, t: Tensor<TB, 1, Int>| -> anyhow::Result<Tensor<TB, 4>> {
            let t: Vec<i64> = t.into_data().convert::<i64>().to_vec().unwrap();
            seen.borrow_mut().push(t[0]);
            Ok(x.zeros_like())
        };
        let x = Tensor::<TB, 4>::zeros([2, 1, 2, 2], &Default::default());

        let outcome = SamplingLoop::new(&sampler, &options)
            .run(&model, x, 7, &mut SeededNoise::new(0), &mut NullExporter)
            .unwrap();

        assert_eq!(outcome.steps, 7);
        assert_eq!(*seen.borrow(), vec![6, 5, 4, 3, 2, 1, 0]);
        assert_eq!(outcome.snapshots.len(), 1);
        assert_eq!(outcome.snapshots[0].timestep, 6);
    }

    #[test]
    fn test_rejects_too_many_steps() {
        let sampler = sampler(5);
        let options = SessionOptions::default();
        let model =
            |x: Tensor<TB, 4>, _t: Tensor<TB, 1, Int>| -> anyhow::Result<Tensor<TB, 4>> { Ok(x) };
        let x = Tensor::<TB, 4>::zeros([1, 1, 2, 2], &Default::default());
        let err = SamplingLoop::new(&sampler, &options)
            .run(&model, x, 6, &mut SeededNoise::new(0), &mut NullExporter)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_nan_guard() {
        let sampler = sampler(5);
        let options = SessionOptions {
            debug: DebugConfig {
                sampler: true,
                nan: true,
            },
            ..Default::default()
        };
        let model = |x: Tensor<TB, 4>, _t: Tensor<TB, 1, Int>| -> anyhow::Result<Tensor<TB, 4>> {
            Ok(x.zeros_like().add_scalar(f32::NAN))
        };
        let x = Tensor::<TB, 4>::zeros([1, 1, 2, 2], &Default::default());
        let err = SamplingLoop::new(&sampler, &options)
            .run(&model, x, 5, &mut SeededNoise::new(0), &mut NullExporter)
            .unwrap_err();
        assert!(matches!(
            err,
            DiffusionError::NonFinite { timestep: 4, .. }
        ));
    }
}
