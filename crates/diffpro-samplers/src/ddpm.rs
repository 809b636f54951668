//! DDPM (Denoising Diffusion Probabilistic Models) sampler
//!
//! Ancestral sampling of the reverse Markov chain with a fixed variance
//! schedule, plus the closed-form forward process used to seed partial
//! generation from a real sample.

use burn::prelude::*;

use crate::error::SamplerError;
use crate::noise::NoiseSource;
use crate::scheduler::{gather_rows, ScheduleCoefficients};

/// Variance used by the reverse step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VarianceType {
    /// σ²_t = β_t
    #[default]
    Beta,
    /// σ²_t = β̃_t, the true posterior variance
    PosteriorBeta,
}

/// Configuration for the DDPM sampler
#[derive(Debug, Clone, Default)]
pub struct DdpmConfig {
    /// Variance type
    pub variance_type: VarianceType,
    /// Drop the noise term at t = 0
    ///
    /// Off by default: the reverse step is applied literally at every
    /// timestep, including the last one.
    pub deterministic_final_step: bool,
}

/// DDPM sampler
///
/// Holds the precomputed schedule and implements the per-step updates.
/// Every batch row may sit at its own timestep.
#[derive(Debug, Clone)]
pub struct DdpmSampler<B: Backend> {
    /// Sampler configuration
    config: DdpmConfig,
    /// Schedule coefficients
    coefficients: ScheduleCoefficients,
    /// Phantom data for backend type
    _marker: std::marker::PhantomData<B>,
}

impl<B: Backend> DdpmSampler<B> {
    /// Create a new DDPM sampler
    pub fn new(coefficients: ScheduleCoefficients, config: DdpmConfig) -> Self {
        Self {
            config,
            coefficients,
            _marker: std::marker::PhantomData,
        }
    }

    /// Schedule coefficients
    pub fn coefficients(&self) -> &ScheduleCoefficients {
        &self.coefficients
    }

    /// Sampler configuration
    pub fn config(&self) -> &DdpmConfig {
        &self.config
    }

    /// Number of diffusion steps (T)
    pub fn num_steps(&self) -> usize {
        self.coefficients.len()
    }

    /// Variance of the reverse step at `t`
    pub fn variance(&self, t: usize) -> f64 {
        if self.config.deterministic_final_step && t == 0 {
            return 0.0;
        }
        match self.config.variance_type {
            VarianceType::Beta => self.coefficients.sigma2()[t],
            VarianceType::PosteriorBeta => self.coefficients.posterior_variance()[t],
        }
    }

    fn check_batch(&self, dims: [usize; 4], timesteps: &[usize]) -> Result<(), SamplerError> {
        if timesteps.len() != dims[0] {
            return Err(SamplerError::BatchMismatch {
                batch: dims[0],
                timesteps: timesteps.len(),
            });
        }
        timesteps
            .iter()
            .try_for_each(|&t| self.coefficients.check_timestep(t))
    }

    fn check_shape(expected: [usize; 4], actual: [usize; 4]) -> Result<(), SamplerError> {
        if expected != actual {
            return Err(SamplerError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: actual.to_vec(),
            });
        }
        Ok(())
    }

    /// Sample `x_{t-1}` from `p_θ(x_{t-1} | x_t)`
    ///
    /// `timesteps` holds one timestep per batch row and `eps_theta` is the
    /// model's noise estimate for `xt`.
    pub fn p_sample<N: NoiseSource<B> + ?Sized>(
        &self,
        xt: Tensor<B, 4>,
        timesteps: &[usize],
        eps_theta: Tensor<B, 4>,
        noise: &mut N,
    ) -> Result<Tensor<B, 4>, SamplerError> {
        let dims = xt.dims();
        self.check_batch(dims, timesteps)?;
        Self::check_shape(dims, eps_theta.dims())?;

        let eps = noise.standard_normal(dims, &xt.device());
        self.p_sample_with_noise(xt, timesteps, eps_theta, eps)
    }

    /// Reverse step with an explicit noise draw
    pub fn p_sample_with_noise(
        &self,
        xt: Tensor<B, 4>,
        timesteps: &[usize],
        eps_theta: Tensor<B, 4>,
        eps: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>, SamplerError> {
        let dims = xt.dims();
        self.check_batch(dims, timesteps)?;
        Self::check_shape(dims, eps_theta.dims())?;
        Self::check_shape(dims, eps.dims())?;

        let device = xt.device();
        let coefs = &self.coefficients;

        // (1 - α_t) / √(1 - ᾱ_t)
        let eps_coef = gather_rows::<B, _>(timesteps, &device, |t| {
            (1.0 - coefs.alphas()[t]) / (1.0 - coefs.alpha_bars()[t]).sqrt()
        });
        let inv_sqrt_alpha =
            gather_rows::<B, _>(timesteps, &device, |t| 1.0 / coefs.alphas()[t].sqrt());
        let std = gather_rows::<B, _>(timesteps, &device, |t| self.variance(t).sqrt());

        // 1/√α_t · (x_t − eps_coef · ε_θ)
        let mean = (xt - eps_theta * eps_coef) * inv_sqrt_alpha;

        Ok(mean + eps * std)
    }

    /// Sample `x_t` from `q(x_t | x_0)`
    pub fn q_sample<N: NoiseSource<B> + ?Sized>(
        &self,
        x0: Tensor<B, 4>,
        timesteps: &[usize],
        noise: &mut N,
    ) -> Result<Tensor<B, 4>, SamplerError> {
        let dims = x0.dims();
        self.check_batch(dims, timesteps)?;

        let eps = noise.standard_normal(dims, &x0.device());
        self.q_sample_with_noise(x0, timesteps, eps)
    }

    /// Forward step with an explicit noise draw
    ///
    /// `x_t = √ᾱ_t · x_0 + √(1 − ᾱ_t) · ε`
    pub fn q_sample_with_noise(
        &self,
        x0: Tensor<B, 4>,
        timesteps: &[usize],
        eps: Tensor<B, 4>,
    ) -> Result<Tensor<B, 4>, SamplerError> {
        let dims = x0.dims();
        self.check_batch(dims, timesteps)?;
        Self::check_shape(dims, eps.dims())?;

        let device = x0.device();
        let alpha_bars = self.coefficients.alpha_bars();
        let signal = gather_rows::<B, _>(timesteps, &device, |t| alpha_bars[t].sqrt());
        let noise_scale = gather_rows::<B, _>(timesteps, &device, |t| (1.0 - alpha_bars[t]).sqrt());

        Ok(x0 * signal + eps * noise_scale)
    }

    /// Mean and variance of the posterior `q(x_{t-1} | x_t, x_0)`
    ///
    /// Returns the mean tensor and the per-row variance β̃_t as `[batch, 1, 1, 1]`.
    pub fn q_posterior(
        &self,
        x0: Tensor<B, 4>,
        xt: Tensor<B, 4>,
        timesteps: &[usize],
    ) -> Result<(Tensor<B, 4>, Tensor<B, 4>), SamplerError> {
        let dims = xt.dims();
        self.check_batch(dims, timesteps)?;
        Self::check_shape(dims, x0.dims())?;

        let device = xt.device();
        let coefs = &self.coefficients;
        let coef1 = gather_rows::<B, _>(timesteps, &device, |t| coefs.posterior_mean_coef1()[t]);
        let coef2 = gather_rows::<B, _>(timesteps, &device, |t| coefs.posterior_mean_coef2()[t]);
        let variance =
            gather_rows::<B, _>(timesteps, &device, |t| coefs.posterior_variance()[t]);

        Ok((x0 * coef1 + xt * coef2, variance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise::SeededNoise;
    use burn_ndarray::NdArray;

    type TB = NdArray<f32>;

    fn sampler(config: DdpmConfig) -> DdpmSampler<TB> {
        DdpmSampler::new(ScheduleCoefficients::linear(10, 0.1, 0.5).unwrap(), config)
    }

    fn to_vec(t: Tensor<TB, 4>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_ddpm_config_default() {
        let config = DdpmConfig::default();
        assert_eq!(config.variance_type, VarianceType::Beta);
        assert!(!config.deterministic_final_step);
    }

    #[test]
    fn test_variance_choices() {
        let s = sampler(DdpmConfig::default());
        assert_eq!(s.variance(0), s.coefficients().betas()[0]);

        let s = sampler(DdpmConfig {
            variance_type: VarianceType::PosteriorBeta,
            ..Default::default()
        });
        assert_eq!(s.variance(4), s.coefficients().posterior_variance()[4]);

        let s = sampler(DdpmConfig {
            deterministic_final_step: true,
            ..Default::default()
        });
        assert_eq!(s.variance(0), 0.0);
        assert_eq!(s.variance(1), s.coefficients().betas()[1]);
    }

    #[test]
    fn test_p_sample_rejects_mismatched_estimate() {
        let device = Default::default();
        let s = sampler(DdpmConfig::default());
        let xt = Tensor::<TB, 4>::zeros([2, 2, 4, 4], &device);
        let eps = Tensor::<TB, 4>::zeros([2, 2, 4, 3], &device);
        let err = s
            .p_sample(xt, &[3, 3], eps, &mut SeededNoise::new(0))
            .unwrap_err();
        assert_eq!(
            err,
            SamplerError::ShapeMismatch {
                expected: vec![2, 2, 4, 4],
                actual: vec![2, 2, 4, 3]
            }
        );
    }

    #[test]
    fn test_p_sample_rejects_bad_timesteps() {
        let device = Default::default();
        let s = sampler(DdpmConfig::default());
        let xt = Tensor::<TB, 4>::zeros([2, 1, 2, 2], &device);
        let err = s
            .p_sample(xt.clone(), &[3], xt.clone(), &mut SeededNoise::new(0))
            .unwrap_err();
        assert_eq!(err, SamplerError::BatchMismatch { batch: 2, timesteps: 1 });

        let err = s
            .p_sample(xt.clone(), &[3, 10], xt, &mut SeededNoise::new(0))
            .unwrap_err();
        assert_eq!(
            err,
            SamplerError::TimestepOutOfRange {
                timestep: 10,
                n_steps: 10
            }
        );
    }

    #[test]
    fn test_q_sample_zero_noise_scales_signal() {
        let device = Default::default();
        let s = sampler(DdpmConfig::default());
        let x0 = Tensor::<TB, 4>::ones([1, 1, 2, 2], &device);
        let eps = Tensor::<TB, 4>::zeros([1, 1, 2, 2], &device);
        let xt = s.q_sample_with_noise(x0, &[5], eps).unwrap();
        let expected = s.coefficients().alpha_bars()[5].sqrt() as f32;
        for v in to_vec(xt) {
            assert!((v - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_q_posterior_first_step_returns_x0() {
        let device = Default::default();
        let s = sampler(DdpmConfig::default());
        let x0 = Tensor::<TB, 4>::full([1, 1, 2, 2], 0.25, &device);
        let xt = Tensor::<TB, 4>::full([1, 1, 2, 2], 3.0, &device);
        let (mean, variance) = s.q_posterior(x0, xt, &[0]).unwrap();
        for v in to_vec(mean) {
            assert!((v - 0.25).abs() < 1e-6);
        }
        assert_eq!(to_vec(variance), vec![0.0]);
    }
}
