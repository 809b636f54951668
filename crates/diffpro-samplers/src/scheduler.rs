//! Noise schedules for DDPM sampling
//!
//! Every coefficient the forward and reverse processes need is derived once
//! from the β sequence and kept on the host as `f64`. Samplers gather the
//! per-row values they need and upload them as broadcastable tensors.

use burn::prelude::*;

use crate::error::SamplerError;

// ============================================================================
// Beta Schedules
// ============================================================================

/// How β ranges from its first to its last value over the diffusion steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BetaSchedule {
    /// Linear interpolation between `beta_start` and `beta_end`
    #[default]
    Linear,
    /// Linear interpolation of √β, squared
    ScaledLinear,
    /// Cosine schedule on ᾱ (Nichol & Dhariwal), β clipped to 0.999
    Cosine,
}

impl BetaSchedule {
    /// Parses a schedule name as written in parameter files
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "linear" => Some(Self::Linear),
            "scaled_linear" => Some(Self::ScaledLinear),
            "cosine" | "squaredcos_cap_v2" => Some(Self::Cosine),
            _ => None,
        }
    }

    /// Name used in parameter files
    pub fn name(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::ScaledLinear => "scaled_linear",
            Self::Cosine => "cosine",
        }
    }
}

/// Beta schedule configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    /// Total number of diffusion steps (T)
    pub n_steps: usize,
    /// First β value (ignored by the cosine schedule)
    pub beta_start: f64,
    /// Last β value (ignored by the cosine schedule)
    pub beta_end: f64,
    /// Spacing of β between start and end
    pub schedule: BetaSchedule,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            n_steps: 1000,
            beta_start: 1e-4,
            beta_end: 0.02,
            schedule: BetaSchedule::Linear,
        }
    }
}

impl ScheduleConfig {
    /// Generate the β sequence described by this config
    pub fn betas(&self) -> Vec<f64> {
        let n = self.n_steps;
        let denom = n.saturating_sub(1).max(1) as f64;
        match self.schedule {
            BetaSchedule::Linear => (0..n)
                .map(|i| {
                    let t = i as f64 / denom;
                    self.beta_start + t * (self.beta_end - self.beta_start)
                })
                .collect(),
            BetaSchedule::ScaledLinear => {
                let start = self.beta_start.sqrt();
                let end = self.beta_end.sqrt();
                (0..n)
                    .map(|i| {
                        let t = i as f64 / denom;
                        let b = start + t * (end - start);
                        b * b
                    })
                    .collect()
            }
            BetaSchedule::Cosine => {
                let s = 0.008;
                let alpha_bar = |i: usize| {
                    let t = i as f64 / n as f64;
                    ((t + s) / (1.0 + s) * std::f64::consts::FRAC_PI_2)
                        .cos()
                        .powi(2)
                };
                (0..n)
                    .map(|i| (1.0 - alpha_bar(i + 1) / alpha_bar(i)).min(0.999))
                    .collect()
            }
        }
    }
}

// ============================================================================
// Schedule Coefficients
// ============================================================================

/// Precomputed per-timestep coefficients of the forward and reverse processes
///
/// All sequences have the same length `T`. Values are immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleCoefficients {
    betas: Vec<f64>,
    alphas: Vec<f64>,
    alpha_bars: Vec<f64>,
    alpha_bars_prev: Vec<f64>,
    posterior_variance: Vec<f64>,
    posterior_mean_coef1: Vec<f64>,
    posterior_mean_coef2: Vec<f64>,
    sigma2: Vec<f64>,
}

impl ScheduleCoefficients {
    /// Derive all coefficients from a β sequence
    ///
    /// Every β must lie strictly inside (0, 1).
    pub fn new(betas: Vec<f64>) -> Result<Self, SamplerError> {
        if betas.is_empty() {
            return Err(SamplerError::EmptySchedule);
        }
        if let Some((index, &value)) = betas
            .iter()
            .enumerate()
            .find(|(_, b)| !(**b > 0.0 && **b < 1.0))
        {
            return Err(SamplerError::BetaOutOfRange { index, value });
        }

        let alphas: Vec<f64> = betas.iter().map(|b| 1.0 - b).collect();

        // Cumulative product
        let mut alpha_bars = Vec::with_capacity(alphas.len());
        let mut cumprod = 1.0f64;
        for alpha in &alphas {
            cumprod *= alpha;
            alpha_bars.push(cumprod);
        }

        let alpha_bars_prev: Vec<f64> = std::iter::once(1.0)
            .chain(alpha_bars[..alpha_bars.len() - 1].iter().copied())
            .collect();

        let n = betas.len();
        let mut posterior_variance = Vec::with_capacity(n);
        let mut posterior_mean_coef1 = Vec::with_capacity(n);
        let mut posterior_mean_coef2 = Vec::with_capacity(n);
        for t in 0..n {
            let one_minus_bar = 1.0 - alpha_bars[t];
            let one_minus_prev = 1.0 - alpha_bars_prev[t];
            posterior_variance.push(betas[t] * one_minus_prev / one_minus_bar);
            posterior_mean_coef1.push(betas[t] * alpha_bars_prev[t].sqrt() / one_minus_bar);
            posterior_mean_coef2.push(alphas[t].sqrt() * one_minus_prev / one_minus_bar);
        }

        // Fixed variance choice: σ²_t = β_t
        let sigma2 = betas.clone();

        Ok(Self {
            betas,
            alphas,
            alpha_bars,
            alpha_bars_prev,
            posterior_variance,
            posterior_mean_coef1,
            posterior_mean_coef2,
            sigma2,
        })
    }

    /// Derive coefficients from a named schedule
    pub fn from_config(config: &ScheduleConfig) -> Result<Self, SamplerError> {
        let betas = config.betas();
        if betas.len() != config.n_steps {
            return Err(SamplerError::ScheduleLength {
                expected: config.n_steps,
                actual: betas.len(),
            });
        }
        Self::new(betas)
    }

    /// Derive coefficients from a β sequence that must have exactly `n_steps` entries
    pub fn with_len(betas: Vec<f64>, n_steps: usize) -> Result<Self, SamplerError> {
        if betas.len() != n_steps {
            return Err(SamplerError::ScheduleLength {
                expected: n_steps,
                actual: betas.len(),
            });
        }
        Self::new(betas)
    }

    /// Linear schedule used by the DDPM paper
    pub fn linear(n_steps: usize, beta_start: f64, beta_end: f64) -> Result<Self, SamplerError> {
        Self::from_config(&ScheduleConfig {
            n_steps,
            beta_start,
            beta_end,
            schedule: BetaSchedule::Linear,
        })
    }

    /// Number of diffusion steps (T)
    pub fn len(&self) -> usize {
        self.betas.len()
    }

    /// Always false: construction rejects empty schedules
    pub fn is_empty(&self) -> bool {
        self.betas.is_empty()
    }

    /// β_t
    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    /// α_t = 1 − β_t
    pub fn alphas(&self) -> &[f64] {
        &self.alphas
    }

    /// ᾱ_t = ∏_{s≤t} α_s
    pub fn alpha_bars(&self) -> &[f64] {
        &self.alpha_bars
    }

    /// ᾱ_{t−1}, with ᾱ_{−1} = 1
    pub fn alpha_bars_prev(&self) -> &[f64] {
        &self.alpha_bars_prev
    }

    /// β̃_t = β_t (1 − ᾱ_{t−1}) / (1 − ᾱ_t)
    pub fn posterior_variance(&self) -> &[f64] {
        &self.posterior_variance
    }

    /// β_t √ᾱ_{t−1} / (1 − ᾱ_t), the x0 weight of the posterior mean
    pub fn posterior_mean_coef1(&self) -> &[f64] {
        &self.posterior_mean_coef1
    }

    /// √α_t (1 − ᾱ_{t−1}) / (1 − ᾱ_t), the xt weight of the posterior mean
    pub fn posterior_mean_coef2(&self) -> &[f64] {
        &self.posterior_mean_coef2
    }

    /// σ²_t used by the reverse step
    pub fn sigma2(&self) -> &[f64] {
        &self.sigma2
    }

    /// Check that a timestep indexes into the schedule
    pub fn check_timestep(&self, timestep: usize) -> Result<(), SamplerError> {
        if timestep >= self.len() {
            return Err(SamplerError::TimestepOutOfRange {
                timestep,
                n_steps: self.len(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Gather Utilities (shared by forward and reverse steps)
// ============================================================================

/// Gather one coefficient per batch row and shape it as `[batch, 1, 1, 1]`
///
/// `f` maps the timestep's schedule index to the value for that row.
pub fn gather_rows<B: Backend, F>(
    timesteps: &[usize],
    device: &B::Device,
    f: F,
) -> Tensor<B, 4>
where
    F: Fn(usize) -> f64,
{
    let values: Vec<f32> = timesteps.iter().map(|&t| f(t) as f32).collect();
    let batch = values.len();
    Tensor::<B, 1>::from_data(TensorData::new(values, [batch]), device).reshape([batch, 1, 1, 1])
}

/// Timesteps visited by the reverse process, from `init_step - 1` down to 0
pub fn reverse_timesteps(init_step: usize) -> Vec<usize> {
    (0..init_step).rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_timesteps() {
        let steps = reverse_timesteps(1000);
        assert_eq!(steps.len(), 1000);
        assert_eq!(steps[0], 999);
        assert_eq!(steps[999], 0);
        assert!(reverse_timesteps(0).is_empty());
    }

    #[test]
    fn test_linear_endpoints() {
        let betas = ScheduleConfig::default().betas();
        assert_eq!(betas.len(), 1000);
        assert!((betas[0] - 1e-4).abs() < 1e-12);
        assert!((betas[999] - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_single_step_schedule() {
        let coefs = ScheduleCoefficients::linear(1, 0.5, 0.9).unwrap();
        assert_eq!(coefs.len(), 1);
        assert_eq!(coefs.betas()[0], 0.5);
        assert_eq!(coefs.alpha_bars_prev()[0], 1.0);
        assert_eq!(coefs.posterior_variance()[0], 0.0);
    }

    #[test]
    fn test_first_step_posterior() {
        let coefs = ScheduleCoefficients::linear(10, 0.1, 0.2).unwrap();
        // ᾱ_prev_0 = 1 so the posterior collapses onto x0
        assert_eq!(coefs.posterior_variance()[0], 0.0);
        assert!((coefs.posterior_mean_coef1()[0] - 1.0).abs() < 1e-12);
        assert_eq!(coefs.posterior_mean_coef2()[0], 0.0);
    }

    #[test]
    fn test_rejects_out_of_range_beta() {
        let err = ScheduleCoefficients::new(vec![0.1, 1.0, 0.2]).unwrap_err();
        assert_eq!(
            err,
            SamplerError::BetaOutOfRange {
                index: 1,
                value: 1.0
            }
        );
        let err = ScheduleCoefficients::new(vec![0.0]).unwrap_err();
        assert!(matches!(err, SamplerError::BetaOutOfRange { index: 0, .. }));
        let err = ScheduleCoefficients::new(vec![f64::NAN]).unwrap_err();
        assert!(matches!(err, SamplerError::BetaOutOfRange { index: 0, .. }));
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = ScheduleCoefficients::with_len(vec![0.1; 5], 6).unwrap_err();
        assert_eq!(
            err,
            SamplerError::ScheduleLength {
                expected: 6,
                actual: 5
            }
        );
        assert_eq!(
            ScheduleCoefficients::new(Vec::new()).unwrap_err(),
            SamplerError::EmptySchedule
        );
    }

    #[test]
    fn test_check_timestep() {
        let coefs = ScheduleCoefficients::linear(4, 0.1, 0.2).unwrap();
        assert!(coefs.check_timestep(3).is_ok());
        assert_eq!(
            coefs.check_timestep(4).unwrap_err(),
            SamplerError::TimestepOutOfRange {
                timestep: 4,
                n_steps: 4
            }
        );
    }

    #[test]
    fn test_schedule_names() {
        for schedule in [
            BetaSchedule::Linear,
            BetaSchedule::ScaledLinear,
            BetaSchedule::Cosine,
        ] {
            assert_eq!(BetaSchedule::from_name(schedule.name()), Some(schedule));
        }
        assert_eq!(BetaSchedule::from_name("quadratic"), None);
    }

    #[test]
    fn test_cosine_betas_valid() {
        let config = ScheduleConfig {
            schedule: BetaSchedule::Cosine,
            ..Default::default()
        };
        let coefs = ScheduleCoefficients::from_config(&config).unwrap();
        assert_eq!(coefs.len(), 1000);
        assert!(coefs.betas().iter().all(|&b| b > 0.0 && b <= 0.999));
    }
}
