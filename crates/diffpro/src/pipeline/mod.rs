//! Reverse-diffusion pipeline: sampling loop, session and diagnostics

mod sampling;
mod session;

pub use sampling::{SamplingLoop, SamplingOutcome};
pub use session::{output_stamp, InferenceSession, FINAL_LABEL, ORIGIN_LABEL};

use std::fmt;
use std::sync::Arc;

use burn::prelude::*;

use crate::error::{DiffusionError, Result};

/// Debug flags for pipeline and sampler diagnostics
#[derive(Debug, Clone, Copy, Default)]
pub struct DebugConfig {
    /// Log sample statistics for the first steps and every snapshot
    pub sampler: bool,
    /// Fail with [`DiffusionError::NonFinite`] on NaN/Inf values
    pub nan: bool,
}

// ============================================================================
// Snapshots
// ============================================================================

/// Which loop iterations emit a diagnostic snapshot
///
/// `i` is the 0-based iteration index, checked after that iteration's
/// transition.
#[derive(Clone)]
pub enum SnapshotPolicy {
    /// No snapshots
    Never,
    /// Every `every` iterations, and every `dense_every` from `dense_from` on
    Cadence {
        every: usize,
        dense_from: usize,
        dense_every: usize,
    },
    /// Arbitrary predicate on the iteration index
    Custom(Arc<dyn Fn(usize) -> bool + Send + Sync>),
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self::Cadence {
            every: 100,
            dense_from: 900,
            dense_every: 25,
        }
    }
}

impl SnapshotPolicy {
    pub fn custom(f: impl Fn(usize) -> bool + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn should_snapshot(&self, i: usize) -> bool {
        match self {
            Self::Never => false,
            Self::Cadence {
                every,
                dense_from,
                dense_every,
            } => {
                (*every > 0 && i % every == 0)
                    || (*dense_every > 0 && i >= *dense_from && i % dense_every == 0)
            }
            Self::Custom(f) => f(i),
        }
    }
}

impl fmt::Debug for SnapshotPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Never => write!(f, "Never"),
            Self::Cadence {
                every,
                dense_from,
                dense_every,
            } => f
                .debug_struct("Cadence")
                .field("every", every)
                .field("dense_from", dense_from)
                .field("dense_every", dense_every)
                .finish(),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Intermediate state emitted during the reverse chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiagnosticSnapshot {
    /// 0-based loop iteration
    pub step_index: usize,
    /// Timestep the iteration denoised from
    pub timestep: usize,
}

impl DiagnosticSnapshot {
    /// Export label, `x<timestep>`
    pub fn label(&self) -> String {
        format!("x{}", self.timestep)
    }
}

// ============================================================================
// Tensor Diagnostics
// ============================================================================

fn host_values<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .clone()
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| DiffusionError::Data(format!("{e:?}")))
}

/// Summary statistics for debug logging
pub fn tensor_stats<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> String {
    let floats = match host_values(tensor) {
        Ok(floats) => floats,
        Err(err) => return format!("unreadable ({err})"),
    };

    if floats.is_empty() {
        return "empty".to_string();
    }

    let nan_count = floats.iter().filter(|x| x.is_nan()).count();
    let inf_count = floats.iter().filter(|x| x.is_infinite()).count();
    let min = floats.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = floats.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let mean = floats.iter().sum::<f32>() / floats.len() as f32;
    let var = floats.iter().map(|x| (x - mean).powi(2)).sum::<f32>() / floats.len() as f32;
    let std = var.sqrt();

    if nan_count > 0 || inf_count > 0 {
        format!(
            "min={:.4}, max={:.4}, mean={:.4}, std={:.4} [NaN={}, Inf={}]",
            min, max, mean, std, nan_count, inf_count
        )
    } else {
        format!(
            "min={:.4}, max={:.4}, mean={:.4}, std={:.4}",
            min, max, mean, std
        )
    }
}

/// Check tensor for NaN/Inf values when `enabled`
#[inline]
pub(crate) fn check_finite_if<B: Backend, const D: usize>(
    tensor: &Tensor<B, D>,
    name: &str,
    timestep: usize,
    enabled: bool,
) -> Result<()> {
    if !enabled {
        return Ok(());
    }

    let floats = host_values(tensor)?;
    let nan = floats.iter().filter(|x| x.is_nan()).count();
    let inf = floats.iter().filter(|x| x.is_infinite()).count();

    if nan > 0 || inf > 0 {
        log::error!(
            "[NaN check failed] {} at t={}: {}",
            name,
            timestep,
            tensor_stats(tensor)
        );
        return Err(DiffusionError::NonFinite {
            name: name.to_string(),
            timestep,
            nan,
            inf,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TB = NdArray<f32>;

    #[test]
    fn test_default_cadence() {
        let policy = SnapshotPolicy::default();
        let hits: Vec<usize> = (0..1000).filter(|&i| policy.should_snapshot(i)).collect();
        let mut expected: Vec<usize> = (0..10).map(|k| k * 100).collect();
        expected.extend([925, 950, 975]);
        expected.sort();
        assert_eq!(hits, expected);
    }

    #[test]
    fn test_other_policies() {
        assert!(!SnapshotPolicy::Never.should_snapshot(0));
        let every_third = SnapshotPolicy::custom(|i| i % 3 == 0);
        assert!(every_third.should_snapshot(6));
        assert!(!every_third.should_snapshot(7));
        assert_eq!(format!("{every_third:?}"), "Custom(..)");

        let sparse = SnapshotPolicy::Cadence {
            every: 0,
            dense_from: 5,
            dense_every: 2,
        };
        assert!(!sparse.should_snapshot(0));
        assert!(sparse.should_snapshot(6));
    }

    #[test]
    fn test_snapshot_label() {
        let snap = DiagnosticSnapshot {
            step_index: 0,
            timestep: 999,
        };
        assert_eq!(snap.label(), "x999");
    }

    #[test]
    fn test_check_finite() {
        let device = Default::default();
        let ok = Tensor::<TB, 1>::from_data(TensorData::new(vec![1.0f32, -2.0], [2]), &device);
        assert!(check_finite_if(&ok, "ok", 3, true).is_ok());
        assert!(tensor_stats(&ok).starts_with("min=-2.0000"));

        let bad = Tensor::<TB, 1>::from_data(
            TensorData::new(vec![f32::NAN, f32::INFINITY, 0.0], [3]),
            &device,
        );
        assert!(check_finite_if(&bad, "bad", 3, false).is_ok());
        let err = check_finite_if(&bad, "bad", 3, true).unwrap_err();
        assert!(matches!(
            err,
            DiffusionError::NonFinite {
                timestep: 3,
                nan: 1,
                inf: 1,
                ..
            }
        ));
        assert_eq!(err.kind(), crate::ErrorKind::Numerical);
    }
}
