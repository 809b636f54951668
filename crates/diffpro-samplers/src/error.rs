//! Errors raised by schedule construction and sampling steps

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplerError {
    #[error("Empty beta schedule: at least one diffusion step is required")]
    EmptySchedule,

    #[error("Beta schedule has {actual} entries, expected {expected}")]
    ScheduleLength { expected: usize, actual: usize },

    #[error("Beta at step {index} is {value}, must lie strictly between 0 and 1")]
    BetaOutOfRange { index: usize, value: f64 },

    #[error("Timestep {timestep} is outside the schedule of {n_steps} steps")]
    TimestepOutOfRange { timestep: usize, n_steps: usize },

    #[error("Got {timesteps} timesteps for a batch of {batch}")]
    BatchMismatch { batch: usize, timesteps: usize },

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

impl SamplerError {
    /// Whether the error comes from a malformed schedule or schedule lookup
    pub fn is_schedule_error(&self) -> bool {
        matches!(
            self,
            Self::EmptySchedule | Self::ScheduleLength { .. } | Self::BetaOutOfRange { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SamplerError::BetaOutOfRange {
            index: 3,
            value: 1.5,
        };
        assert!(err.to_string().contains("step 3"));
        assert!(err.is_schedule_error());
        assert!(!SamplerError::BatchMismatch {
            batch: 2,
            timesteps: 1
        }
        .is_schedule_error());
    }
}
