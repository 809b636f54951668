//! Errors raised by inference sessions

use diffpro_samplers::SamplerError;
use thiserror::Error;

/// Broad classification of a [`DiffusionError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid parameters, schedule, step counts or missing collaborators
    Configuration,
    /// A tensor did not have the shape the step required
    ShapeMismatch,
    /// The noise predictor, conditioning source or export sink failed
    ExternalCollaborator,
    /// The sample diverged to NaN or Inf
    Numerical,
}

#[derive(Error, Debug)]
pub enum DiffusionError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Sampler(#[from] SamplerError),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("{context}: {source:#}")]
    External {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Non-finite values in {name} at timestep {timestep}: {nan} NaN, {inf} Inf")]
    NonFinite {
        name: String,
        timestep: usize,
        nan: usize,
        inf: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tensor data error: {0}")]
    Data(String),
}

impl DiffusionError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn external(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::External {
            context: context.into(),
            source,
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) | Self::Json(_) => ErrorKind::Configuration,
            Self::Sampler(SamplerError::ShapeMismatch { .. }) => ErrorKind::ShapeMismatch,
            Self::Sampler(_) => ErrorKind::Configuration,
            Self::ShapeMismatch { .. } => ErrorKind::ShapeMismatch,
            Self::External { .. } | Self::Io(_) => ErrorKind::ExternalCollaborator,
            Self::NonFinite { .. } | Self::Data(_) => ErrorKind::Numerical,
        }
    }
}

pub type Result<T, E = DiffusionError> = std::result::Result<T, E>;
