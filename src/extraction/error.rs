use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    ModelMissing,
    ImageLoadFailed,
    EnhancementFailed,
    ExtractionFailed,
    PersistenceFailed,
    RelocationFailed,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Model files missing: {0}")]
    ModelMissing(String),

    #[error("Failed to load image: {0}")]
    ImageLoadFailed(String),

    #[error("Image enhancement failed: {0}")]
    EnhancementFailed(String),

    #[error("Minutiae extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Failed to store case (artifacts left at {raw} and {result}): {message}")]
    PersistenceFailed {
        message: String,
        raw: String,
        result: String,
    },

    #[error("Failed to relocate artifact: {0}")]
    RelocationFailed(String),
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::ModelMissing(_) => FailureKind::ModelMissing,
            PipelineError::ImageLoadFailed(_) => FailureKind::ImageLoadFailed,
            PipelineError::EnhancementFailed(_) => FailureKind::EnhancementFailed,
            PipelineError::ExtractionFailed(_) => FailureKind::ExtractionFailed,
            PipelineError::PersistenceFailed { .. } => FailureKind::PersistenceFailed,
            PipelineError::RelocationFailed(_) => FailureKind::RelocationFailed,
        }
    }

    pub fn extraction(err: impl std::fmt::Display) -> Self {
        PipelineError::ExtractionFailed(format!("{:#}", err))
    }
}

/// Structured failure handed back to the interactive layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&PipelineError> for RunFailure {
    fn from(err: &PipelineError) -> Self {
        Self { kind: err.kind(), message: err.to_string() }
    }
}
