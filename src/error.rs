//! Error types shared across the pipeline runtime.

use std::path::PathBuf;

/// Top-level error type for pipeline operations.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("output field '{field}' is already populated and rewrite is disabled")]
    DuplicateOutput { field: String },

    #[error("source not found: {}", path.display())]
    MissingSource { path: PathBuf },

    #[error("capture error: {message}")]
    Capture { message: String },

    #[error("field '{field}' expects {expected}")]
    FieldType {
        field: String,
        expected: &'static str,
    },

    #[error("invalid object: {message}")]
    InvalidObject { message: String },

    #[error("stage '{stage}' returned {actual} records for a batch of {expected}")]
    BatchShape {
        stage: String,
        expected: usize,
        actual: usize,
    },

    #[error("predictor error: {message}")]
    Predictor { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

/// Result type alias using PipelineError.
pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn missing(path: impl Into<PathBuf>) -> Self {
        Self::MissingSource { path: path.into() }
    }

    pub fn invalid_object(msg: impl Into<String>) -> Self {
        Self::InvalidObject {
            message: msg.into(),
        }
    }

    pub fn predictor(msg: impl Into<String>) -> Self {
        Self::Predictor {
            message: msg.into(),
        }
    }
}
