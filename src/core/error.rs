//! Error types for the classification pipeline

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhowError {
    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Cache I/O error: {0}")]
    CacheIo(String),

    #[error("Training failed: {0}")]
    Training(String),

    #[error("Configuration mismatch: expected fingerprint {expected}, found {found}")]
    ConfigurationMismatch { expected: String, found: String },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

impl PhowError {
    /// Whether the pipeline may continue by recomputing or degrading to
    /// in-memory operation after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PhowError::CacheIo(_) | PhowError::ConfigurationMismatch { .. }
        )
    }
}

impl From<bincode::Error> for PhowError {
    fn from(e: bincode::Error) -> Self {
        PhowError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for PhowError {
    fn from(e: serde_json::Error) -> Self {
        PhowError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PhowError>;
