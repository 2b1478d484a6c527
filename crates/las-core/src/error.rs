//! Error types for LAS.

use thiserror::Error;

/// Main error type for LAS operations.
#[derive(Error, Debug)]
pub enum LasError {
    /// Audio ingestion and feature extraction errors.
    #[error("Audio error: {0}")]
    Audio(String),

    /// Invalid model or feature configuration.
    #[error("Config error: {0}")]
    Config(String),

    /// Tensor shape does not satisfy a layer precondition.
    #[error("Shape error: {context}: expected {expected}, got {actual}")]
    Shape {
        context: &'static str,
        expected: String,
        actual: String,
    },

    /// Transcript decoding and normalization errors.
    #[error("Text error: {0}")]
    Text(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor errors.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LasError {
    pub fn shape(
        context: &'static str,
        expected: impl std::fmt::Display,
        actual: impl std::fmt::Display,
    ) -> Self {
        Self::Shape {
            context,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Result type alias for LAS operations.
pub type LasResult<T> = Result<T, LasError>;
