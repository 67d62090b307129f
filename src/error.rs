//! Error types for rust_dea

use thiserror::Error;

/// Main error type for differential expression runs
///
/// The first four variants are the pipeline taxonomy surfaced to callers; a run that
/// fails with any of them produces no artifact.
#[derive(Error, Debug)]
pub enum DeaError {
    #[error("Parse error: {reason}")]
    Parse { reason: String },

    #[error("Empty dataset: {reason}")]
    EmptyDataset { reason: String },

    #[error("Model fit failed: {reason}")]
    ModelFit { reason: String },

    #[error("Ambiguous contrast: design factor '{factor}' has levels {levels:?}; specify a numerator and denominator")]
    AmbiguousContrast { factor: String, levels: Vec<String> },

    #[error("Invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    #[error("Rendering failed: {reason}")]
    Render { reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

impl DeaError {
    pub(crate) fn parse(reason: impl Into<String>) -> Self {
        DeaError::Parse { reason: reason.into() }
    }

    pub(crate) fn model_fit(reason: impl Into<String>) -> Self {
        DeaError::ModelFit { reason: reason.into() }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        DeaError::InvalidParameter { reason: reason.into() }
    }
}

/// Result type alias for rust_dea operations
pub type Result<T> = std::result::Result<T, DeaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_contrast_message_lists_levels() {
        let err = DeaError::AmbiguousContrast {
            factor: "condition".to_string(),
            levels: vec!["A".to_string(), "B".to_string(), "C".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("condition"));
        assert!(msg.contains("\"C\""));
    }

    #[test]
    fn test_csv_error_converts() {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader("a,b\n1,2,3\n".as_bytes());
        let err: DeaError = reader
            .records()
            .next()
            .unwrap()
            .unwrap_err()
            .into();
        assert!(matches!(err, DeaError::Csv(_)));
    }
}
