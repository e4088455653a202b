use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::ml::features::FeatureError;
use crate::ml::forest::ForestError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Prediction or metrics requested before any successful training
    #[error("Model not trained: train the model before requesting predictions")]
    ModelNotTrained,

    /// Training attempted with too few usable samples
    #[error("Insufficient samples: {}", .0.message)]
    InsufficientSamples(InsufficientData),

    /// A line's records could not be turned into features
    #[error("Feature extraction error: {0}")]
    FeatureExtraction(#[from] FeatureError),

    /// Unexpected fault while fitting or evaluating a model
    #[error("Training failed: {0}")]
    Training(String),
}

impl AppError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::ModelNotTrained => StatusCode::CONFLICT,
            AppError::InsufficientSamples(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::FeatureExtraction(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Training(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &str {
        match self {
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::ModelNotTrained => "MODEL_NOT_TRAINED",
            AppError::InsufficientSamples(_) => "INSUFFICIENT_SAMPLES",
            AppError::FeatureExtraction(_) => "FEATURE_EXTRACTION_ERROR",
            AppError::Training(_) => "TRAINING_FAILED",
        }
    }
}

/// Structured "not enough data yet" payload shared by training and metrics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InsufficientData {
    /// Short error title
    pub error: String,

    /// Human-readable explanation
    pub message: String,

    /// Number of usable samples at the time of the attempt
    pub current_samples: usize,
}

impl InsufficientData {
    /// Training was attempted and rejected
    pub fn below_minimum(current_samples: usize, minimum: usize) -> Self {
        Self {
            error: "Not enough data for training".to_string(),
            message: format!(
                "Need at least {} transmission lines with complete records to train the model",
                minimum
            ),
            current_samples,
        }
    }

    /// Training never ran or never succeeded
    pub fn not_trained(current_samples: usize) -> Self {
        Self {
            error: "Model not trained".to_string(),
            message: "No trained model is available yet. Train the model via POST /api/ai/train-model"
                .to_string(),
            current_samples,
        }
    }
}

/// Convert AppError to HTTP response
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code().to_string();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(
                error_code = %error_code,
                status_code = status.as_u16(),
                message = %message,
                "Request error"
            );
        } else {
            tracing::warn!(
                error_code = %error_code,
                status_code = status.as_u16(),
                message = %message,
                "Request rejected"
            );
        }

        let body = match self {
            AppError::InsufficientSamples(info) => Json(json!({
                "error": info.error,
                "message": info.message,
                "current_samples": info.current_samples,
                "status": status.as_u16(),
            })),
            _ => Json(json!({
                "error": error_code,
                "message": message,
                "status": status.as_u16(),
            })),
        };

        (status, body).into_response()
    }
}

/// Conversion from serde_json::Error
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from bincode::Error
impl From<bincode::Error> for AppError {
    fn from(err: bincode::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Conversion from validator::ValidationErrors
impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Conversion from config::ConfigError
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Conversion from forest fitting/inference errors
impl From<ForestError> for AppError {
    fn from(err: ForestError) -> Self {
        match err {
            ForestError::InvalidFeature { .. } | ForestError::DimensionMismatch { .. } => {
                AppError::Validation(err.to_string())
            }
            _ => AppError::Training(err.to_string()),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::NotFound("test".to_string()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Validation("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::ModelNotTrained.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::InsufficientSamples(InsufficientData::below_minimum(3, 10)).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::NotFound("test".to_string()).error_code(),
            "NOT_FOUND"
        );
        assert_eq!(AppError::ModelNotTrained.error_code(), "MODEL_NOT_TRAINED");
        assert_eq!(
            AppError::Training("boom".to_string()).error_code(),
            "TRAINING_FAILED"
        );
    }

    #[test]
    fn test_insufficient_data_messages() {
        let rejected = InsufficientData::below_minimum(4, 10);
        assert_eq!(rejected.current_samples, 4);
        assert!(rejected.message.contains("10"));

        let untrained = InsufficientData::not_trained(0);
        assert_eq!(untrained.error, "Model not trained");
        assert_eq!(untrained.current_samples, 0);
    }

    #[test]
    fn test_forest_error_mapping() {
        let err: AppError = ForestError::InvalidFeature { index: 1, value: f64::NAN }.into();
        assert!(matches!(err, AppError::Validation(_)));

        let err: AppError = ForestError::EmptyDataset.into();
        assert!(matches!(err, AppError::Training(_)));
    }
}
