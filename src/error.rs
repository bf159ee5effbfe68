use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::classifier::ClassifierError;
use crate::preprocess::ImageProcessingError;
use crate::recommend::{PredictionError, ValidationError};

const DETECTION_FAILED: &str =
    "Failed to analyze plant disease. Please try again with a clear image of the affected plant.";
const RECOMMENDATION_FAILED: &str =
    "Failed to generate crop recommendation. Please check your input and try again.";

/// Every failure a handler can surface, rendered as `{ error, details }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Invalid input: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error(transparent)]
    ImageProcessing(#[from] ImageProcessingError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error(transparent)]
    Prediction(#[from] PredictionError),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Crop recommendation is disabled")]
    FeatureDisabled,
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::Validation(err.violations)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_)
            | ApiError::Validation(_)
            | ApiError::ImageProcessing(ImageProcessingError::Decode(_)) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::FeatureDisabled => StatusCode::NOT_IMPLEMENTED,
            ApiError::ImageProcessing(_) | ApiError::Classifier(_) | ApiError::Prediction(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn body(&self) -> ErrorBody {
        let (error, details) = match self {
            ApiError::BadRequest(message) => (message.clone(), None),
            ApiError::Validation(violations) => ("Invalid input".into(), Some(violations.join("; "))),
            ApiError::ImageProcessing(err) => (
                "The uploaded file could not be processed as an image".into(),
                Some(err.to_string()),
            ),
            ApiError::Classifier(ClassifierError::Configuration) => (
                "Plant disease detection is not configured".into(),
                Some(self.to_string()),
            ),
            ApiError::Classifier(err) => (DETECTION_FAILED.into(), Some(err.to_string())),
            ApiError::Prediction(err) => (RECOMMENDATION_FAILED.into(), Some(err.to_string())),
            ApiError::NotFound(_) => (self.to_string(), None),
            ApiError::FeatureDisabled => (
                self.to_string(),
                Some("No crop scoring command is configured".into()),
            ),
        };
        ErrorBody { error, details }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(self.body())).into_response()
    }
}
