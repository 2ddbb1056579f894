//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use acquisition_workflow::WorkflowError;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub retryable: bool,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Workflow(err) => match err {
                WorkflowError::PrecedingStageMissing { .. }
                | WorkflowError::DuplicateStage { .. }
                | WorkflowError::ConcurrentWriteConflict { .. }
                | WorkflowError::InvalidStageState { .. } => StatusCode::CONFLICT,
                WorkflowError::HashChainBroken { .. } => StatusCode::LOCKED,
                WorkflowError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
                WorkflowError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, retryable) = match &self {
            ApiError::Workflow(err) => (err.code(), err.is_retryable()),
            ApiError::BadRequest(_) => ("BAD_REQUEST", false),
        };

        if status.is_server_error() {
            tracing::warn!(error = %self, code, "Request failed");
        } else {
            tracing::debug!(error = %self, code, "Request rejected");
        }

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
            retryable,
        };

        (status, Json(body)).into_response()
    }
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use acquisition_workflow::Stage;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                WorkflowError::PrecedingStageMissing {
                    case_id: "SY-1".into(),
                    attempted: "declare award".into(),
                    requires: Stage::Measurement,
                },
                StatusCode::CONFLICT,
            ),
            (
                WorkflowError::DuplicateStage {
                    case_id: "SY-1".into(),
                    stage: Stage::Award,
                },
                StatusCode::CONFLICT,
            ),
            (
                WorkflowError::HashChainBroken {
                    case_id: "SY-1".into(),
                    block_id: None,
                },
                StatusCode::LOCKED,
            ),
            (WorkflowError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (
                WorkflowError::StoreUnavailable("timeout".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_response_status() {
        let response = ApiError::from(WorkflowError::StoreUnavailable("down".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
