use crate::engine::EngineError;
use crate::payload::PayloadError;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Request-level failure, rendered as `{"status": "error", "message": ...}`.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Bad input or a failed analysis.
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unavailable(String),
    #[error("{0}")]
    Timeout(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PayloadError> for ApiError {
    fn from(e: PayloadError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::ChannelClosed | EngineError::Spawn(_) => {
                ApiError::Unavailable(e.to_string())
            }
            EngineError::Timeout(_) => ApiError::Timeout(e.to_string()),
            EngineError::Analyzer(_)
            | EngineError::Store(_)
            | EngineError::CandidateFailed { .. } => {
                ApiError::BadRequest(e.to_string())
            }
        }
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
        (status, Json(json!({ "status": "error", "message": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::AnalyzerError;
    use std::time::Duration;

    #[test]
    fn test_engine_error_status_mapping() {
        let cases = [
            (EngineError::Analyzer(AnalyzerError::NoFaceDetected), StatusCode::BAD_REQUEST),
            (
                EngineError::CandidateFailed {
                    student_id: "7".into(),
                    source: AnalyzerError::NoFaceDetected,
                },
                StatusCode::BAD_REQUEST,
            ),
            (EngineError::ChannelClosed, StatusCode::SERVICE_UNAVAILABLE),
            (EngineError::Timeout(Duration::from_secs(1)), StatusCode::GATEWAY_TIMEOUT),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status(), expected);
        }
    }

    #[test]
    fn test_message_is_raw_error_text() {
        let err = ApiError::from(EngineError::Analyzer(AnalyzerError::NoFaceDetected));
        assert_eq!(
            err.to_string(),
            "face could not be detected; confirm that the picture is a face photo"
        );
    }
}
