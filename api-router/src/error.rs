use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream provider error: {0}")]
    BadGateway(String),

    #[error("Gone: {0}")]
    Gone(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::UpstreamPermanent(msg)
            | AppError::UpstreamTransient(msg)
            | AppError::PartialFailure(msg) => Self::BadGateway(msg),
            other => {
                tracing::error!("Internal error: {:?}", other);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::InternalError(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::ValidationError(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::NotFound(message) => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::BadGateway(message) => (
                StatusCode::BAD_GATEWAY,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
            Self::Gone(message) => (
                StatusCode::GONE,
                ErrorResponse {
                    error: message,
                    status: "error".to_string(),
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_status_code<T: IntoResponse>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn maps_app_errors_onto_api_errors() {
        let not_found = AppError::NotFound("repository 9".to_string());
        assert!(matches!(
            ApiError::from(not_found),
            ApiError::NotFound(msg) if msg == "repository 9"
        ));

        let validation = AppError::Validation("limit must be positive".to_string());
        assert!(matches!(
            ApiError::from(validation),
            ApiError::ValidationError(_)
        ));

        let upstream = AppError::UpstreamPermanent("HTTP 401".to_string());
        assert!(matches!(ApiError::from(upstream), ApiError::BadGateway(_)));

        let internal = AppError::Io(std::io::Error::other("disk full"));
        assert!(matches!(
            ApiError::from(internal),
            ApiError::InternalError(_)
        ));
    }

    #[test]
    fn status_codes_follow_the_error_kind() {
        assert_status_code(
            ApiError::InternalError("boom".into()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(
            ApiError::ValidationError("bad".into()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(ApiError::NotFound("missing".into()), StatusCode::NOT_FOUND);
        assert_status_code(
            ApiError::BadGateway("provider down".into()),
            StatusCode::BAD_GATEWAY,
        );
        assert_status_code(
            ApiError::Gone("deprecated".into()),
            StatusCode::GONE,
        );
    }

    #[test]
    fn internal_errors_do_not_leak_details() {
        let api_error = ApiError::InternalError("db password incorrect".to_string());
        assert_eq!(api_error.to_string(), "Internal server error");
    }
}
