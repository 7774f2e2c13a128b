use axum::{http::StatusCode, response::IntoResponse, Json};

use super::types::ApiError;

#[derive(Debug)]
pub(crate) enum ApiFailure {
    InvalidRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    RateLimited,
    Internal,
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::InvalidRequest => (
                StatusCode::BAD_REQUEST,
                Json(ApiError {
                    error: "invalid_request",
                }),
            )
                .into_response(),
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ApiError {
                    error: "authentication_required",
                }),
            )
                .into_response(),
            Self::Forbidden => (
                StatusCode::FORBIDDEN,
                Json(ApiError {
                    error: "insufficient_access",
                }),
            )
                .into_response(),
            Self::NotFound => (
                StatusCode::NOT_FOUND,
                Json(ApiError { error: "not_found" }),
            )
                .into_response(),
            Self::Conflict => (
                StatusCode::CONFLICT,
                Json(ApiError { error: "conflict" }),
            )
                .into_response(),
            Self::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ApiError {
                    error: "rate_limited",
                }),
            )
                .into_response(),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError {
                    error: "internal_error",
                }),
            )
                .into_response(),
        }
    }
}

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(true)
        .with_span_list(true)
        .init();
}
