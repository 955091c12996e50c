//! Maps semantic errors to HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lookout_core::{Error, Kind};
use serde_json::json;

/// Handler-level error wrapper implementing [`IntoResponse`].
///
/// Response bodies are `{ "code": <kind-name>, "message": <human text> }`.
/// Internal and unknown errors are logged in full but surfaced with a
/// generic message; cause chains never leak to clients.
#[derive(Debug)]
pub struct ApiError(pub Error);

/// Convenience type alias for handler return values.
pub type ApiResult<T> = Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let kind = err.kind();

        let (status, fallback) = match kind {
            Kind::NotFound => (StatusCode::NOT_FOUND, "resource not found"),
            Kind::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Kind::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            Kind::BadRequest => (StatusCode::BAD_REQUEST, "bad request"),
            Kind::Conflict => (StatusCode::CONFLICT, "conflict"),
            Kind::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate limited"),
            Kind::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            Kind::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "service unavailable"),
            Kind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error"),
        };

        let message = if kind == Kind::Internal {
            tracing::error!(error = %err, "error handling request");
            fallback.to_string()
        } else {
            err.message().unwrap_or(fallback).to_string()
        };

        let body = json!({
            "code": kind.as_str(),
            "message": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
