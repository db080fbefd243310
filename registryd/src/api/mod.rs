pub mod routes;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shared::messages::{ErrorBody, ErrorCode};

use crate::error::RegistryError;

/// Registry error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub RegistryError);

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        Self(err)
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound | ErrorCode::VersionNotFound => StatusCode::NOT_FOUND,
        ErrorCode::AlreadyExists | ErrorCode::HasDependents => StatusCode::CONFLICT,
        ErrorCode::QuotaExceeded => StatusCode::FORBIDDEN,
        ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
        ErrorCode::Canceled => StatusCode::REQUEST_TIMEOUT,
        ErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let code = err.code();
        if err.is_user_error() {
            tracing::debug!("Request rejected: {}", err);
        } else {
            tracing::error!("Request failed: {}", err);
        }

        let detail = std::error::Error::source(&err)
            .map(|source| source.to_string())
            .unwrap_or_default();
        let body = ErrorBody {
            error_code: code,
            error_message: err.to_string(),
            detail,
        };
        (status_for(code), Json(body)).into_response()
    }
}
