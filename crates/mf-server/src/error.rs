//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>`; the `?` operator lifts any
//! [`mf_core::Error`] into an [`AppError`], which renders as JSON with the
//! status taken from [`mf_core::Error::http_status`] and the id of the
//! request that failed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::middleware::request_id::current_request_id;

/// Wrapper so we can implement `IntoResponse` for an external type.
#[derive(Debug)]
pub struct AppError {
    inner: mf_core::Error,
}

impl AppError {
    pub fn new(inner: mf_core::Error) -> Self {
        Self { inner }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.inner.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<mf_core::Error> for AppError {
    fn from(e: mf_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        } else {
            tracing::debug!(status = %status, error = %self.inner, "Request rejected");
        }

        let body = json!({
            "error": self.inner.to_string(),
            "code": self.inner.code(),
            "request_id": current_request_id(),
        });

        (status, axum::Json(body)).into_response()
    }
}
