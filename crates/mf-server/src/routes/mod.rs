//! Route handlers for the HTTP API.

pub mod admin;
pub mod download;
pub mod files;
pub mod health;
pub mod info;
pub mod progress;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use mf_core::JobId;

use crate::error::AppError;

/// Header carrying the download (job) id.
pub static X_DOWNLOAD_ID: HeaderName = HeaderName::from_static("x-download-id");

/// Parse a download id from a path or query value. Malformed ids cannot name
/// any job, so they are reported as not found.
pub(crate) fn parse_download_id(raw: &str) -> Result<JobId, AppError> {
    raw.parse::<JobId>()
        .map_err(|_| mf_core::Error::not_found("download", raw).into())
}

/// `Content-Disposition: attachment` with an ASCII fallback name and the
/// UTF-8 name in `filename*`.
pub(crate) fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(filename)
    )
}

/// Headers shared by every file response.
pub(crate) fn attachment_headers(filename: &str, content_type: &str, length: Option<u64>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(v) = HeaderValue::from_str(content_type) {
        headers.insert(header::CONTENT_TYPE, v);
    }
    if let Ok(v) = HeaderValue::from_str(&content_disposition(filename)) {
        headers.insert(header::CONTENT_DISPOSITION, v);
    }
    if let Some(len) = length {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    }
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, no-cache, no-store, must-revalidate"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers
}

pub(crate) fn download_id_header(headers: &mut HeaderMap, id: JobId) {
    if let Ok(v) = HeaderValue::from_str(&id.to_string()) {
        headers.insert(X_DOWNLOAD_ID.clone(), v);
    }
}
