//! Shared HTTP plumbing for backend clients.
//!
//! Builds a configured [`reqwest::Client`] and maps transport failures and
//! HTTP statuses onto [`BackendError`] classes so callers can distinguish
//! "does not exist" from "not allowed" from "try again later".

use super::BackendError;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Longest backend body excerpt carried into an error message
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Build a [`reqwest::Client`] with a per-request timeout.
///
/// # Errors
///
/// Returns [`BackendError::Unavailable`] if the client cannot be constructed.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("quarry/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| BackendError::Unavailable(format!("failed to build HTTP client: {e}")))
}

/// Classify a transport-level failure
pub fn classify_transport(what: &str, err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout(format!("{what}: {err}"))
    } else if err.is_decode() {
        BackendError::Malformed(format!("{what}: {err}"))
    } else {
        BackendError::Unavailable(format!("{what}: {err}"))
    }
}

/// Classify a non-2xx HTTP status
pub fn classify_status(what: &str, status: u16, body: &str) -> BackendError {
    let excerpt: String = body.trim().chars().take(MAX_ERROR_BODY_CHARS).collect();
    let message = if excerpt.is_empty() {
        format!("{what}: HTTP {status}")
    } else {
        format!("{what}: HTTP {status}: {excerpt}")
    };

    match status {
        404 | 410 => BackendError::NotFound(message),
        401 | 403 => BackendError::Unauthorized(message),
        408 | 504 => BackendError::Timeout(message),
        429 | 500..=599 => BackendError::Unavailable(message),
        _ => BackendError::Rejected(message),
    }
}

/// Check the status and decode a JSON body
pub async fn read_json<T: DeserializeOwned>(
    what: &str,
    response: reqwest::Response,
) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(what, status.as_u16(), &body));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| classify_transport(what, e))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| BackendError::Malformed(format!("{what}: invalid JSON body: {e}")))
}

/// Join a base URL and a path without doubling slashes
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
