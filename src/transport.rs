//! Transport layer for envelope delivery.
//!
//! Posts one encrypted envelope to the upload endpoint and classifies every
//! outcome into the typed `UploadError` set, so controllers never inspect
//! message text. The legacy endpoint signals rejection inside a 2xx body via
//! `msg`/`msgg` literally set to `"error"`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::crypto::EncryptedEnvelope;
use crate::error::UploadError;

/// Default timeout for upload requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Abstract envelope delivery, so controllers can be exercised against a
/// scripted transport in tests.
#[async_trait]
pub trait EnvelopeTransport: Send + Sync {
    /// Deliver one envelope. Returns the decoded response body on success.
    /// Never mutates local state.
    async fn post(&self, url: &str, envelope: &EncryptedEnvelope) -> Result<Value, UploadError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Envelope delivery over HTTP(S) via reqwest.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| UploadError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EnvelopeTransport for HttpTransport {
    async fn post(&self, url: &str, envelope: &EncryptedEnvelope) -> Result<Value, UploadError> {
        debug!(url, "posting order envelope");
        let resp = self
            .client
            .post(url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        classify_response(status, &body)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into the typed taxonomy.
fn transport_error(url: &str, err: &reqwest::Error) -> UploadError {
    if err.is_connect() {
        return UploadError::Network(format!("cannot reach upload endpoint at {url}"));
    }
    if err.is_timeout() {
        return UploadError::Network(format!("connection to {url} timed out"));
    }
    if err.is_builder() {
        return UploadError::Configuration(format!("invalid upload endpoint URL: {url}"));
    }
    UploadError::Network(format!("network error communicating with {url}: {err}"))
}

/// Convert an HTTP status code into a user-facing message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "device credentials rejected".to_string(),
        403 => "device not authorized".to_string(),
        404 => "upload endpoint not found".to_string(),
        s if s >= 500 => format!("upload endpoint server error (HTTP {s})"),
        s => format!("unexpected response from upload endpoint (HTTP {s})"),
    }
}

/// Markers the server uses when it does not recognize the uploading device.
fn is_device_auth_rejection(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("device not registered")
        || lower.contains("unknown device")
        || lower.contains("device disabled")
        || lower.contains("device not authorized")
}

/// Whether the decoded body carries the legacy error sentinel.
fn has_error_sentinel(body: &Value) -> bool {
    ["msg", "msgg"]
        .iter()
        .any(|key| body.get(*key).and_then(Value::as_str) == Some("error"))
}

/// Human-readable reason attached to a sentinel rejection.
fn rejection_message(body: &Value) -> String {
    body.get("description")
        .or_else(|| body.get("title"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "upload rejected by server".to_string())
}

/// Classify one HTTP response into success or a typed error.
fn classify_response(status: StatusCode, body: &str) -> Result<Value, UploadError> {
    if !status.is_success() {
        // Prefer a server-supplied reason over the bare status line.
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|json| {
                json.get("description")
                    .or_else(|| json.get("title"))
                    .and_then(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_else(|| status_error(status));

        return Err(match status.as_u16() {
            401 | 403 => UploadError::Authorization(message),
            code => UploadError::Application(format!("{message} (HTTP {code})")),
        });
    }

    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    let json: Value = serde_json::from_str(body).map_err(|e| {
        UploadError::Application(format!("invalid JSON from upload endpoint: {e}"))
    })?;

    if has_error_sentinel(&json) {
        let message = rejection_message(&json);
        if is_device_auth_rejection(&message) {
            return Err(UploadError::Authorization(message));
        }
        return Err(UploadError::Application(message));
    }

    Ok(json)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_body_passes_through() {
        let out = classify_response(StatusCode::OK, r#"{"msg":"ok","id":7}"#).unwrap();
        assert_eq!(out["id"], 7);
    }

    #[test]
    fn test_empty_success_body_is_success() {
        assert_eq!(classify_response(StatusCode::OK, "").unwrap(), Value::Null);
    }

    #[test]
    fn test_sentinel_msg_is_application_error() {
        let err = classify_response(
            StatusCode::OK,
            r#"{"msg":"error","description":"duplicate order"}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "application");
        assert!(err.to_string().contains("duplicate order"));
    }

    #[test]
    fn test_sentinel_msgg_variant_is_honored() {
        let err = classify_response(StatusCode::OK, r#"{"msgg":"error","title":"bad totals"}"#)
            .unwrap_err();
        assert_eq!(err.kind(), "application");
        assert!(err.to_string().contains("bad totals"));
    }

    #[test]
    fn test_sentinel_with_device_marker_is_authorization() {
        let err = classify_response(
            StatusCode::OK,
            r#"{"msg":"error","description":"Device not registered with head office"}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "authorization");
    }

    #[test]
    fn test_http_401_is_authorization() {
        let err = classify_response(StatusCode::UNAUTHORIZED, "").unwrap_err();
        assert_eq!(err.kind(), "authorization");
    }

    #[test]
    fn test_http_500_is_application() {
        let err = classify_response(StatusCode::INTERNAL_SERVER_ERROR, "oops").unwrap_err();
        assert_eq!(err.kind(), "application");
        assert!(err.to_string().contains("500"));
    }

    #[test]
    fn test_invalid_json_success_body_is_application() {
        let err = classify_response(StatusCode::OK, "<html>proxy page</html>").unwrap_err();
        assert_eq!(err.kind(), "application");
    }

    #[test]
    fn test_sentinel_absent_means_success() {
        // Any shape without the sentinel is success, even error-ish text
        let out = classify_response(StatusCode::OK, r#"{"msg":"stored"}"#).unwrap();
        assert_eq!(out["msg"], "stored");
    }
}
