//! Error taxonomy for the upload pipeline.
//!
//! The transport layer classifies every failure into one of these variants,
//! so controllers dispatch on a closed set instead of matching message text.

use thiserror::Error;

/// Failure kinds surfaced by the capture-to-upload pipeline.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Crypto provider or recipient key unavailable. Fatal, not retryable.
    #[error("upload configuration error: {0}")]
    Configuration(String),

    /// Transport-level failure: unreachable host, timeout, DNS. Recoverable
    /// by manual retry.
    #[error("network failure: {0}")]
    Network(String),

    /// The server rejected the upload, either via HTTP status or the
    /// `msg`/`msgg` error sentinel in a 2xx body.
    #[error("upload rejected: {0}")]
    Application(String),

    /// The remote system does not recognize this device.
    #[error("device not authorized: {0}")]
    Authorization(String),

    /// The order cannot be uploaded at all (missing, voided).
    #[error("order not uploadable: {0}")]
    Ineligible(String),

    /// Local order store failure.
    #[error("order store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl UploadError {
    /// Short stable tag for structured log fields and UI categorisation.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Configuration(_) => "configuration",
            UploadError::Network(_) => "network",
            UploadError::Application(_) => "application",
            UploadError::Authorization(_) => "authorization",
            UploadError::Ineligible(_) => "ineligible",
            UploadError::Store(_) => "store",
        }
    }

    /// Whether a manual retry of the same operation can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::Network(_) | UploadError::Application(_)
        )
    }
}
