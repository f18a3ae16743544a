//! Error types shared across the crate.

use thiserror::Error;

/// Failures talking to the generative content API.
#[derive(Debug, Error)]
pub enum GeminiError {
    /// Transport-level failure (DNS, TLS, timeout, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

    /// No API key has been selected.
    #[error("no API credential selected")]
    MissingCredential,
}

/// Why a species lookup could not produce a classification.
///
/// Both variants read the same to the user; they are kept apart for logs
/// and tests.
#[derive(Debug, Error)]
pub enum LookupError {
    /// The describe-species call itself failed.
    #[error("species lookup failed: {0}")]
    LookupFailed(#[from] GeminiError),

    /// The call succeeded but the payload does not match the declared schema.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl LookupError {
    /// Short machine-readable kind for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LookupError::LookupFailed(_) => "lookup_failed",
            LookupError::MalformedResponse(_) => "malformed_response",
        }
    }
}

/// Failures reading or writing the key-value store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error for key {key}: {source}")]
    Json {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for key {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}
