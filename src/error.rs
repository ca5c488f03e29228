//! Error types for the guardian service.
//!
//! One small enum per concern; HTTP handlers translate these into status
//! codes, so variants stay close to the wire semantics.

use thiserror::Error;

/// Errors from the key/value store layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying Redis error (connection, protocol, timeout).
    #[error("store error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored value did not decode as expected.
    #[error("stored value for {key} is malformed: {reason}")]
    Malformed { key: String, reason: String },

    /// JSON encoding/decoding of a stored record failed.
    #[error(transparent)]
    Encoding(#[from] serde_json::Error),
}

/// Errors surfaced by `/analyze`.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    /// The request body is not a parseable RFC822/MIME message.
    #[error("invalid MIME message")]
    InvalidMime,
}

/// Errors surfaced by `/report`.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The key/value store was unreachable while handling the report.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the oracle HTTP client.
#[derive(Debug, Error)]
pub enum OracleError {
    /// Transport-level failure (DNS, connect, timeout).
    #[error("oracle request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The oracle answered with an unexpected status code.
    #[error("oracle returned status {0}")]
    Status(u16),

    /// The oracle answered 2xx but the payload did not decode.
    #[error("oracle response malformed: {0}")]
    Decode(serde_json::Error),
}

/// Errors from configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// A line was not `KEY=VALUE`.
    #[error("malformed config line {line}: {text}")]
    Malformed { line: usize, text: String },
}
