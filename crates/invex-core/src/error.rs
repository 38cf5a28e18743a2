//! Error types for the invex-core library.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the invex library.
#[derive(Error, Debug)]
pub enum InvexError {
    /// Document normalization error.
    #[error("normalization error: {0}")]
    Normalize(#[from] NormalizeError),

    /// Model provider error.
    #[error("client error: {0}")]
    Client(#[from] ClientError),

    /// Reply parsing error.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Batch bookkeeping error.
    #[error("batch error: {0}")]
    Batch(#[from] BatchError),

    /// CSV export error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors raised while turning an uploaded artifact into pages.
#[derive(Error, Debug)]
pub enum NormalizeError {
    /// The declared kind is neither an image nor a PDF.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Decoding or rasterization failed.
    #[error("corrupt document: {0}")]
    CorruptDocument(String),
}

/// Errors raised by a single call to the model provider.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The request had neither pages nor text.
    #[error("extraction request for {0} is empty")]
    EmptyRequest(String),

    /// Network failure, timeout or provider-side 5xx. Retryable.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Provider refused the request (safety block, bad request, auth).
    #[error("request rejected by provider: {0}")]
    Policy(String),

    /// Provider quota or rate limit exhausted.
    #[error("quota exhausted: {0}")]
    Quota(String),

    /// Missing credentials or unusable client settings.
    #[error("client configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }
}

/// Errors raised while locating JSON in a model reply.
#[derive(Error, Debug)]
pub enum ParseError {
    /// No `{` in the reply at all.
    #[error("reply contains no JSON object")]
    NoObject,

    /// Braces never balance back to depth zero.
    #[error("unterminated JSON object starting at byte {0}")]
    Unbalanced(usize),

    /// A balanced candidate was found but did not decode.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
}

/// Errors raised by batch bookkeeping.
#[derive(Error, Debug)]
pub enum BatchError {
    /// A filename already has a recorded outcome.
    #[error("outcome for {0} already recorded")]
    AlreadyRecorded(String),
}

/// Per-document failure classification surfaced to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnsupportedFormat,
    CorruptDocument,
    TransportFailure,
    PolicyOrQuotaFailure,
    MalformedReply,
    /// The batch was cancelled before this document started.
    Cancelled,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::UnsupportedFormat => "unsupported_format",
            FailureKind::CorruptDocument => "corrupt_document",
            FailureKind::TransportFailure => "transport_failure",
            FailureKind::PolicyOrQuotaFailure => "policy_or_quota_failure",
            FailureKind::MalformedReply => "malformed_reply",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&NormalizeError> for FailureKind {
    fn from(err: &NormalizeError) -> Self {
        match err {
            NormalizeError::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
            NormalizeError::CorruptDocument(_) => FailureKind::CorruptDocument,
        }
    }
}

impl From<&ClientError> for FailureKind {
    fn from(err: &ClientError) -> Self {
        match err {
            ClientError::EmptyRequest(_) => FailureKind::CorruptDocument,
            ClientError::Transport(_) => FailureKind::TransportFailure,
            ClientError::Policy(_) | ClientError::Quota(_) | ClientError::Config(_) => {
                FailureKind::PolicyOrQuotaFailure
            }
        }
    }
}

impl From<&InvexError> for FailureKind {
    fn from(err: &InvexError) -> Self {
        match err {
            InvexError::Normalize(e) => e.into(),
            InvexError::Client(e) => e.into(),
            InvexError::Parse(_) => FailureKind::MalformedReply,
            _ => FailureKind::CorruptDocument,
        }
    }
}

/// Result type for the invex library.
pub type Result<T> = std::result::Result<T, InvexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_is_retryable() {
        assert!(ClientError::Transport("reset".into()).is_retryable());
        assert!(!ClientError::Quota("429".into()).is_retryable());
        assert!(!ClientError::Policy("blocked".into()).is_retryable());
        assert!(!ClientError::EmptyRequest("a.png".into()).is_retryable());
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            FailureKind::from(&ClientError::Quota("x".into())),
            FailureKind::PolicyOrQuotaFailure
        );
        assert_eq!(
            FailureKind::from(&NormalizeError::UnsupportedFormat("text/plain".into())),
            FailureKind::UnsupportedFormat
        );
        assert_eq!(FailureKind::MalformedReply.to_string(), "malformed_reply");
    }

    #[test]
    fn test_missing_credentials_are_not_transport() {
        let err = ClientError::Config("environment variable GEMINI_API_KEY is not set".into());
        assert!(!err.is_retryable());
        assert_eq!(FailureKind::from(&err), FailureKind::PolicyOrQuotaFailure);
    }
}
