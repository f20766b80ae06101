use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classification of an activity failure.
///
/// `TransientIo`, `UpstreamService` and `Timeout` are retryable; `Validation`
/// and `Parse` fail the step on the first occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientIo,
    UpstreamService,
    Timeout,
    Validation,
    Parse,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientIo | ErrorKind::UpstreamService | ErrorKind::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::UpstreamService => "upstream_service",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::Parse => "parse",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single activity attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ActivityError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ActivityError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient_io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TransientIo, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamService, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    /// Classify a non-success HTTP status from a collaborator service.
    ///
    /// 4xx responses mean the request itself is wrong and will not succeed on
    /// retry; everything else is treated as an upstream outage.
    pub fn from_upstream_status(service: &str, status: u16, body: &str) -> Self {
        let message = format!("{service} returned HTTP {status}: {body}");
        if (400..500).contains(&status) {
            Self::validation(message)
        } else {
            Self::upstream(message)
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Errors from the blob store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: '{0}'")]
    InvalidKey(String),

    #[error("storage I/O error: {0}")]
    Io(String),
}

impl From<StorageError> for ActivityError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_) | StorageError::InvalidKey(_) => {
                ActivityError::validation(err.to_string())
            }
            StorageError::Io(_) => ActivityError::transient_io(err.to_string()),
        }
    }
}

/// Errors from the workflow store ports.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The statement failed or a stored row could not be decoded.
    #[error("query error: {0}")]
    Query(String),

    /// A row with the same key already exists where none was expected.
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Semantic errors in a loaded configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("activity '{activity}' is routed to unknown queue '{queue}'")]
    UnknownQueue { activity: String, queue: String },

    #[error("activity '{0}' has no queue route")]
    MissingRoute(String),

    #[error("queue '{0}' must allow at least one concurrent lease")]
    ZeroConcurrency(String),

    #[error("retry policy for '{0}' must allow at least one attempt")]
    ZeroAttempts(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_retryability() {
        assert!(ErrorKind::TransientIo.is_retryable());
        assert!(ErrorKind::UpstreamService.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Parse.is_retryable());
    }

    #[test]
    fn test_upstream_status_classification() {
        let err = ActivityError::from_upstream_status("ocr", 503, "overloaded");
        assert_eq!(err.kind, ErrorKind::UpstreamService);
        assert!(err.is_retryable());

        let err = ActivityError::from_upstream_status("ner", 422, "bad text");
        assert_eq!(err.kind, ErrorKind::Validation);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_error_mapping() {
        let missing: ActivityError = StorageError::NotFound("runs/x".into()).into();
        assert_eq!(missing.kind, ErrorKind::Validation);

        let io: ActivityError = StorageError::Io("disk full".into()).into();
        assert_eq!(io.kind, ErrorKind::TransientIo);
    }

    #[test]
    fn test_activity_error_display() {
        let err = ActivityError::parse("missing %PDF header");
        assert_eq!(err.to_string(), "parse: missing %PDF header");
    }

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }
}
