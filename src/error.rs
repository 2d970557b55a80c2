//! Error types shared across the usage pipeline
//!
//! Parse problems never show up here: malformed lines are skipped by the
//! [`crate::parser`] and reported as [`crate::parser::SkipReason`]s. Everything
//! below describes failures a caller may want to react to.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single file system operation
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FileSystemError {
    #[error("path not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("permission denied: {}", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("failed to read {}: {message}", path.display())]
    ReadFailed { path: PathBuf, message: String },
}

impl FileSystemError {
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            _ => Self::ReadFailed {
                path,
                message: err.to_string(),
            },
        }
    }

    pub fn path(&self) -> &PathBuf {
        match self {
            Self::NotFound { path } | Self::PermissionDenied { path } | Self::ReadFailed { path, .. } => path,
        }
    }
}

/// Returned without touching storage while a circuit is open
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("circuit '{circuit}' is open, retry in {}ms", retry_after.as_millis())]
pub struct CircuitOpenError {
    pub circuit: String,
    pub retry_after: Duration,
}

/// Anything a [`crate::gateway::FileGateway`] call can fail with
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpenError),

    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout { operation: String, after: Duration },
}

/// Errors surfaced by the [`crate::repository::UsageRepository`]
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RepositoryError {
    #[error("invalid usage data path: {}", path.display())]
    InvalidPath { path: PathBuf },

    #[error("{} is {actual_bytes} bytes, above the {limit_bytes} byte limit", path.display())]
    QuotaExceeded {
        path: PathBuf,
        limit_bytes: u64,
        actual_bytes: u64,
    },

    #[error("{operation} timed out after {}ms", after.as_millis())]
    Timeout { operation: String, after: Duration },

    #[error("all {total} usage files failed to load ({failed} errors)")]
    BatchProcessingFailed { failed: usize, total: usize },

    #[error(transparent)]
    CircuitOpen(CircuitOpenError),

    #[error(transparent)]
    FileSystem(FileSystemError),
}

impl From<GatewayError> for RepositoryError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::FileSystem(e) => Self::FileSystem(e),
            GatewayError::CircuitOpen(e) => Self::CircuitOpen(e),
            GatewayError::Timeout { operation, after } => Self::Timeout { operation, after },
        }
    }
}

/// Errors from the live session windower
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session windower is no longer running")]
    Unavailable,
}

/// Top-level error for the query interfaces
#[derive(Debug, Clone, Error, PartialEq)]
pub enum UsageError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Recovery hints attached to an error
pub trait Recoverable {
    /// Whether retrying the same call may succeed
    fn is_recoverable(&self) -> bool;

    /// How long to wait before retrying, when the error knows
    fn suggested_retry_delay(&self) -> Option<Duration> {
        None
    }
}

impl Recoverable for FileSystemError {
    fn is_recoverable(&self) -> bool {
        matches!(self, Self::ReadFailed { .. })
    }
}

impl Recoverable for GatewayError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::FileSystem(e) => e.is_recoverable(),
            Self::CircuitOpen(_) | Self::Timeout { .. } => true,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen(e) => Some(e.retry_after),
            _ => None,
        }
    }
}

impl Recoverable for RepositoryError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidPath { .. } | Self::QuotaExceeded { .. } => false,
            Self::Timeout { .. } | Self::BatchProcessingFailed { .. } | Self::CircuitOpen(_) => true,
            Self::FileSystem(e) => e.is_recoverable(),
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            Self::CircuitOpen(e) => Some(e.retry_after),
            Self::Timeout { after, .. } => Some(*after),
            Self::BatchProcessingFailed { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }
}

impl Recoverable for SessionError {
    fn is_recoverable(&self) -> bool {
        false
    }
}

impl Recoverable for UsageError {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Repository(e) => e.is_recoverable(),
            Self::Session(e) => e.is_recoverable(),
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Repository(e) => e.suggested_retry_delay(),
            Self::Session(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_error_mapping() {
        let not_found = FileSystemError::from_io("/x", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(not_found, FileSystemError::NotFound { .. }));

        let denied = FileSystemError::from_io("/x", io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(denied, FileSystemError::PermissionDenied { .. }));

        let other = FileSystemError::from_io("/x", io::Error::new(io::ErrorKind::Other, "disk on fire"));
        assert!(matches!(other, FileSystemError::ReadFailed { .. }));
        assert!(other.to_string().contains("disk on fire"));
    }

    #[test]
    fn test_circuit_open_suggests_delay() {
        let err = RepositoryError::from(GatewayError::CircuitOpen(CircuitOpenError {
            circuit: "fs".to_string(),
            retry_after: Duration::from_secs(7),
        }));
        assert!(err.is_recoverable());
        assert_eq!(err.suggested_retry_delay(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_invalid_path_not_recoverable() {
        let err = RepositoryError::InvalidPath { path: PathBuf::from("/nope") };
        assert!(!err.is_recoverable());
        assert_eq!(err.suggested_retry_delay(), None);
    }
}
