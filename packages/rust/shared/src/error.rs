//! Error types for Coursesmith.
//!
//! Library crates use [`CoursesmithError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Which way a call to the generation service failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// The request exceeded its stage timeout.
    Timeout,
    /// The service answered 429.
    RateLimited,
    /// Any other non-success answer, empty body, or connection failure.
    ServiceError,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate limited",
            Self::ServiceError => "service error",
        };
        f.write_str(s)
    }
}

/// Top-level error type for all Coursesmith operations.
#[derive(Debug, thiserror::Error)]
pub enum CoursesmithError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Bad caller input, rejected before any job exists.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Generated text could not be repaired into the stage contract.
    #[error("malformed output: {message}")]
    MalformedOutput { message: String },

    /// The generation service failed or was unreachable.
    #[error("generation transport error ({kind}): {message}")]
    Transport { kind: TransportKind, message: String },

    /// A racing writer already created this artifact.
    #[error("duplicate artifact: {0}")]
    DuplicateKey(String),

    /// The entity a job refers to no longer exists.
    #[error("entity not found: {0}")]
    EntityNotFound(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, CoursesmithError>;

impl CoursesmithError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a malformed-output error from any displayable message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedOutput {
            message: msg.into(),
        }
    }

    /// Create a transport error of the given kind.
    pub fn transport(kind: TransportKind, msg: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Upstream failures that a later attempt may not repeat.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MalformedOutput { .. } | Self::Transport { .. })
    }
}
