//! Error types for kenect.
//!
//! Library crates use [`KenectError`] via `thiserror`. Embedding
//! applications can wrap it with their own diagnostic layer.

use std::path::PathBuf;

/// Top-level error type for all kenect operations.
#[derive(Debug, thiserror::Error)]
pub enum KenectError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the Knowledge Engine or triple store.
    #[error("network error: {0}")]
    Network(String),

    /// Invalid caller-supplied argument, detected before any network call.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Malformed or unexpected response from the Knowledge Engine.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Triple store rejected an update or query.
    #[error("store error: {0}")]
    Store(String),

    /// Generated Turtle text could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KenectError>;

impl KenectError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an invalid-argument error from any displayable message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: msg.into(),
        }
    }

    /// Create a protocol error from any displayable message.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
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
}
