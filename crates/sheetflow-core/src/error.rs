//! Error types for sheetflow-core.

use thiserror::Error;

/// Result type for sheetflow-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sheetflow-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid flow configuration (unknown target, cycle, missing field, unknown node kind).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The data does not support the requested operation.
    #[error("data error: {0}")]
    Data(String),

    /// A file, sheet or workspace is missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// No execution branch reaches the target.
    #[error("path error: {0}")]
    Path(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Execution infrastructure failure (poisoned lock, crashed worker).
    #[error("execution error: {0}")]
    Execution(String),
}

/// Stable tag for an [`Error`], recorded in execution results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Data,
    NotFound,
    Path,
    Io,
    Serialization,
    Execution,
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn path(message: impl Into<String>) -> Self {
        Self::Path(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Get the stable kind tag of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Data(_) => ErrorKind::Data,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Path(_) => ErrorKind::Path,
            Error::Io(_) => ErrorKind::Io,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Execution(_) => ErrorKind::Execution,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Convert a poisoned lock into an [`Error`].
pub(crate) fn lock_error<T>(e: std::sync::PoisonError<T>) -> Error {
    Error::Execution(format!("lock poisoned (thread panicked): {}", e))
}
