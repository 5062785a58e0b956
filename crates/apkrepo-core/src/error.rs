//! Typed failures of the index maintenance engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// How an external program failed.
#[derive(Error, Debug)]
pub enum ToolFailure {
    #[error("failed to spawn: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("produced unusable output: {0}")]
    Output(String),
}

/// Signing failures. The archive that was being signed stays on disk unsigned.
#[derive(Error, Debug)]
pub enum SigningError {
    #[error("private key not found: {}", .0.display())]
    KeyNotFound(PathBuf),

    #[error("{program} failed: {failure}")]
    Tool {
        program: String,
        failure: ToolFailure,
    },
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("corrupt index archive {}: {reason}", path.display())]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("{program} failed: {failure}")]
    ExternalTool {
        program: String,
        failure: ToolFailure,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// `records` is set when a freshly written archive could not be signed.
    #[error("signing failed: {source}")]
    Signing {
        #[source]
        source: SigningError,
        records: Option<usize>,
    },

    #[error("timed out after {waited:?} waiting for the lock on {}", partition.display())]
    LockTimeout { partition: PathBuf, waited: Duration },
}

impl From<SigningError> for IndexError {
    fn from(source: SigningError) -> Self {
        Self::Signing {
            source,
            records: None,
        }
    }
}

impl IndexError {
    /// Create an IO error with context for better debugging.
    pub fn io(context: impl std::fmt::Display, source: std::io::Error) -> Self {
        Self::Io {
            context: context.to_string(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::CorruptArchive {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the caller must undo package files it saved for this request.
    ///
    /// Only signing failures leave a usable (unsigned) index that already
    /// covers the saved packages.
    pub fn requires_rollback(&self) -> bool {
        !matches!(self, Self::Signing { .. })
    }

    /// Whether retrying the same call may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalTool { .. } | Self::LockTimeout { .. })
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
