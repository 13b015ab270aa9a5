//! Error types for the transfer module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while moving a file to the remote destination.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Could not reach the remote or the session dropped.
    #[error("Failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    /// The remote rejected our credentials.
    #[error("Authentication failed for {username}: {reason}")]
    Auth { username: String, reason: String },

    /// A remote operation failed.
    #[error("Remote {operation} failed for {path}: {reason}")]
    Remote {
        operation: &'static str,
        path: String,
        reason: String,
    },

    /// The uploaded temporary file does not match the local file.
    #[error("Verification failed for {path}: expected {expected}, got {actual}")]
    VerifyFailed {
        path: String,
        expected: String,
        actual: String,
    },

    /// The local file could not be read.
    #[error("Failed to read local file {path}")]
    LocalRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every attempt failed; carries the last error.
    #[error("Transfer failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<TransferError>,
    },

    /// The blocking worker running the transfer died.
    #[error("Transfer worker aborted: {0}")]
    Aborted(String),
}

impl TransferError {
    /// Creates a remote operation error.
    pub fn remote(operation: &'static str, path: impl Into<String>, reason: impl ToString) -> Self {
        Self::Remote {
            operation,
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a connection error.
    pub fn connect(target: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether another attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Remote { .. } | Self::VerifyFailed { .. }
        )
    }
}
