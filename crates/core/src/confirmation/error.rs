//! Error types for the confirmation module.

use std::path::PathBuf;
use thiserror::Error;

use crate::night::DetectInfoError;

/// Errors that can occur while confirming a night. All of them are scoped to
/// one night; the batch continues with the next.
#[derive(Debug, Error)]
pub enum ConfirmationError {
    /// Confirmation tool is not configured or not executable.
    #[error("Confirmation tool not available: {path}")]
    ToolNotFound { path: PathBuf },

    /// The night has no input detection file for the tool.
    #[error("Night has no detection file: {0}")]
    MissingInput(#[source] DetectInfoError),

    /// Tool could not be started.
    #[error("Failed to launch confirmation tool: {0}")]
    LaunchFailed(#[source] std::io::Error),

    /// Tool exited with a non-zero status or was killed by a signal.
    #[error("Confirmation tool exited abnormally ({status})")]
    AbnormalExit {
        status: String,
        stderr: Option<String>,
    },

    /// Tool exited normally but left no result artifact.
    #[error("Confirmation artifact missing: {0}")]
    ArtifactMissing(#[source] DetectInfoError),

    /// The only artifact present is the one that was there before the tool
    /// ran, so nothing was confirmed.
    #[error("Confirmation tool left {path} untouched; nothing was confirmed")]
    ArtifactUnchanged { path: PathBuf },

    /// Result artifact exists but is empty or does not parse.
    #[error("Confirmation artifact malformed at {path}: {reason}")]
    ArtifactMalformed { path: PathBuf, reason: String },
}

impl ConfirmationError {
    /// Creates an abnormal exit error.
    pub fn abnormal_exit(status: impl Into<String>, stderr: Option<String>) -> Self {
        Self::AbnormalExit {
            status: status.into(),
            stderr,
        }
    }

    /// Creates a malformed artifact error.
    pub fn malformed(path: PathBuf, reason: impl Into<String>) -> Self {
        Self::ArtifactMalformed {
            path,
            reason: reason.into(),
        }
    }
}
