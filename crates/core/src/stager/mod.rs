//! Upload stager: decides where a confirmed night goes and builds the file
//! that is sent.

mod layout;
mod package;

pub use layout::{RemoteTarget, UploadPlan, UploadStager};
pub use package::{build_package, write_receipt, PackageInfo, RECEIPT_FILE_NAME};

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors while planning or packaging an upload. Recorded against the night.
#[derive(Debug, Error)]
pub enum StageError {
    /// No CAMS station code from config or the night's `.config`.
    #[error("no CAMS station id for night {night_id}")]
    MissingCamsId { night_id: String },

    /// The confirmed night has no calibration file.
    #[error("no CAL_* calibration file for night {night_id}")]
    MissingCalibration { night_id: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write package {path}: {reason}")]
    Package { path: PathBuf, reason: String },
}

impl StageError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn package(path: &Path, reason: impl ToString) -> Self {
        Self::Package {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}
