//! Archive scanner: finds night directories and filters out finished ones.

mod archive;

pub use archive::ArchiveScanner;

use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a scan. Directories that merely do not follow the naming
/// convention are ignored, not reported.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("archive root unreadable: {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
