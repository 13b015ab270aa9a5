//! Confirmation driver: runs the external, human-attended confirmation tool
//! for one night and validates the artifact it leaves behind.
//!
//! The tool is a synchronous capability boundary: one call per night, one
//! result or one error. The driver never times out the human step; it only
//! detects abnormal termination and missing or malformed output.

mod artifact;
mod config;
mod error;
mod external;
mod traits;

pub use artifact::{archive_detection_count, archive_result, find_calibration, load_result};
pub use config::ConfirmationConfig;
pub use error::ConfirmationError;
pub use external::ExternalConfirmer;
pub use traits::Confirmer;
