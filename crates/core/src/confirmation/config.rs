//! Confirmation tool configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How to launch the external confirmation tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    /// Executable to run (e.g. CMN_binViewer or a wrapper script).
    #[serde(default)]
    pub command: Option<PathBuf>,

    /// Argument template. `{night_dir}`, `{detect_file}` and `{output_dir}`
    /// are substituted per night.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Upload nights whose archive declares zero detections without asking a
    /// human to confirm them.
    #[serde(default = "default_true")]
    pub upload_zero_nights: bool,
}

fn default_args() -> Vec<String> {
    vec![
        "--confirmation".to_string(),
        "{night_dir}".to_string(),
        "--ftpdetectfile".to_string(),
        "{detect_file}".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: default_args(),
            upload_zero_nights: true,
        }
    }
}
