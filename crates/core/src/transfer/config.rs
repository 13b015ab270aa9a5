//! Remote destination and retry configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Transport used to reach the collection server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemoteProtocol {
    #[default]
    Sftp,
    /// A locally mounted directory (network share, test fixture).
    Local,
}

/// Directory convention under the remote base path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RemoteLayout {
    /// `base/<file>`
    Flat,
    /// `base/YYYY/<file>`
    Year,
    /// `base/YYYY/YYYY_MM/<file>`
    #[default]
    YearMonth,
}

/// How an uploaded temporary file is checked before it is renamed into place.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Remote size must equal the local size.
    Size,
    /// Size check plus an MD5 digest of the remote file read back.
    #[default]
    Md5,
}

/// Remote collection server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub protocol: RemoteProtocol,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<PathBuf>,
    /// Base directory on the server; for `local` a filesystem path.
    pub base_path: String,
    #[serde(default)]
    pub layout: RemoteLayout,
    #[serde(default)]
    pub verify: VerifyMode,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    30
}

impl RemoteConfig {
    /// A local-directory remote rooted at `base_path`.
    pub fn local(base_path: impl Into<String>) -> Self {
        Self {
            protocol: RemoteProtocol::Local,
            host: String::new(),
            port: default_port(),
            username: String::new(),
            password: None,
            private_key: None,
            base_path: base_path.into(),
            layout: RemoteLayout::default(),
            verify: VerifyMode::default(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Retry configuration for transfers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt, in seconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,

    /// Upper bound for any single delay, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    5
}

fn default_max_delay() -> u64 {
    300 // 5 minutes
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay(),
            max_delay_secs: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}
