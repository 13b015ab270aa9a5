use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::confirmation::ConfirmationConfig;
use crate::transfer::{RemoteConfig, RemoteLayout, RemoteProtocol, RetryConfig, VerifyMode};

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub station: StationConfig,
    #[serde(default)]
    pub confirmation: ConfirmationConfig,
    pub remote: RemoteConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Night archive configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArchiveConfig {
    /// Directory holding one subdirectory per night (RMS `ArchivedFiles`).
    pub root: PathBuf,
    /// Where the confirmation tool writes confirmed nights (RMS
    /// `ConfirmedFiles`). When unset the tool writes into the night directory.
    #[serde(default)]
    pub confirmed_root: Option<PathBuf>,
    /// Only consider these station codes (empty = all).
    #[serde(default)]
    pub stations: Vec<String>,
}

/// Station identity on the collection server
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StationConfig {
    /// CAMS station code. When unset it is read from each night's `.config`.
    #[serde(default)]
    pub cams_id: Option<u32>,
}

/// Progress ledger configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("nightrelay.db")
}

/// Upload packaging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadConfig {
    /// Write `CamsFTPupload.txt` into the night's output directory after a
    /// successful upload.
    #[serde(default = "default_true")]
    pub write_receipt: bool,
    /// Build upload packages here instead of next to the confirmed artifact.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            write_receipt: true,
            staging_dir: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Sanitized config for display (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub archive: ArchiveConfig,
    pub station: StationConfig,
    pub confirmation: ConfirmationConfig,
    pub remote: SanitizedRemoteConfig,
    pub retry: RetryConfig,
    pub ledger: LedgerConfig,
    pub upload: UploadConfig,
}

/// Sanitized remote config (credentials hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedRemoteConfig {
    pub protocol: RemoteProtocol,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password_configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<PathBuf>,
    pub base_path: String,
    pub layout: RemoteLayout,
    pub verify: VerifyMode,
    pub connect_timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let remote = &config.remote;
        Self {
            archive: config.archive.clone(),
            station: config.station.clone(),
            confirmation: config.confirmation.clone(),
            remote: SanitizedRemoteConfig {
                protocol: remote.protocol,
                host: remote.host.clone(),
                port: remote.port,
                username: remote.username.clone(),
                password_configured: remote.password.as_ref().is_some_and(|p| !p.is_empty()),
                private_key: remote.private_key.clone(),
                base_path: remote.base_path.clone(),
                layout: remote.layout,
                verify: remote.verify,
                connect_timeout_secs: remote.connect_timeout_secs,
            },
            retry: config.retry.clone(),
            ledger: config.ledger.clone(),
            upload: config.upload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[archive]
root = "/home/rms/RMS_data/ArchivedFiles"

[remote]
host = "cams.example.org"
username = "nl0001"
password = "hunter2"
base_path = "/upload"
"#;

    #[test]
    fn test_deserialize_minimal_config() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(
            config.archive.root.to_str().unwrap(),
            "/home/rms/RMS_data/ArchivedFiles"
        );
        assert!(config.archive.confirmed_root.is_none());
        assert!(config.station.cams_id.is_none());
        assert_eq!(config.ledger.path.to_str().unwrap(), "nightrelay.db");
        assert!(config.upload.write_receipt);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_deserialize_missing_remote_fails() {
        let toml = r#"
[archive]
root = "/data"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[archive]
root = "/data/ArchivedFiles"
confirmed_root = "/data/ConfirmedFiles"
stations = ["NL0001", "NL0002"]

[station]
cams_id = 351

[confirmation]
command = "/opt/cmn/CMN_binViewer.py"

[remote]
protocol = "sftp"
host = "cams.example.org"
username = "nl0001"
private_key = "/home/rms/.ssh/id_ed25519"
base_path = "/upload"
layout = "year"

[retry]
max_attempts = 5
initial_delay_secs = 1

[ledger]
path = "/var/lib/nightrelay/ledger.db"

[upload]
write_receipt = false
staging_dir = "/tmp/nightrelay"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.archive.stations.len(), 2);
        assert_eq!(config.station.cams_id, Some(351));
        assert_eq!(config.remote.layout, RemoteLayout::Year);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.max_delay_secs, 300);
        assert!(!config.upload.write_receipt);
        assert_eq!(
            config.upload.staging_dir.unwrap().to_str().unwrap(),
            "/tmp/nightrelay"
        );
    }

    #[test]
    fn test_sanitized_config_hides_password() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.remote.password_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(json.contains("cams.example.org"));
    }
}
