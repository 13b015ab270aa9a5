use super::{types::Config, ConfigError};
use crate::transfer::RemoteProtocol;

/// Validate configuration
/// Currently validates:
/// - Archive root and remote base path are set
/// - SFTP remotes have a host, a user and a credential
/// - Retry settings allow at least one attempt and never shrink delays
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.archive.root.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "archive.root cannot be empty".to_string(),
        ));
    }

    let remote = &config.remote;
    if remote.base_path.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "remote.base_path cannot be empty".to_string(),
        ));
    }

    if remote.protocol == RemoteProtocol::Sftp {
        if remote.host.is_empty() {
            return Err(ConfigError::ValidationError(
                "remote.host is required for sftp".to_string(),
            ));
        }
        if remote.username.is_empty() {
            return Err(ConfigError::ValidationError(
                "remote.username is required for sftp".to_string(),
            ));
        }
        if remote.password.is_none() && remote.private_key.is_none() {
            return Err(ConfigError::ValidationError(
                "remote.password or remote.private_key is required for sftp".to_string(),
            ));
        }
        if remote.port == 0 {
            return Err(ConfigError::ValidationError(
                "remote.port cannot be 0".to_string(),
            ));
        }
    }

    if config.retry.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "retry.max_attempts must be at least 1".to_string(),
        ));
    }

    if config.retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::ValidationError(
            "retry.backoff_multiplier must be >= 1.0".to_string(),
        ));
    }

    Ok(())
}
