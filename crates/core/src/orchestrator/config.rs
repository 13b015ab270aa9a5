//! Orchestrator configuration and per-run options.

use crate::config::Config;
use crate::night::NightId;

/// Behaviour switches taken from the loaded configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upload nights whose archive declares zero detections without asking
    /// the human.
    pub upload_zero_nights: bool,
    /// Write `CamsFTPupload.txt` after each successful upload.
    pub write_receipt: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            upload_zero_nights: true,
            write_receipt: true,
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            upload_zero_nights: config.confirmation.upload_zero_nights,
            write_receipt: config.upload.write_receipt,
        }
    }
}

/// Options for a single run, from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Only process this night.
    pub only_night: Option<NightId>,
    /// Treat each archive's own detection file as confirmed.
    pub skip_confirmation: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use std::path::Path;

    #[test]
    fn test_from_config() {
        let mut config = fixtures::config(Path::new("/a"), Path::new("/r"));
        config.confirmation.upload_zero_nights = false;
        config.upload.write_receipt = false;

        let orchestrator = OrchestratorConfig::from(&config);
        assert!(!orchestrator.upload_zero_nights);
        assert!(!orchestrator.write_receipt);
    }

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert!(config.upload_zero_nights);
        assert!(config.write_receipt);
        assert!(RunOptions::default().only_night.is_none());
    }
}
