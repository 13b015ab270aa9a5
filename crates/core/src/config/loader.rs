use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::{Path, PathBuf};

use super::{types::Config, ConfigError};

/// Environment prefix for overrides, e.g. `NIGHTRELAY_REMOTE__PASSWORD`.
const ENV_PREFIX: &str = "NIGHTRELAY_";

/// Load configuration from file with environment variable overrides.
///
/// Relative local paths are taken relative to the directory holding the
/// file, so a cron job reads the same archive and ledger as an interactive
/// shell.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let mut config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    if let Some(base) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        resolve_paths(&mut config, base);
    }
    Ok(config)
}

/// Anchor relative local paths at `base`. Remote paths are left alone.
fn resolve_paths(config: &mut Config, base: &Path) {
    let anchor = |p: &mut PathBuf| {
        if p.is_relative() && !p.as_os_str().is_empty() {
            *p = base.join(&*p);
        }
    };

    anchor(&mut config.archive.root);
    anchor(&mut config.ledger.path);
    for path in [
        config.archive.confirmed_root.as_mut(),
        config.upload.staging_dir.as_mut(),
        config.remote.private_key.as_mut(),
    ]
    .into_iter()
    .flatten()
    {
        anchor(path);
    }
    if config.remote.protocol == crate::transfer::RemoteProtocol::Local {
        let mut local = PathBuf::from(&config.remote.base_path);
        anchor(&mut local);
        config.remote.base_path = local.to_string_lossy().into_owned();
    }
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}
