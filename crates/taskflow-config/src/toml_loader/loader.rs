//! Core TOML config loading: read from path or platform default.

use std::path::Path;

use taskflow_common::ConfigError;
use tracing::{info, warn};

use super::paths::{create_default_config, default_config_path};
use crate::schema::HubConfig;
use crate::validation;

/// Load config from a specific TOML file path.
///
/// Missing fields take their defaults. Validation failures are logged and
/// the parsed config is returned as-is; callers that need a strict check
/// run [`validation::validate`] themselves.
pub fn load_from_path(path: &Path) -> Result<HubConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ParseError(format!("failed to read {}: {e}", path.display())))?;

    let config: HubConfig = toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("failed to parse TOML: {e}")))?;

    if let Err(e) = validation::validate(&config) {
        warn!("config validation warning: {e}");
    }

    info!("loaded config from {}", path.display());
    Ok(config)
}

/// Load config from the platform-specific default path.
///
/// On Linux: `~/.config/taskflow/hub.toml`. If the file does not exist, a
/// commented default is written and defaults are returned.
pub fn load_default() -> Result<HubConfig, ConfigError> {
    let path = default_config_path()?;

    match load_from_path(&path) {
        Ok(config) => Ok(config),
        Err(ConfigError::FileNotFound(_)) => {
            info!("no config found at {}, creating default", path.display());
            create_default_config(&path)?;
            Ok(HubConfig::default())
        }
        Err(e) => Err(e),
    }
}
