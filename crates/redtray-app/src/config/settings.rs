//! Settings loading

use std::path::{Path, PathBuf};

use redtray_core::prelude::*;

use super::types::Settings;

pub const CONFIG_DIR: &str = "redshift-tray";
pub const CONFIG_FILENAME: &str = "config.toml";

/// Default location: `<config_dir>/redshift-tray/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILENAME))
}

/// Load settings from `path`, falling back to defaults.
///
/// A missing file is normal. An unreadable or unparsable file is logged and
/// ignored so a broken config never prevents the tray from starting.
pub fn load_settings(path: &Path) -> Settings {
    if !path.exists() {
        debug!("No config file at {:?}, using defaults", path);
        return Settings::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            Settings::default()
        }
    }
}

/// Strict variant for callers that want to report a bad config.
pub fn try_load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Err(Error::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::config(format!("{}: {}", path.display(), e)))
}
