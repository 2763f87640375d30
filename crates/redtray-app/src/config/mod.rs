//! Configuration file parsing
//!
//! Supports `<config_dir>/redshift-tray/config.toml` (or an explicit path).

pub mod settings;
pub mod types;

pub use settings::{default_config_path, load_settings, try_load_settings, CONFIG_FILENAME};
pub use types::*;
