//! Configuration types for the Redshift tray controller
//!
//! Defines `Settings` and its sections, mirroring `config.toml`:
//!
//! ```toml
//! [daemon]
//! binary = "redshift"
//! args = ["-l", "55.7:12.6"]
//!
//! [fullscreen]
//! enabled = true
//! poll_interval_ms = 2000
//! inhibit_on_fullscreen = true
//!
//! [behavior]
//! start_in_manual_mode = false
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application settings (`config.toml`)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub daemon: DaemonSettings,

    #[serde(default)]
    pub fullscreen: FullscreenSettings,

    #[serde(default)]
    pub behavior: BehaviorSettings,
}

/// How to launch redshift
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonSettings {
    /// Binary name (looked up in `PATH`) or absolute path
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Extra arguments placed before any command-line passthrough arguments
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            args: Vec::new(),
        }
    }
}

/// Fullscreen watcher settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FullscreenSettings {
    /// Start the watcher when a window manager query is available
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay between active-window queries, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Inhibit redshift while a fullscreen window is focused
    #[serde(default = "default_true")]
    pub inhibit_on_fullscreen: bool,
}

impl FullscreenSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }
}

impl Default for FullscreenSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval_ms(),
            inhibit_on_fullscreen: true,
        }
    }
}

/// Behavior settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BehaviorSettings {
    /// Switch to manual mode as soon as the daemon is up
    #[serde(default)]
    pub start_in_manual_mode: bool,
}

/// Floor for the poll interval so a typo cannot turn the watcher into a busy loop
const MIN_POLL_INTERVAL_MS: u64 = 100;

fn default_binary() -> String {
    "redshift".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}
