//! Observable daemon state

use serde::{Deserialize, Serialize};

/// Period reported before the daemon has said anything.
pub const UNKNOWN_PERIOD: &str = "Unknown";

/// Geographic location in signed degrees (north and east positive).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.latitude, self.longitude)
    }
}

/// How the controller drives the screen temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// The long-lived daemon follows its own day/night schedule
    #[default]
    Automatic,
    /// The controller applies temperatures through one-shot invocations
    Manual,
}

impl std::fmt::Display for ControlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlMode::Automatic => write!(f, "automatic"),
            ControlMode::Manual => write!(f, "manual"),
        }
    }
}

/// Snapshot of everything the controller knows about the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonState {
    /// Color adjustment currently suspended
    pub inhibited: bool,
    /// Last reported color temperature in Kelvin (0 until first report)
    pub temperature: u32,
    /// Daemon-reported time-of-day period, used verbatim
    pub period: String,
    pub location: Location,
    /// Active window is fullscreen (only tracked while the watcher runs)
    pub fullscreen: bool,
    /// Inhibition was requested by the user or the watcher
    pub manually_inhibited: bool,
}

impl Default for DaemonState {
    fn default() -> Self {
        Self {
            inhibited: false,
            temperature: 0,
            period: UNKNOWN_PERIOD.to_string(),
            location: Location::default(),
            fullscreen: false,
            manually_inhibited: false,
        }
    }
}
