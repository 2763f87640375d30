//! Domain event definitions
//!
//! Three event families flow through the system:
//! - [`DaemonEvent`]: raw output and exit notifications from the supervised process
//! - [`ControllerEvent`]: typed state changes published to consumers
//! - [`ControlCommand`]: requests accepted from consumers

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::state::ControlMode;

// ─────────────────────────────────────────────────────────
// Process-level events
// ─────────────────────────────────────────────────────────

/// Decoded exit status of the long-lived daemon
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DaemonExit {
    /// Exit code, if the process exited normally
    pub code: Option<i32>,
    /// Terminating signal number, if the process was killed by one
    pub signal: Option<i32>,
    /// Everything the process wrote to stderr
    pub stderr: String,
}

impl DaemonExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Stderr text as reported to consumers
    pub fn error_text(&self) -> String {
        let text = self.stderr.trim_end();
        if !text.is_empty() {
            return text.to_string();
        }
        match (self.code, self.signal) {
            (Some(code), _) => format!("redshift exited with status {}", code),
            (None, Some(sig)) => format!("redshift was terminated by signal {}", sig),
            (None, None) => "redshift exited unexpectedly".to_string(),
        }
    }
}

/// Events emitted by the process supervisor
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// One complete stdout line, newline stripped
    Stdout(String),
    /// One complete stderr line, newline stripped
    Stderr(String),
    /// The process exited; always the last event, after both streams drained
    Exited(DaemonExit),
}

// ─────────────────────────────────────────────────────────
// Consumer-facing events
// ─────────────────────────────────────────────────────────

/// State changes published by the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControllerEvent {
    InhibitChanged { inhibited: bool },
    TemperatureChanged { kelvin: u32 },
    PeriodChanged { period: String },
    LocationChanged { latitude: f64, longitude: f64 },
    FullscreenChanged { fullscreen: bool },
    ModeChanged { mode: ControlMode },
    ErrorOccurred { message: String },
    Stopped,
}

impl ControllerEvent {
    /// Returns a short string label for this event type (for logging/debugging).
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::InhibitChanged { .. } => "inhibit_changed",
            Self::TemperatureChanged { .. } => "temperature_changed",
            Self::PeriodChanged { .. } => "period_changed",
            Self::LocationChanged { .. } => "location_changed",
            Self::FullscreenChanged { .. } => "fullscreen_changed",
            Self::ModeChanged { .. } => "mode_changed",
            Self::ErrorOccurred { .. } => "error_occurred",
            Self::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

// ─────────────────────────────────────────────────────────
// Consumer-facing commands
// ─────────────────────────────────────────────────────────

/// Requests a consumer can make of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ControlCommand {
    SetInhibit { inhibit: bool },
    ToggleInhibit,
    SetManualMode { manual: bool },
    SetTemperature { kelvin: u32 },
    SuspendFor { minutes: u64 },
    Terminate,
    Kill,
}

fn parse_switch(word: Option<&str>, line: &str) -> Result<bool, Error> {
    match word {
        Some("on") | Some("true") | Some("1") => Ok(true),
        Some("off") | Some("false") | Some("0") => Ok(false),
        _ => Err(Error::invalid_request(format!(
            "expected on/off in '{}'",
            line
        ))),
    }
}

fn parse_number<T: FromStr>(word: Option<&str>, line: &str) -> Result<T, Error> {
    word.and_then(|w| w.parse().ok())
        .ok_or_else(|| Error::invalid_request(format!("expected a number in '{}'", line)))
}

impl FromStr for ControlCommand {
    type Err = Error;

    /// Parse a text command such as `suspend 30` or `manual on`.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words
            .next()
            .ok_or_else(|| Error::invalid_request("empty command"))?;

        let command = match verb {
            "toggle" | "t" => ControlCommand::ToggleInhibit,
            "inhibit" => ControlCommand::SetInhibit {
                inhibit: parse_switch(words.next(), line)?,
            },
            "enable" => ControlCommand::SetInhibit { inhibit: false },
            "disable" => ControlCommand::SetInhibit { inhibit: true },
            "manual" => ControlCommand::SetManualMode {
                manual: parse_switch(words.next(), line)?,
            },
            "temp" | "temperature" => ControlCommand::SetTemperature {
                kelvin: parse_number(words.next(), line)?,
            },
            "suspend" => ControlCommand::SuspendFor {
                minutes: parse_number(words.next(), line)?,
            },
            "quit" | "q" => ControlCommand::Terminate,
            "kill" => ControlCommand::Kill,
            other => {
                return Err(Error::invalid_request(format!(
                    "unknown command '{}'",
                    other
                )))
            }
        };

        if words.next().is_some() {
            return Err(Error::invalid_request(format!(
                "unexpected trailing input in '{}'",
                line
            )));
        }
        Ok(command)
    }
}
