//! Headless mode - NDJSON events on stdout, text commands on stdin
//!
//! Stand-in consumer for the tray UI: every controller event is written as
//! one JSON object per line, and commands typed on stdin are forwarded to the
//! engine.
//!
//! # Event Format
//!
//! Each line has an `"event"` field naming its type and a millisecond
//! `"timestamp"`:
//!
//! ```json
//! {"event":"started","binary":"redshift","fullscreen_watcher":true,"timestamp":1704700001000}
//! {"event":"inhibit_changed","inhibited":false,"timestamp":1704700001020}
//! {"event":"temperature_changed","kelvin":4500,"timestamp":1704700001021}
//! {"event":"stopped","timestamp":1704700009000}
//! ```
//!
//! # Commands
//!
//! `toggle`, `inhibit on|off`, `enable`, `disable`, `suspend <minutes>`,
//! `manual on|off`, `temp <kelvin>`, `status`, `quit`, `kill`.

pub mod runner;

use std::io::{self, Write};

use chrono::Utc;
use serde::Serialize;
use tracing::error;

use redtray_core::{ControlMode, DaemonState};

/// Runner-level events that are not controller state changes
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// The daemon is up and commands are accepted
    Started {
        binary: String,
        fullscreen_watcher: bool,
    },

    /// Reply to the `status` command
    Status {
        mode: Option<ControlMode>,
        #[serde(flatten)]
        state: DaemonState,
    },

    /// A stdin line that could not be used
    CommandRejected { input: String, reason: String },

    /// Startup or runtime failure
    Error { message: String, fatal: bool },
}

/// Any serializable event with a timestamp appended
#[derive(Serialize)]
struct Stamped<'a, T: Serialize> {
    #[serde(flatten)]
    event: &'a T,
    timestamp: i64,
}

/// Render one NDJSON line (without the newline)
pub fn render<T: Serialize>(event: &T) -> Option<String> {
    let stamped = Stamped {
        event,
        timestamp: Utc::now().timestamp_millis(),
    };
    match serde_json::to_string(&stamped) {
        Ok(json) => Some(json),
        Err(e) => {
            error!("Failed to serialize headless event: {}", e);
            None
        }
    }
}

/// Emit an event to stdout as one JSON line
pub fn emit<T: Serialize>(event: &T) {
    let Some(json) = render(event) else {
        return;
    };

    let mut stdout = io::stdout().lock();
    if let Err(e) = writeln!(stdout, "{}", json) {
        error!("Failed to write headless event to stdout: {}", e);
        return;
    }

    // Flush to ensure immediate output
    if let Err(e) = stdout.flush() {
        error!("Failed to flush headless stdout: {}", e);
    }
}

impl HeadlessEvent {
    pub fn emit(&self) {
        emit(self);
    }

    pub fn error(message: impl Into<String>, fatal: bool) -> Self {
        Self::Error {
            message: message.into(),
            fatal,
        }
    }
}
