//! Message types for the engine loop
//!
//! Everything that can change controller state arrives here as a `Message`:
//! daemon output from the supervisor tasks, consumer commands, watcher
//! transitions (marshaled from the watcher thread), timer expiries and OS
//! signals. The engine drains them one at a time.

use redtray_core::{ControlCommand, DaemonEvent};

/// Notifications raised by the fullscreen watcher thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherEvent {
    /// The active window entered (`true`) or left (`false`) fullscreen
    Changed(bool),
    /// The watcher loop has unwound; `clean` is false if it panicked
    Completed { clean: bool },
}

/// All possible messages processed by the engine
#[derive(Debug, Clone)]
pub enum Message {
    /// Output or exit from a long-lived daemon, tagged with its spawn generation
    Daemon { generation: u64, event: DaemonEvent },

    /// Request from a consumer
    Command(ControlCommand),

    /// Marshaled watcher notification
    Watcher(WatcherEvent),

    /// A suspend timer fired
    SuspendExpired { token: u64 },

    /// The interrupted automatic daemon of `generation` did not exit in time
    /// after a switch to manual mode
    ManualHandoverTimeout { generation: u64 },

    /// SIGUSR1 delivered to this process
    ToggleSignal,

    /// Graceful shutdown took too long
    ShutdownTimeout,

    /// Shut down (SIGINT/SIGTERM, end of input)
    Quit,
}
