//! redtray-app - State controller and orchestration for the Redshift tray
//!
//! Implements the controller state machine on top of `redtray-daemon`, the
//! optional fullscreen watcher, the engine loop that serialises every state
//! mutation, and configuration loading.

pub mod backend;
pub mod config;
pub mod controller;
pub mod engine;
pub mod fullscreen;
pub mod message;
pub mod signals;
pub mod suspend;
#[cfg(feature = "x11")]
pub mod x11;

// Re-export primary types
pub use backend::{DaemonBackend, ProcessBackend};
pub use controller::{Controller, Phase};
pub use engine::Engine;
pub use fullscreen::{detect_window_query, FullscreenWatcher, WindowQuery};
pub use message::{Message, WatcherEvent};
