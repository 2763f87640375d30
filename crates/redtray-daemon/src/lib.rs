//! # redtray-daemon - Redshift Process Management
//!
//! Spawns and supervises the `redshift` child process, decodes its verbose
//! stdout protocol, and runs one-shot invocations.
//!
//! Depends on [`redtray_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Process Management
//! - [`DaemonProcess`] - Spawn and supervise the long-lived `redshift -v` process
//! - [`spawn_oneshot()`] - Fire-and-forget `-P -O <K>` / `-x` runs
//! - [`DaemonInvocation`] - Program, arguments and forced C locale for a run
//!
//! ### Protocol Parsing
//! - [`parse_line()`] - Split a `Key: Value` stdout line
//! - [`parse_coordinate()`] - Signed degrees from `42.0 N` style tokens
//! - [`decode_key_change()`] - Typed change for a known key
//! - [`LineBuffer`] - Chunk-to-line accumulator for the output pipes

pub mod command;
pub mod oneshot;
pub mod process;
pub mod protocol;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

// Public API re-exports
pub use command::{resolve_binary, DaemonInvocation, OneShot, LOCALE_VARS, VERBOSE_FLAG};
pub use oneshot::{spawn_oneshot, OneShotRun};
pub use process::{DaemonProcess, TERMINATE_SIGNAL, TOGGLE_SIGNAL};
pub use protocol::{decode_key_change, parse_coordinate, parse_line, KeyChange, LineBuffer};
