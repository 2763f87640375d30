//! # redtray-core - Core Domain Types
//!
//! Foundation crate for the Redshift tray controller. Provides the observable
//! daemon state, event and command definitions, error handling and logging.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, thiserror, tracing).
//!
//! ## Public API
//!
//! ### State (`state`)
//! - [`DaemonState`] - Inhibition, temperature, period, location, fullscreen
//! - [`Location`] - Signed latitude/longitude pair
//! - [`ControlMode`] - Automatic (daemon schedule) or manual (one-shot) control
//!
//! ### Events (`events`)
//! - [`DaemonEvent`] - Stdout/stderr lines and exit notification from the daemon
//! - [`ControllerEvent`] - Typed state changes published to consumers
//! - [`ControlCommand`] - Requests accepted from consumers
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use redtray_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod logging;
pub mod state;

/// Prelude for common imports used throughout all redtray crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, trace, warn};
}

pub use error::{Error, Result, ResultExt};
pub use events::{ControlCommand, ControllerEvent, DaemonEvent, DaemonExit};
pub use state::{ControlMode, DaemonState, Location, UNKNOWN_PERIOD};
