//! redshift-tray library
//!
//! Controller for the redshift color temperature daemon. The binary runs the
//! headless consumer; the crates under `crates/` hold the logic.

pub mod headless;

// Re-export main entry points
pub use headless::runner::run_headless;
