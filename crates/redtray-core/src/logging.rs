//! File logging
//!
//! Stdout belongs to the headless event stream, so diagnostics go to a
//! daily-rotated file under the user's data directory. `REDTRAY_LOG` takes an
//! `EnvFilter` directive, e.g. `REDTRAY_LOG=redtray_daemon=trace` to see every
//! line redshift prints.

use std::path::PathBuf;

use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

const LOG_ENV: &str = "REDTRAY_LOG";
const DEFAULT_FILTER: &str = "redtray=info,redshift_tray=info,warn";
const LOG_FILE_PREFIX: &str = "redtray.log";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// `<data_local_dir>/redshift-tray/logs`, or `./redshift-tray/logs` without a home
fn log_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("redshift-tray")
        .join("logs")
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init() -> Result<()> {
    let dir = log_directory();
    std::fs::create_dir_all(&dir)?;

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            fmt::layer()
                .with_writer(appender)
                .with_ansi(false)
                .with_thread_names(true)
                .with_timer(ChronoLocal::rfc_3339()),
        )
        .init();

    tracing::info!(
        pid = std::process::id(),
        dir = %dir.display(),
        "redshift-tray logging started"
    );
    Ok(())
}
