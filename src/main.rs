//! redshift-tray - controller for the redshift color temperature daemon
//!
//! This is the binary entry point. All logic lives in the library crates.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use redtray_app::config::{self, Settings};
use redtray_app::detect_window_query;
use redtray_core::logging;

/// redshift-tray - supervise redshift and control it from stdin
#[derive(Parser, Debug)]
#[command(name = "redshift-tray")]
#[command(about = "Supervise redshift and control it without a tray", long_about = None)]
struct Args {
    /// Configuration file (default: <config dir>/redshift-tray/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Do not watch for fullscreen windows
    #[arg(long)]
    no_fullscreen: bool,

    /// Switch to manual mode once the daemon reports a temperature
    #[arg(long)]
    manual: bool,

    /// Extra arguments for redshift, after `--`
    #[arg(last = true, value_name = "REDSHIFT_ARGS")]
    daemon_args: Vec<String>,
}

impl Args {
    fn load_settings(&self) -> redtray_core::Result<Settings> {
        let mut settings = match &self.config {
            // An explicitly named config must be usable
            Some(path) => config::try_load_settings(path)?,
            None => config::default_config_path()
                .map(|path| config::load_settings(&path))
                .unwrap_or_default(),
        };

        if self.no_fullscreen {
            settings.fullscreen.enabled = false;
        }
        if self.manual {
            settings.behavior.start_in_manual_mode = true;
        }
        settings.daemon.args.extend(self.daemon_args.iter().cloned());
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    logging::init()?;

    let settings = args.load_settings()?;
    let window_query = if settings.fullscreen.enabled {
        detect_window_query()
    } else {
        None
    };

    let result = redshift_tray::run_headless(settings, window_query).await;
    if let Err(ref e) = result {
        error!("Application error: {:?}", e);
    }

    info!("redshift-tray exiting");
    Ok(result?)
}
