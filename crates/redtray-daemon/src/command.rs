//! Building redshift command lines
//!
//! Every invocation shares the same environment handling: the parent
//! environment is inherited, except the locale variables which are forced to
//! `C` so the stdout keys stay parseable whatever language the user runs.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use redtray_core::prelude::*;

/// Flag that makes redshift report its state on stdout
pub const VERBOSE_FLAG: &str = "-v";

/// Locale variables overridden for every child
pub const LOCALE_VARS: [&str; 4] = ["LANG", "LANGUAGE", "LC_ALL", "LC_MESSAGES"];

/// Locale forced onto the child
pub const DEFAULT_LOCALE: &str = "C";

/// A single-shot request that applies one setting and exits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneShot {
    /// Apply exactly this temperature (`-P -O <kelvin>`)
    Temperature(u32),
    /// Restore the default gamma ramps (`-x`)
    Reset,
}

impl OneShot {
    pub fn args(&self) -> Vec<String> {
        match self {
            OneShot::Temperature(kelvin) => {
                vec!["-P".to_string(), "-O".to_string(), kelvin.to_string()]
            }
            OneShot::Reset => vec!["-x".to_string()],
        }
    }
}

impl std::fmt::Display for OneShot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OneShot::Temperature(kelvin) => write!(f, "set {}K", kelvin),
            OneShot::Reset => write!(f, "reset"),
        }
    }
}

/// Program and arguments for one redshift run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl DaemonInvocation {
    /// Long-lived automatic daemon; `-v` is present exactly once.
    pub fn long_lived(program: impl Into<PathBuf>, args: &[String]) -> Self {
        let mut args: Vec<String> = args.to_vec();

        match args.iter().position(|a| a == VERBOSE_FLAG) {
            None => args.insert(0, VERBOSE_FLAG.to_string()),
            Some(first) => {
                let mut index = 0;
                args.retain(|a| {
                    let keep = a != VERBOSE_FLAG || index == first;
                    index += 1;
                    keep
                });
            }
        }

        Self {
            program: program.into(),
            args,
        }
    }

    /// Fire-and-forget invocation for a single setting.
    pub fn one_shot(program: impl Into<PathBuf>, request: OneShot) -> Self {
        Self {
            program: program.into(),
            args: request.args(),
        }
    }

    /// Full argv, program first
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    /// Build the command with the forced locale.
    ///
    /// Stdio is left to the caller.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        for key in LOCALE_VARS {
            cmd.env(key, DEFAULT_LOCALE);
        }
        cmd.stdin(Stdio::null());
        cmd
    }
}

/// Resolve the daemon binary through `PATH` (or verify an explicit path).
pub fn resolve_binary(binary: &str) -> Result<PathBuf> {
    let resolved = which::which(binary).map_err(|e| {
        debug!("Failed to resolve {}: {}", binary, e);
        Error::daemon_not_found(binary)
    })?;
    debug!("Resolved {} to {}", binary, resolved.display());
    Ok(resolved)
}

/// Map an OS spawn failure to the error taxonomy.
pub(crate) fn spawn_error(program: &Path, err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::NotFound {
        Error::daemon_not_found(program.display().to_string())
    } else {
        Error::process_spawn(format!("{}: {}", program.display(), err))
    }
}
