//! Test utilities for daemon types
//!
//! Provides throwaway `redshift` stand-ins written as shell scripts.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::command::DaemonInvocation;

const SCRIPT_NAME: &str = "redshift";
const INVOCATION_LOG: &str = "invocations.log";

/// A fake redshift executable living in its own temporary directory.
///
/// Every run appends its argument list to `invocations.log` next to the
/// script before executing `body`. The directory is removed on drop.
pub struct FakeDaemon {
    dir: TempDir,
    path: PathBuf,
}

impl FakeDaemon {
    /// Creates an executable `/bin/sh` script running `body`.
    ///
    /// # Panics
    /// Panics if the temporary directory or script cannot be created.
    pub fn new(body: &str) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join(SCRIPT_NAME);
        let log = dir.path().join(INVOCATION_LOG);

        let script = format!(
            "#!/bin/sh\necho \"$*\" >> '{}'\n{}\n",
            log.display(),
            body
        );
        fs::write(&path, script).expect("failed to write fake daemon");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("failed to mark fake daemon executable");

        Self { dir, path }
    }

    /// Path to the fake executable
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the script, useful for marker files
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Long-lived invocation of the fake daemon
    pub fn invocation(&self, args: &[String]) -> DaemonInvocation {
        DaemonInvocation::long_lived(&self.path, args)
    }

    /// Argument lists of every run so far, oldest first
    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(self.dir.path().join(INVOCATION_LOG))
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}
