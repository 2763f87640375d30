//! Fire-and-forget redshift invocations
//!
//! One-shot runs apply a single setting (`-P -O <K>` or `-x`) and exit. Their
//! output is not part of the state protocol; each run is reaped by its own
//! task and failures are only logged.

use std::path::Path;
use std::process::Stdio;

use tokio::task::JoinHandle;

use crate::command::{spawn_error, DaemonInvocation, OneShot};
use redtray_core::prelude::*;

/// Handle to a running one-shot invocation
#[derive(Debug)]
pub struct OneShotRun {
    pub request: OneShot,
    pub pid: Option<u32>,
    reaper: JoinHandle<bool>,
}

impl OneShotRun {
    /// Wait for the run to be reaped; `true` if it exited successfully.
    ///
    /// Dropping the handle instead leaves the reaper running in the background.
    pub async fn wait(self) -> bool {
        self.reaper.await.unwrap_or(false)
    }
}

/// Start a one-shot run of `program`.
///
/// Spawn failures are returned; everything after the spawn is handled by the
/// reaper task.
pub fn spawn_oneshot(program: &Path, request: OneShot) -> Result<OneShotRun> {
    let invocation = DaemonInvocation::one_shot(program, request);
    debug!("Running one-shot: {}", invocation.argv().join(" "));

    let child = invocation
        .command()
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| spawn_error(program, e))?;

    let pid = child.id();
    let reaper = tokio::spawn(async move {
        match child.wait_with_output().await {
            Ok(output) if output.status.success() => {
                debug!("One-shot {} finished", request);
                true
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    "One-shot {} failed ({}): {}",
                    request,
                    output.status,
                    stderr.trim()
                );
                false
            }
            Err(e) => {
                warn!("Failed to reap one-shot {}: {}", request, e);
                false
            }
        }
    });

    Ok(OneShotRun {
        request,
        pid,
        reaper,
    })
}
