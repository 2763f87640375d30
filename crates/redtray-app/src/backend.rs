//! Daemon backend seam
//!
//! The controller never touches processes directly; it talks to a
//! [`DaemonBackend`]. [`ProcessBackend`] is the real implementation on top of
//! `redtray-daemon`, tests substitute a mock.

use std::path::PathBuf;

use tokio::sync::mpsc;

use redtray_core::prelude::*;
use redtray_core::DaemonEvent;
use redtray_daemon::{spawn_oneshot, DaemonInvocation, DaemonProcess, OneShot};

use crate::message::Message;

/// Buffer between a supervisor's reader tasks and the forwarding task
const DAEMON_EVENT_BUFFER: usize = 256;

/// Process operations the controller needs
#[cfg_attr(test, mockall::automock)]
pub trait DaemonBackend: Send {
    /// Start the long-lived automatic daemon. Its events are delivered as
    /// `Message::Daemon` tagged with `generation`.
    fn spawn_automatic(&mut self, generation: u64) -> Result<()>;

    /// Relay the toggle signal to the automatic daemon
    fn toggle_inhibit(&mut self) -> Result<()>;

    /// Graceful termination of the automatic daemon
    fn interrupt(&mut self) -> Result<()>;

    /// Forced termination of the automatic daemon
    fn kill(&mut self) -> Result<()>;

    /// Fire-and-forget invocation
    fn run_oneshot(&mut self, request: OneShot) -> Result<()>;

    /// Whether an automatic daemon is currently alive
    fn is_running(&self) -> bool;
}

/// Backend that runs the real redshift binary
pub struct ProcessBackend {
    program: PathBuf,
    args: Vec<String>,
    msg_tx: mpsc::Sender<Message>,
    current: Option<DaemonProcess>,
}

impl ProcessBackend {
    pub fn new(program: PathBuf, args: Vec<String>, msg_tx: mpsc::Sender<Message>) -> Self {
        Self {
            program,
            args,
            msg_tx,
            current: None,
        }
    }

    fn current(&self) -> Result<&DaemonProcess> {
        self.current.as_ref().ok_or(Error::NotRunning)
    }
}

impl DaemonBackend for ProcessBackend {
    fn spawn_automatic(&mut self, generation: u64) -> Result<()> {
        let invocation = DaemonInvocation::long_lived(&self.program, &self.args);
        let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(DAEMON_EVENT_BUFFER);
        let process = DaemonProcess::spawn(&invocation, event_tx)?;

        let msg_tx = self.msg_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if msg_tx
                    .send(Message::Daemon { generation, event })
                    .await
                    .is_err()
                {
                    debug!("Engine gone, stopping daemon event forwarding");
                    break;
                }
            }
        });

        // The previous daemon, if any, has already been interrupted; dropping it
        // force-kills anything still lingering.
        if let Some(previous) = self.current.replace(process) {
            debug!("Replacing daemon (pid {:?})", previous.id());
        }
        Ok(())
    }

    fn toggle_inhibit(&mut self) -> Result<()> {
        self.current()?.toggle_inhibit()
    }

    fn interrupt(&mut self) -> Result<()> {
        self.current()?.terminate()
    }

    fn kill(&mut self) -> Result<()> {
        match self.current.as_mut() {
            Some(process) => process.kill(),
            None => Err(Error::NotRunning),
        }
    }

    fn run_oneshot(&mut self, request: OneShot) -> Result<()> {
        spawn_oneshot(&self.program, request).map(|run| {
            debug!("One-shot {} started (pid {:?})", run.request, run.pid);
        })
    }

    fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(DaemonProcess::is_running)
    }
}
