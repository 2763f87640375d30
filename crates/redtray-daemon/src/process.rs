//! Long-lived redshift process supervision

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;

use crate::command::{spawn_error, DaemonInvocation};
use crate::protocol::LineBuffer;
use redtray_core::prelude::*;
use redtray_core::{DaemonEvent, DaemonExit};

/// Signal redshift treats as "toggle inhibition"
pub const TOGGLE_SIGNAL: Signal = Signal::SIGUSR1;

/// Signal used for graceful termination
pub const TERMINATE_SIGNAL: Signal = Signal::SIGINT;

const READ_CHUNK: usize = 256;

/// Upper bound on waiting for the output pipes after the process exits.
/// A grandchild holding the pipes open must not delay the exit report forever.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Manages the long-lived redshift child process.
///
/// The `Child` handle is moved into a dedicated `wait_for_exit` task which
/// reaps it, drains both output readers, and only then emits
/// `DaemonEvent::Exited`. Stdout lines therefore always arrive before the exit
/// report on the same channel.
pub struct DaemonProcess {
    /// Process ID used for signal relay
    pid: Option<u32>,
    /// One-shot sender that tells the wait task to force-kill the process.
    /// Consumed on first use (or on drop).
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set to `true` by the wait task once the child has been reaped.
    exited: Arc<AtomicBool>,
    /// Notified by the wait task immediately after the child exits.
    exit_notify: Arc<Notify>,
}

impl DaemonProcess {
    /// Spawn the daemon and start supervising it.
    ///
    /// Returns as soon as the process is started; output and the exit report
    /// are delivered on `event_tx`.
    pub fn spawn(
        invocation: &DaemonInvocation,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Result<Self> {
        info!("Spawning redshift: {}", invocation.argv().join(" "));

        let mut child = invocation
            .command()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&invocation.program, e))?;

        let pid = child.id();
        info!("redshift started with PID: {:?}", pid);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::process("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::process("stderr was not captured"))?;

        let stdout_task = tokio::spawn(Self::read_stream(
            stdout,
            event_tx.clone(),
            DaemonEvent::Stdout,
            false,
        ));
        let stderr_task = tokio::spawn(Self::read_stream(
            stderr,
            event_tx.clone(),
            DaemonEvent::Stderr,
            true,
        ));

        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            stdout_task,
            stderr_task,
            event_tx,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
        ));

        Ok(Self {
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
        })
    }

    /// Read one output stream, forwarding complete lines in arrival order.
    ///
    /// Returns the accumulated text when `collect` is set (used for stderr).
    async fn read_stream<R>(
        mut stream: R,
        tx: mpsc::Sender<DaemonEvent>,
        wrap: fn(String) -> DaemonEvent,
        collect: bool,
    ) -> String
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = LineBuffer::new();
        let mut collected = String::new();
        let mut chunk = [0u8; READ_CHUNK];
        let mut receiver_open = true;

        loop {
            let n = match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("Error reading redshift output: {}", e);
                    break;
                }
            };

            for line in buffer.push(&chunk[..n]) {
                trace!("redshift: {}", line);
                if collect {
                    collected.push_str(&line);
                    collected.push('\n');
                }
                if receiver_open && tx.send(wrap(line)).await.is_err() {
                    debug!("redshift output channel closed");
                    receiver_open = false;
                }
            }
        }

        if let Some(tail) = buffer.finish() {
            trace!("redshift (unterminated): {}", tail);
            if collect {
                collected.push_str(&tail);
            }
            if receiver_open {
                let _ = tx.send(wrap(tail)).await;
            }
        }

        collected
    }

    /// Background task: owns `child`, waits for it to exit, emits `DaemonEvent::Exited`.
    ///
    /// Two ways the task can end:
    /// 1. redshift exits on its own (or after a relayed signal).
    /// 2. `kill_rx` fires: the child is killed first, then reaped.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        stdout_task: JoinHandle<String>,
        stderr_task: JoinHandle<String>,
        event_tx: mpsc::Sender<DaemonEvent>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
    ) {
        let status: Option<ExitStatus> = tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("redshift exited with status: {:?}", status);
                        Some(status)
                    }
                    Err(e) => {
                        error!("Error waiting for redshift: {}", e);
                        None
                    }
                }
            }
            Ok(()) = kill_rx => {
                info!("Kill requested, force-killing redshift");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill redshift: {}", e);
                }
                match child.wait().await {
                    Ok(status) => {
                        info!("redshift killed, exit status: {:?}", status);
                        Some(status)
                    }
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        None
                    }
                }
            }
        };

        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();

        let mut stdout_task = stdout_task;
        let mut stderr_task = stderr_task;
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            if let Err(e) = (&mut stdout_task).await {
                warn!("stdout reader failed: {}", e);
            }
            match (&mut stderr_task).await {
                Ok(text) => text,
                Err(e) => {
                    warn!("stderr reader failed: {}", e);
                    String::new()
                }
            }
        })
        .await;

        let stderr = match drained {
            Ok(text) => text,
            Err(_) => {
                warn!("Timed out draining redshift output");
                // Nothing may follow the exit report
                stdout_task.abort();
                stderr_task.abort();
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                String::new()
            }
        };

        let exit = decode_exit(status, stderr);
        debug!(
            "Sending DaemonEvent::Exited {{ code: {:?}, signal: {:?} }}",
            exit.code, exit.signal
        );
        let _ = event_tx.send(DaemonEvent::Exited(exit)).await;
    }

    /// Deliver a signal to the daemon.
    ///
    /// A process that has already exited is not an error: the exit report is
    /// on its way and the signal no longer matters.
    pub fn signal(&self, signal: Signal) -> Result<()> {
        if self.has_exited() {
            debug!("redshift already exited, dropping {}", signal.as_str());
            return Ok(());
        }
        let Some(pid) = self.pid else {
            debug!("redshift has no PID, dropping {}", signal.as_str());
            return Ok(());
        };

        debug!("Sending {} to redshift ({})", signal.as_str(), pid);
        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => {
                debug!("redshift ({}) gone before {} arrived", pid, signal.as_str());
                Ok(())
            }
            Err(e) => Err(Error::signal(signal.as_str(), e.to_string())),
        }
    }

    /// Ask redshift to toggle inhibition
    pub fn toggle_inhibit(&self) -> Result<()> {
        self.signal(TOGGLE_SIGNAL)
    }

    /// Graceful termination (SIGINT); redshift restores the screen before exiting.
    pub fn terminate(&self) -> Result<()> {
        self.signal(TERMINATE_SIGNAL)
    }

    /// Force kill via the wait task, which reaps the child before reporting.
    pub fn kill(&mut self) -> Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        warn!("Force killing redshift");
        match self.kill_tx.take() {
            // Ignore send error: the wait task may have already finished.
            Some(tx) => {
                let _ = tx.send(());
                Ok(())
            }
            None => self.signal(Signal::SIGKILL),
        }
    }

    /// Wait up to `timeout` for the process to exit.
    pub async fn wait_exited(&self, timeout: Duration) -> bool {
        // Create the future before the check so a notification between the
        // check and the await is not lost.
        let notified = self.exit_notify.notified();
        if self.has_exited() {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok() || self.has_exited()
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("DaemonProcess dropped while redshift may still be running");
            if let Some(tx) = self.kill_tx.take() {
                let _ = tx.send(());
            }
        }
        debug!("DaemonProcess dropped");
    }
}

fn decode_exit(status: Option<ExitStatus>, stderr: String) -> DaemonExit {
    match status {
        Some(status) => DaemonExit {
            code: status.code(),
            signal: status.signal(),
            stderr,
        },
        None => DaemonExit {
            code: None,
            signal: None,
            stderr,
        },
    }
}
