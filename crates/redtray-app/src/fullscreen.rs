//! Fullscreen watcher
//!
//! Polls the window manager from a dedicated thread and reports transitions
//! of the active window's fullscreen state. Window manager queries may block,
//! so they never run on the engine loop; results are marshaled back as
//! `Message::Watcher` and the thread never touches controller state.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use redtray_core::prelude::*;

use crate::message::{Message, WatcherEvent};

/// Granularity of the cancellation check while sleeping between polls
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Capability to ask the window manager about the focused window
#[cfg_attr(test, mockall::automock)]
pub trait WindowQuery: Send {
    /// Whether the currently active window is fullscreen
    fn active_window_fullscreen(&mut self) -> Result<bool>;
}

/// Handle to the watcher thread
pub struct FullscreenWatcher {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FullscreenWatcher {
    /// Start polling `query` every `interval`.
    pub fn spawn(
        query: Box<dyn WindowQuery>,
        interval: Duration,
        msg_tx: mpsc::Sender<Message>,
    ) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);

        let handle = std::thread::Builder::new()
            .name("fullscreen-watcher".to_string())
            .spawn(move || {
                let mut query = query;
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    poll_loop(query.as_mut(), interval, &thread_cancel, &msg_tx)
                }));

                let clean = outcome.is_ok();
                if clean {
                    debug!("Fullscreen watcher stopped");
                } else {
                    error!("Fullscreen watcher panicked");
                }
                let _ = msg_tx.blocking_send(Message::Watcher(WatcherEvent::Completed { clean }));
            })?;

        info!("Fullscreen watcher started (interval {:?})", interval);
        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }

    /// Request the loop to stop before its next query.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// Block until the thread has unwound. Returns `false` if it panicked.
    pub fn join(mut self) -> bool {
        match self.handle.take() {
            Some(handle) => handle.join().is_ok(),
            None => true,
        }
    }
}

impl Drop for FullscreenWatcher {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Probe for a window manager query capability.
///
/// Returns `None` when none is available; the watcher is then never created.
pub fn detect_window_query() -> Option<Box<dyn WindowQuery>> {
    #[cfg(feature = "x11")]
    {
        match crate::x11::X11FullscreenQuery::connect() {
            Ok(query) => return Some(Box::new(query)),
            Err(e) => info!("Fullscreen detection unavailable: {}", e),
        }
    }

    #[cfg(not(feature = "x11"))]
    info!("Fullscreen detection unavailable: built without X11 support");

    None
}

fn poll_loop(
    query: &mut dyn WindowQuery,
    interval: Duration,
    cancel: &AtomicBool,
    msg_tx: &mpsc::Sender<Message>,
) {
    let mut last_known = false;

    while !cancel.load(Ordering::Acquire) {
        match query.active_window_fullscreen() {
            Ok(fullscreen) if fullscreen != last_known => {
                debug!("Active window fullscreen: {}", fullscreen);
                last_known = fullscreen;
                let msg = Message::Watcher(WatcherEvent::Changed(fullscreen));
                if msg_tx.blocking_send(msg).is_err() {
                    debug!("Engine gone, stopping fullscreen watcher");
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => debug!("Fullscreen query failed, retrying next poll: {}", e),
        }

        sleep_unless_cancelled(interval, cancel);
    }
}

fn sleep_unless_cancelled(duration: Duration, cancel: &AtomicBool) {
    let deadline = Instant::now() + duration;
    while !cancel.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(CANCEL_CHECK_INTERVAL.min(deadline - now));
    }
}
