//! Suspend timer
//!
//! At most one suspend is pending. Scheduling a new one aborts the previous
//! timer task, and every expiry carries a token so an expiry that raced with
//! a reschedule is recognised as stale and dropped.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use redtray_core::prelude::*;

use crate::message::Message;

pub struct SuspendTimer {
    msg_tx: mpsc::Sender<Message>,
    next_token: u64,
    pending: Option<(u64, JoinHandle<()>)>,
}

impl SuspendTimer {
    pub fn new(msg_tx: mpsc::Sender<Message>) -> Self {
        Self {
            msg_tx,
            next_token: 0,
            pending: None,
        }
    }

    /// Replace any pending timer with one firing after `duration`.
    pub fn schedule(&mut self, duration: Duration) -> u64 {
        self.cancel();

        self.next_token += 1;
        let token = self.next_token;
        let tx = self.msg_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(Message::SuspendExpired { token }).await;
        });

        debug!("Suspend {} scheduled for {:?}", token, duration);
        self.pending = Some((token, handle));
        token
    }

    pub fn cancel(&mut self) {
        if let Some((token, handle)) = self.pending.take() {
            debug!("Suspend {} cancelled", token);
            handle.abort();
        }
    }

    /// Claim an expiry. Returns `false` for stale tokens.
    pub fn take_expired(&mut self, token: u64) -> bool {
        match &self.pending {
            Some((current, _)) if *current == token => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

impl Drop for SuspendTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
