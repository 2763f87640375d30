//! State controller
//!
//! Owns [`DaemonState`] and the daemon backend. All mutation happens on the
//! engine loop: daemon output, consumer commands, watcher transitions and
//! timer expiries are fed in one at a time, and every real state change is
//! published exactly once as a [`ControllerEvent`].
//!
//! ```text
//! Starting ──spawn──▶ Running(automatic) ◀──mode switch──▶ Running(manual)
//!                            │                                   │
//!                            └──── daemon exit / terminate ──────┴──▶ Stopped
//! ```

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use redtray_core::prelude::*;
use redtray_core::{
    ControlCommand, ControlMode, ControllerEvent, DaemonEvent, DaemonExit, DaemonState,
};
use redtray_daemon::{decode_key_change, parse_line, KeyChange, OneShot};

use crate::backend::DaemonBackend;
use crate::message::Message;
use crate::suspend::SuspendTimer;

/// Capacity of the consumer event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Temperature range redshift accepts for `-O`
pub const MIN_TEMPERATURE: u32 = 1000;
pub const MAX_TEMPERATURE: u32 = 25000;

/// How long an interrupted automatic daemon may take to fade out and restore
/// gamma before manual settings are applied over it
pub const MANUAL_HANDOVER_TIMEOUT: Duration = Duration::from_secs(3);

/// Lifecycle of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running(ControlMode),
    Stopped,
}

/// Who asked for the current inhibition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InhibitReason {
    User,
    Fullscreen,
    Suspend,
}

pub struct Controller {
    state: DaemonState,
    phase: Phase,
    backend: Box<dyn DaemonBackend>,

    /// Generation of the current automatic daemon; output from older ones is dropped
    generation: u64,

    /// Inhibit value requested from the automatic daemon but not yet confirmed
    /// by a `Status` line
    pending_inhibit: Option<bool>,
    inhibit_reason: Option<InhibitReason>,

    /// The first `Status` line is always announced
    status_reported: bool,

    /// Kill was requested; the resulting exit is not an error
    kill_requested: bool,

    suspend: SuspendTimer,

    /// Deadline for the interrupted automatic daemon to exit. While set,
    /// manual one-shots are held back until that exit.
    manual_handover: Option<JoinHandle<()>>,

    inhibit_on_fullscreen: bool,
    msg_tx: mpsc::Sender<Message>,
    event_tx: broadcast::Sender<ControllerEvent>,
}

impl Controller {
    pub fn new(backend: Box<dyn DaemonBackend>, msg_tx: mpsc::Sender<Message>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: DaemonState::default(),
            phase: Phase::Starting,
            backend,
            generation: 0,
            pending_inhibit: None,
            inhibit_reason: None,
            status_reported: false,
            kill_requested: false,
            suspend: SuspendTimer::new(msg_tx.clone()),
            manual_handover: None,
            inhibit_on_fullscreen: true,
            msg_tx,
            event_tx,
        }
    }

    /// Whether entering fullscreen inhibits redshift
    pub fn with_fullscreen_inhibit(mut self, enabled: bool) -> Self {
        self.inhibit_on_fullscreen = enabled;
        self
    }

    /// Subscribe to state changes. Subscribe before [`start`](Self::start) to
    /// see the initial reports.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.event_tx.subscribe()
    }

    pub fn state(&self) -> &DaemonState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mode(&self) -> Option<ControlMode> {
        match self.phase {
            Phase::Running(mode) => Some(mode),
            _ => None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Stopped
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn suspend_pending(&self) -> bool {
        self.suspend.is_pending()
    }

    /// Spawn the automatic daemon. A failure here is fatal; nothing is running.
    pub fn start(&mut self) -> Result<()> {
        if self.phase != Phase::Starting {
            return Err(Error::invalid_request("controller already started"));
        }
        self.generation += 1;
        self.backend.spawn_automatic(self.generation)?;
        self.phase = Phase::Running(ControlMode::Automatic);
        info!("Controller running (generation {})", self.generation);
        Ok(())
    }

    fn emit(&self, event: ControllerEvent) {
        debug!("Emitting {}", event.event_type());
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn stop(&mut self) {
        if self.is_stopped() {
            return;
        }
        self.suspend.cancel();
        self.cancel_manual_handover();
        self.phase = Phase::Stopped;
        info!("Controller stopped");
        self.emit(ControllerEvent::Stopped);
    }

    // ─────────────────────────────────────────────────────────
    // Daemon output
    // ─────────────────────────────────────────────────────────

    pub fn handle_daemon_event(&mut self, generation: u64, event: DaemonEvent) {
        if self.is_stopped() {
            trace!("Stopped, ignoring daemon event {:?}", event);
            return;
        }
        if generation != self.generation {
            debug!(
                "Ignoring event from superseded daemon (generation {}, current {})",
                generation, self.generation
            );
            return;
        }

        match event {
            DaemonEvent::Stdout(line) => self.apply_line(&line),
            DaemonEvent::Stderr(line) => debug!("redshift stderr: {}", line),
            DaemonEvent::Exited(exit) => self.handle_exit(exit),
        }
    }

    /// Feed one stdout line. Lines not shaped like `Key: Value` are ignored.
    pub fn apply_line(&mut self, line: &str) {
        match parse_line(line) {
            Some((key, value)) => {
                self.apply_key_change(key, value);
            }
            None => trace!("Ignoring stdout line: {:?}", line),
        }
    }

    /// Apply one reported key. Returns `true` if an event was emitted.
    ///
    /// Only the automatic daemon's reports count; in manual mode the
    /// controller's own state is authoritative.
    pub fn apply_key_change(&mut self, key: &str, value: &str) -> bool {
        if self.mode() != Some(ControlMode::Automatic) {
            trace!("Not in automatic mode, ignoring {}: {}", key, value);
            return false;
        }

        let change = match decode_key_change(key, value) {
            Ok(Some(change)) => change,
            Ok(None) => {
                trace!("Unknown key {:?}", key);
                return false;
            }
            Err(e) => {
                warn!("Ignoring malformed line {:?}: {}", key, e);
                return false;
            }
        };

        match change {
            KeyChange::Status { inhibited } => {
                let first = !self.status_reported;
                self.status_reported = true;
                self.pending_inhibit = None;

                if !inhibited {
                    self.inhibit_reason = None;
                    self.state.manually_inhibited = false;
                }
                if inhibited == self.state.inhibited && !first {
                    return false;
                }
                self.state.inhibited = inhibited;
                self.emit(ControllerEvent::InhibitChanged { inhibited });
            }
            KeyChange::Temperature(kelvin) => {
                if kelvin == self.state.temperature {
                    return false;
                }
                self.state.temperature = kelvin;
                self.emit(ControllerEvent::TemperatureChanged { kelvin });
            }
            KeyChange::Period(period) => {
                if period == self.state.period {
                    return false;
                }
                self.state.period = period.clone();
                self.emit(ControllerEvent::PeriodChanged { period });
            }
            KeyChange::Location(location) => {
                if location == self.state.location {
                    return false;
                }
                self.state.location = location;
                self.emit(ControllerEvent::LocationChanged {
                    latitude: location.latitude,
                    longitude: location.longitude,
                });
            }
        }
        true
    }

    fn handle_exit(&mut self, exit: DaemonExit) {
        if self.mode() == Some(ControlMode::Manual) {
            debug!("Automatic daemon exited while in manual mode: {:?}", exit);
            self.finish_manual_handover();
            return;
        }

        if exit.success() {
            info!("redshift exited cleanly, restoring default gamma");
            if let Err(e) = self.backend.run_oneshot(OneShot::Reset) {
                warn!("Failed to reset gamma after exit: {}", e);
            }
        } else if self.kill_requested {
            info!("redshift killed on request");
        } else {
            let message = exit.error_text();
            error!("redshift failed: {}", message);
            self.emit(ControllerEvent::ErrorOccurred { message });
        }
        self.stop();
    }

    // ─────────────────────────────────────────────────────────
    // Consumer commands
    // ─────────────────────────────────────────────────────────

    pub fn handle_command(&mut self, command: ControlCommand) -> Result<()> {
        debug!("Command: {:?}", command);
        match command {
            ControlCommand::SetInhibit { inhibit } => self.set_inhibit(inhibit),
            ControlCommand::ToggleInhibit => self.toggle_inhibit(),
            ControlCommand::SetManualMode { manual } => self.set_manual_mode(manual),
            ControlCommand::SetTemperature { kelvin } => self.set_temperature(kelvin),
            ControlCommand::SuspendFor { minutes } => self.suspend_for(minutes),
            ControlCommand::Terminate => self.terminate(),
            ControlCommand::Kill => self.kill(),
        }
    }

    fn ensure_running(&self) -> Result<ControlMode> {
        match self.phase {
            Phase::Running(mode) => Ok(mode),
            Phase::Stopped => Err(Error::Stopped),
            Phase::Starting => Err(Error::NotRunning),
        }
    }

    /// Inhibit state including a request the daemon has not confirmed yet
    fn effective_inhibited(&self) -> bool {
        self.pending_inhibit.unwrap_or(self.state.inhibited)
    }

    /// User request. Forgets any pending suspend.
    pub fn set_inhibit(&mut self, inhibit: bool) -> Result<()> {
        self.ensure_running()?;
        self.suspend.cancel();
        self.request_inhibit(inhibit, InhibitReason::User)
    }

    pub fn toggle_inhibit(&mut self) -> Result<()> {
        let target = !self.effective_inhibited();
        self.set_inhibit(target)
    }

    fn request_inhibit(&mut self, inhibit: bool, reason: InhibitReason) -> Result<()> {
        let mode = self.ensure_running()?;
        if inhibit == self.effective_inhibited() {
            debug!("Already {}", if inhibit { "inhibited" } else { "enabled" });
            if inhibit {
                self.inhibit_reason = Some(reason);
            }
            return Ok(());
        }

        self.inhibit_reason = inhibit.then_some(reason);
        self.state.manually_inhibited = inhibit;

        match mode {
            ControlMode::Automatic => {
                // The daemon confirms with a Status line
                self.backend.toggle_inhibit()?;
                self.pending_inhibit = Some(inhibit);
            }
            ControlMode::Manual => {
                self.state.inhibited = inhibit;
                self.emit(ControllerEvent::InhibitChanged { inhibited: inhibit });
                self.apply_manual_temperature();
            }
        }
        Ok(())
    }

    /// Push the current manual state to the screen
    fn apply_manual_temperature(&mut self) {
        if self.manual_handover.is_some() {
            debug!("Automatic daemon still exiting, holding back manual one-shot");
            return;
        }

        let request = if self.state.inhibited {
            OneShot::Reset
        } else if self.state.temperature == 0 {
            warn!("No temperature known yet, resetting instead");
            OneShot::Reset
        } else {
            OneShot::Temperature(self.state.temperature)
        };

        if let Err(e) = self.backend.run_oneshot(request) {
            warn!("One-shot {} failed: {}", request, e);
        }
    }

    pub fn set_manual_mode(&mut self, manual: bool) -> Result<()> {
        let current = self.ensure_running()?;
        let target = if manual {
            ControlMode::Manual
        } else {
            ControlMode::Automatic
        };
        if current == target {
            debug!("Already in {} mode", target);
            return Ok(());
        }

        match target {
            ControlMode::Manual => {
                self.phase = Phase::Running(ControlMode::Manual);
                self.pending_inhibit = None;
                // redshift restores gamma on its way out; anything applied
                // before it exits would be overwritten
                match self.backend.interrupt() {
                    Ok(()) => self.begin_manual_handover(),
                    Err(e) => {
                        warn!("Failed to interrupt automatic daemon: {}", e);
                        self.apply_manual_temperature();
                    }
                }
            }
            ControlMode::Automatic => {
                self.cancel_manual_handover();
                if let Err(e) = self.backend.run_oneshot(OneShot::Reset) {
                    warn!("Failed to reset before respawn: {}", e);
                }
                self.generation += 1;
                if let Err(e) = self.backend.spawn_automatic(self.generation) {
                    error!("Failed to respawn redshift: {}", e);
                    self.emit(ControllerEvent::ErrorOccurred {
                        message: e.to_string(),
                    });
                    self.stop();
                    return Err(e);
                }
                self.phase = Phase::Running(ControlMode::Automatic);
                self.inhibit_reason = None;
                self.state.manually_inhibited = false;
            }
        }

        info!("Switched to {} mode", target);
        self.emit(ControllerEvent::ModeChanged { mode: target });
        Ok(())
    }

    fn begin_manual_handover(&mut self) {
        let generation = self.generation;
        let tx = self.msg_tx.clone();
        debug!(
            "Waiting for generation {} to exit before applying manual settings",
            generation
        );
        self.cancel_manual_handover();
        self.manual_handover = Some(tokio::spawn(async move {
            tokio::time::sleep(MANUAL_HANDOVER_TIMEOUT).await;
            let _ = tx.send(Message::ManualHandoverTimeout { generation }).await;
        }));
    }

    fn cancel_manual_handover(&mut self) {
        if let Some(deadline) = self.manual_handover.take() {
            deadline.abort();
        }
    }

    /// The interrupted daemon is gone; apply the manual state now.
    fn finish_manual_handover(&mut self) {
        if self.manual_handover.is_none() {
            return;
        }
        self.cancel_manual_handover();
        self.apply_manual_temperature();
    }

    /// The interrupted daemon did not exit in time. Kill it so it cannot
    /// restore gamma later, then apply the manual state.
    pub fn on_manual_handover_timeout(&mut self, generation: u64) {
        if self.manual_handover.is_none()
            || generation != self.generation
            || self.mode() != Some(ControlMode::Manual)
        {
            debug!("Ignoring stale manual handover deadline {}", generation);
            return;
        }
        warn!(
            "redshift still running {:?} after interrupt, killing it",
            MANUAL_HANDOVER_TIMEOUT
        );
        if let Err(e) = self.backend.kill() {
            debug!("Kill after interrupt failed: {}", e);
        }
        self.finish_manual_handover();
    }

    /// Whether manual settings are waiting for the automatic daemon to exit
    pub fn manual_handover_pending(&self) -> bool {
        self.manual_handover.is_some()
    }

    /// Apply an explicit temperature (manual mode only)
    pub fn set_temperature(&mut self, kelvin: u32) -> Result<()> {
        if self.ensure_running()? != ControlMode::Manual {
            return Err(Error::invalid_request(
                "temperature can only be set in manual mode",
            ));
        }
        if !(MIN_TEMPERATURE..=MAX_TEMPERATURE).contains(&kelvin) {
            return Err(Error::invalid_request(format!(
                "temperature {}K outside {}-{}K",
                kelvin, MIN_TEMPERATURE, MAX_TEMPERATURE
            )));
        }
        if kelvin == self.state.temperature {
            return Ok(());
        }

        self.state.temperature = kelvin;
        self.emit(ControllerEvent::TemperatureChanged { kelvin });
        if !self.state.inhibited {
            self.apply_manual_temperature();
        }
        Ok(())
    }

    /// Inhibit now and re-enable after `minutes`. Replaces any pending suspend.
    pub fn suspend_for(&mut self, minutes: u64) -> Result<()> {
        self.ensure_running()?;
        if minutes == 0 {
            return Err(Error::invalid_request("suspend duration must be positive"));
        }

        self.request_inhibit(true, InhibitReason::Suspend)?;
        let duration = Duration::from_secs(minutes.saturating_mul(60));
        self.suspend.schedule(duration);
        info!("Suspended for {} minutes", minutes);
        Ok(())
    }

    pub fn on_suspend_expired(&mut self, token: u64) {
        if self.is_stopped() || !self.suspend.take_expired(token) {
            debug!("Ignoring stale suspend expiry {}", token);
            return;
        }
        info!("Suspend expired, re-enabling");
        if let Err(e) = self.request_inhibit(false, InhibitReason::Suspend) {
            warn!("Failed to re-enable after suspend: {}", e);
        }
    }

    /// Transition reported by the fullscreen watcher
    pub fn set_fullscreen(&mut self, fullscreen: bool) {
        if self.is_stopped() || fullscreen == self.state.fullscreen {
            return;
        }
        self.state.fullscreen = fullscreen;
        self.emit(ControllerEvent::FullscreenChanged { fullscreen });

        if !self.inhibit_on_fullscreen {
            return;
        }
        let result = if fullscreen && !self.effective_inhibited() {
            self.request_inhibit(true, InhibitReason::Fullscreen)
        } else if !fullscreen && self.inhibit_reason == Some(InhibitReason::Fullscreen) {
            self.request_inhibit(false, InhibitReason::Fullscreen)
        } else {
            Ok(())
        };
        if let Err(e) = result {
            warn!("Fullscreen inhibit failed: {}", e);
        }
    }

    /// Graceful shutdown. In automatic mode `Stopped` follows the daemon's exit.
    pub fn terminate(&mut self) -> Result<()> {
        match self.phase {
            Phase::Stopped => Ok(()),
            Phase::Starting | Phase::Running(ControlMode::Manual) => {
                self.stop();
                Ok(())
            }
            Phase::Running(ControlMode::Automatic) => {
                self.suspend.cancel();
                self.backend.interrupt()
            }
        }
    }

    /// Forced shutdown
    pub fn kill(&mut self) -> Result<()> {
        match self.phase {
            Phase::Stopped => Ok(()),
            Phase::Starting | Phase::Running(ControlMode::Manual) => {
                if self.backend.is_running() {
                    if let Err(e) = self.backend.kill() {
                        debug!("Kill after interrupt failed: {}", e);
                    }
                }
                self.stop();
                Ok(())
            }
            Phase::Running(ControlMode::Automatic) => {
                self.kill_requested = true;
                self.suspend.cancel();
                self.backend.kill()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockDaemonBackend;
    use mockall::predicate::eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::broadcast::error::TryRecvError;

    fn running_backend() -> MockDaemonBackend {
        let mut backend = MockDaemonBackend::new();
        backend
            .expect_spawn_automatic()
            .with(eq(1))
            .times(1)
            .returning(|_| Ok(()));
        backend
    }

    type Harness = (
        Controller,
        broadcast::Receiver<ControllerEvent>,
        mpsc::Receiver<Message>,
    );

    fn started(backend: MockDaemonBackend) -> Harness {
        let (msg_tx, msg_rx) = mpsc::channel(16);
        let mut controller = Controller::new(Box::new(backend), msg_tx);
        let events = controller.subscribe();
        controller.start().unwrap();
        (controller, events, msg_rx)
    }

    fn drain(events: &mut broadcast::Receiver<ControllerEvent>) -> Vec<ControllerEvent> {
        let mut out = Vec::new();
        loop {
            match events.try_recv() {
                Ok(event) => out.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    fn stdout(controller: &mut Controller, line: &str) {
        let generation = controller.generation();
        controller.handle_daemon_event(generation, DaemonEvent::Stdout(line.to_string()));
    }

    /// Controller in manual mode at 4500K
    fn manual_at_4500(mut backend: MockDaemonBackend) -> Harness {
        backend.expect_interrupt().times(1).returning(|| Ok(()));
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Temperature(4500)))
            .times(1)
            .returning(|_| Ok(()));
        let (mut controller, mut events, msg_rx) = started(backend);
        stdout(&mut controller, "Color temperature: 4500K");
        controller.set_manual_mode(true).unwrap();
        controller.handle_daemon_event(1, DaemonEvent::Exited(DaemonExit::default()));
        drain(&mut events);
        (controller, events, msg_rx)
    }

    // ─────────────────────────────────────────────────────────
    // Key changes
    // ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_status_then_temperature_scenario() {
        let (mut controller, mut events, _rx) = started(running_backend());

        stdout(&mut controller, "Status: Enabled\n");
        stdout(&mut controller, "Color temperature: 4500K\n");

        assert_eq!(
            drain(&mut events),
            vec![
                ControllerEvent::InhibitChanged { inhibited: false },
                ControllerEvent::TemperatureChanged { kelvin: 4500 },
            ]
        );
        assert!(!controller.state().inhibited);
        assert_eq!(controller.state().temperature, 4500);
    }

    #[tokio::test]
    async fn test_each_key_updates_only_its_field() {
        let (mut controller, mut events, _rx) = started(running_backend());

        let before = controller.state().clone();
        assert!(controller.apply_key_change("Period", "Night"));
        let after = controller.state().clone();
        assert_eq!(after.period, "Night");
        assert_eq!(
            DaemonState {
                period: before.period.clone(),
                ..after.clone()
            },
            before
        );

        assert!(controller.apply_key_change("Location", "42.00 N, 91.50 W"));
        assert_eq!(controller.state().location.latitude, 42.0);
        assert_eq!(controller.state().location.longitude, -91.5);
        assert_eq!(controller.state().period, "Night");

        assert_eq!(
            drain(&mut events),
            vec![
                ControllerEvent::PeriodChanged {
                    period: "Night".to_string()
                },
                ControllerEvent::LocationChanged {
                    latitude: 42.0,
                    longitude: -91.5
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_repeated_update_emits_once() {
        let (mut controller, mut events, _rx) = started(running_backend());

        for (key, value) in [
            ("Color temperature", "3700K"),
            ("Period", "Transition (40.00% day)"),
            ("Location", "55.70 N, 12.60 E"),
            ("Status", "Disabled"),
        ] {
            assert!(controller.apply_key_change(key, value), "{} first", key);
            assert!(!controller.apply_key_change(key, value), "{} second", key);
        }
        assert_eq!(drain(&mut events).len(), 4);
    }

    #[tokio::test]
    async fn test_first_status_always_announced() {
        let (mut controller, mut events, _rx) = started(running_backend());

        assert!(controller.apply_key_change("Status", "Enabled"));
        assert!(!controller.apply_key_change("Status", "Enabled"));
        assert_eq!(
            drain(&mut events),
            vec![ControllerEvent::InhibitChanged { inhibited: false }]
        );
    }

    #[tokio::test]
    async fn test_non_matching_lines_change_nothing() {
        let (mut controller, mut events, _rx) = started(running_backend());
        let before = controller.state().clone();

        for line in [
            "",
            "Using method `randr'.",
            "Status:Enabled",
            "Color temperature: warmK",
            "Location: nowhere",
            "Brightness: 0.90",
        ] {
            stdout(&mut controller, line);
        }

        assert_eq!(controller.state(), &before);
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_stale_generation_ignored() {
        let (mut controller, mut events, _rx) = started(running_backend());

        controller.handle_daemon_event(0, DaemonEvent::Stdout("Period: Night".to_string()));
        controller.handle_daemon_event(0, DaemonEvent::Exited(DaemonExit::default()));

        assert_eq!(controller.state().period, "Unknown");
        assert!(!controller.is_stopped());
        assert!(drain(&mut events).is_empty());
    }

    // ─────────────────────────────────────────────────────────
    // Exit handling
    // ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_abnormal_exit_reports_stderr_then_stops() {
        let (mut controller, mut events, _rx) = started(running_backend());

        controller.handle_daemon_event(
            1,
            DaemonEvent::Stderr("fatal: cannot open display".to_string()),
        );
        controller.handle_daemon_event(
            1,
            DaemonEvent::Exited(DaemonExit {
                code: Some(1),
                signal: None,
                stderr: "fatal: cannot open display\n".to_string(),
            }),
        );
        stdout(&mut controller, "Color temperature: 4500K");

        assert_eq!(
            drain(&mut events),
            vec![
                ControllerEvent::ErrorOccurred {
                    message: "fatal: cannot open display".to_string()
                },
                ControllerEvent::Stopped,
            ]
        );
        assert!(controller.is_stopped());
        assert_eq!(controller.state().temperature, 0);
    }

    #[tokio::test]
    async fn test_clean_exit_resets_then_stops() {
        let mut backend = running_backend();
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Reset))
            .times(1)
            .returning(|_| Ok(()));
        let (mut controller, mut events, _rx) = started(backend);

        controller.handle_daemon_event(
            1,
            DaemonEvent::Exited(DaemonExit {
                code: Some(0),
                ..Default::default()
            }),
        );

        assert_eq!(drain(&mut events), vec![ControllerEvent::Stopped]);
        assert!(controller.set_inhibit(true).is_err());
    }

    #[tokio::test]
    async fn test_kill_then_exit_is_not_an_error() {
        let mut backend = running_backend();
        backend.expect_kill().times(1).returning(|| Ok(()));
        let (mut controller, mut events, _rx) = started(backend);

        controller.kill().unwrap();
        controller.handle_daemon_event(
            1,
            DaemonEvent::Exited(DaemonExit {
                code: None,
                signal: Some(9),
                stderr: String::new(),
            }),
        );

        assert_eq!(drain(&mut events), vec![ControllerEvent::Stopped]);
    }

    #[tokio::test]
    async fn test_terminate_interrupts_automatic_daemon() {
        let mut backend = running_backend();
        backend.expect_interrupt().times(1).returning(|| Ok(()));
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Reset))
            .times(1)
            .returning(|_| Ok(()));
        let (mut controller, mut events, _rx) = started(backend);

        controller.terminate().unwrap();
        assert!(!controller.is_stopped());

        controller.handle_daemon_event(
            1,
            DaemonEvent::Exited(DaemonExit {
                code: Some(0),
                ..Default::default()
            }),
        );
        assert!(controller.is_stopped());
        assert_eq!(drain(&mut events), vec![ControllerEvent::Stopped]);

        // Nothing after stopped
        controller.terminate().unwrap();
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_propagates() {
        let mut backend = MockDaemonBackend::new();
        backend
            .expect_spawn_automatic()
            .returning(|_| Err(Error::daemon_not_found("redshift")));
        let (msg_tx, _rx) = mpsc::channel(4);
        let mut controller = Controller::new(Box::new(backend), msg_tx);

        let err = controller.start().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(controller.phase(), Phase::Starting);
    }

    // ─────────────────────────────────────────────────────────
    // Inhibit
    // ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_set_inhibit_relays_toggle_once() {
        let mut backend = running_backend();
        backend.expect_toggle_inhibit().times(1).returning(|| Ok(()));
        let (mut controller, mut events, _rx) = started(backend);
        stdout(&mut controller, "Status: Enabled");
        drain(&mut events);

        controller.set_inhibit(true).unwrap();
        // Repeated request before the daemon confirms does not toggle back
        controller.set_inhibit(true).unwrap();
        assert!(drain(&mut events).is_empty());

        stdout(&mut controller, "Status: Disabled");
        assert_eq!(
            drain(&mut events),
            vec![ControllerEvent::InhibitChanged { inhibited: true }]
        );
        assert!(controller.state().manually_inhibited);
    }

    #[tokio::test]
    async fn test_set_inhibit_to_current_value_is_noop() {
        let (mut controller, mut events, _rx) = started(running_backend());
        stdout(&mut controller, "Status: Enabled");
        drain(&mut events);

        controller.set_inhibit(false).unwrap();
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_manual_inhibit_resets_and_restores() {
        let mut backend = MockDaemonBackend::new();
        backend.expect_spawn_automatic().returning(|_| Ok(()));
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Reset))
            .times(1)
            .returning(|_| Ok(()));
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Temperature(4500)))
            .times(1)
            .returning(|_| Ok(()));
        let (mut controller, mut events, _rx) = manual_at_4500(backend);

        controller.set_inhibit(true).unwrap();
        controller.set_inhibit(false).unwrap();

        assert_eq!(
            drain(&mut events),
            vec![
                ControllerEvent::InhibitChanged { inhibited: true },
                ControllerEvent::InhibitChanged { inhibited: false },
            ]
        );
    }

    // ─────────────────────────────────────────────────────────
    // Mode switching
    // ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_enter_manual_mode_applies_after_daemon_exits() {
        let applied = Arc::new(AtomicUsize::new(0));
        let mut backend = running_backend();
        backend.expect_interrupt().times(1).returning(|| Ok(()));
        let counter = applied.clone();
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Temperature(4500)))
            .times(1)
            .returning(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
        let (mut controller, mut events, _rx) = started(backend);

        stdout(&mut controller, "Status: Enabled");
        stdout(&mut controller, "Color temperature: 4500K");
        drain(&mut events);

        controller.set_manual_mode(true).unwrap();
        assert_eq!(controller.mode(), Some(ControlMode::Manual));
        assert!(controller.manual_handover_pending());
        assert_eq!(
            drain(&mut events),
            vec![ControllerEvent::ModeChanged {
                mode: ControlMode::Manual
            }]
        );

        // Late output from the interrupted daemon is ignored
        stdout(&mut controller, "Color temperature: 3700K");
        stdout(&mut controller, "Period: Night");
        assert_eq!(applied.load(Ordering::SeqCst), 0);

        controller.handle_daemon_event(
            1,
            DaemonEvent::Exited(DaemonExit {
                code: Some(0),
                ..Default::default()
            }),
        );
        assert_eq!(applied.load(Ordering::SeqCst), 1);
        assert!(!controller.manual_handover_pending());
        assert_eq!(controller.state().temperature, 4500);
        assert!(!controller.is_stopped());
        assert!(drain(&mut events).is_empty());
    }

    #[tokio::test]
    async fn test_manual_changes_during_handover_apply_latest() {
        let mut backend = running_backend();
        backend.expect_interrupt().times(1).returning(|| Ok(()));
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Temperature(3200)))
            .times(1)
            .returning(|_| Ok(()));
        let (mut controller, mut events, _rx) = started(backend);
        stdout(&mut controller, "Color temperature: 4500K");

        controller.set_manual_mode(true).unwrap();
        controller.set_temperature(3200).unwrap();
        drain(&mut events);

        controller.handle_daemon_event(1, DaemonEvent::Exited(DaemonExit::default()));
        assert_eq!(controller.state().temperature, 3200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_handover_timeout_kills_lingering_daemon() {
        let mut backend = running_backend();
        let mut seq = mockall::Sequence::new();
        backend
            .expect_interrupt()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        backend
            .expect_kill()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Temperature(4500)))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let (mut controller, _events, mut msg_rx) = started(backend);
        stdout(&mut controller, "Color temperature: 4500K");

        controller.set_manual_mode(true).unwrap();
        let before = tokio::time::Instant::now();
        let msg = msg_rx.recv().await.unwrap();
        assert!(before.elapsed() >= MANUAL_HANDOVER_TIMEOUT);
        match msg {
            Message::ManualHandoverTimeout { generation } => {
                controller.on_manual_handover_timeout(generation)
            }
            other => panic!("unexpected message {:?}", other),
        }
        assert!(!controller.manual_handover_pending());

        // The killed daemon's exit changes nothing
        controller.handle_daemon_event(1, DaemonEvent::Exited(DaemonExit::default()));
        assert!(!controller.is_stopped());
    }

    #[tokio::test]
    async fn test_leaving_manual_mode_during_handover_skips_oneshot() {
        let mut backend = MockDaemonBackend::new();
        backend.expect_spawn_automatic().returning(|_| Ok(()));
        backend.expect_interrupt().times(1).returning(|| Ok(()));
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Reset))
            .times(1)
            .returning(|_| Ok(()));
        let (mut controller, _events, _rx) = started(backend);
        stdout(&mut controller, "Color temperature: 4500K");

        controller.set_manual_mode(true).unwrap();
        controller.set_manual_mode(false).unwrap();
        assert!(!controller.manual_handover_pending());

        // Stale deadline and exit from generation 1
        controller.on_manual_handover_timeout(1);
        controller.handle_daemon_event(1, DaemonEvent::Exited(DaemonExit::default()));
        assert_eq!(controller.mode(), Some(ControlMode::Automatic));
    }

    #[tokio::test]
    async fn test_leave_manual_mode_resets_and_respawns() {
        let mut backend = MockDaemonBackend::new();
        backend.expect_spawn_automatic().with(eq(1)).returning(|_| Ok(()));
        backend
            .expect_spawn_automatic()
            .with(eq(2))
            .times(1)
            .returning(|_| Ok(()));
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Reset))
            .times(1)
            .returning(|_| Ok(()));
        let (mut controller, mut events, _rx) = manual_at_4500(backend);

        controller.set_manual_mode(false).unwrap();
        assert_eq!(controller.mode(), Some(ControlMode::Automatic));
        assert_eq!(controller.generation(), 2);
        assert_eq!(
            drain(&mut events),
            vec![ControllerEvent::ModeChanged {
                mode: ControlMode::Automatic
            }]
        );

        // The old daemon's exit no longer matters, the new one reports
        controller.handle_daemon_event(1, DaemonEvent::Exited(DaemonExit::default()));
        stdout(&mut controller, "Color temperature: 5200K");
        assert!(!controller.is_stopped());
        assert_eq!(controller.state().temperature, 5200);
    }

    #[tokio::test]
    async fn test_set_temperature_requires_manual_mode() {
        let (mut controller, _events, _rx) = started(running_backend());
        let err = controller.set_temperature(4000).unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_set_temperature_in_manual_mode() {
        let mut backend = MockDaemonBackend::new();
        backend.expect_spawn_automatic().returning(|_| Ok(()));
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Temperature(3200)))
            .times(1)
            .returning(|_| Ok(()));
        let (mut controller, mut events, _rx) = manual_at_4500(backend);

        assert!(controller.set_temperature(500).is_err());
        controller.set_temperature(3200).unwrap();
        assert_eq!(
            drain(&mut events),
            vec![ControllerEvent::TemperatureChanged { kelvin: 3200 }]
        );
    }

    #[tokio::test]
    async fn test_manual_terminate_stops_immediately() {
        let mut backend = MockDaemonBackend::new();
        backend.expect_spawn_automatic().returning(|_| Ok(()));
        let (mut controller, mut events, _rx) = manual_at_4500(backend);

        controller.terminate().unwrap();
        assert!(controller.is_stopped());
        assert_eq!(drain(&mut events), vec![ControllerEvent::Stopped]);
    }

    // ─────────────────────────────────────────────────────────
    // Suspend
    // ─────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_suspend_replacement_reenables_once_at_last_deadline() {
        let mut backend = MockDaemonBackend::new();
        backend.expect_spawn_automatic().returning(|_| Ok(()));
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Reset))
            .times(1)
            .returning(|_| Ok(()));
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Temperature(4500)))
            .times(1)
            .returning(|_| Ok(()));
        let (mut controller, mut events, mut msg_rx) = manual_at_4500(backend);

        let start = tokio::time::Instant::now();
        controller.suspend_for(30).unwrap();
        controller.suspend_for(60).unwrap();
        assert_eq!(
            drain(&mut events),
            vec![ControllerEvent::InhibitChanged { inhibited: true }]
        );

        let mut reenabled_at = Vec::new();
        while let Ok(Some(msg)) =
            tokio::time::timeout(Duration::from_secs(3 * 3600), msg_rx.recv()).await
        {
            if let Message::SuspendExpired { token } = msg {
                controller.on_suspend_expired(token);
                for event in drain(&mut events) {
                    assert_eq!(event, ControllerEvent::InhibitChanged { inhibited: false });
                    reenabled_at.push(start.elapsed());
                }
            }
        }

        assert_eq!(reenabled_at.len(), 1);
        assert!(reenabled_at[0] >= Duration::from_secs(60 * 60));
        assert!(reenabled_at[0] < Duration::from_secs(61 * 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspend_in_automatic_mode_toggles_back() {
        let mut backend = running_backend();
        backend.expect_toggle_inhibit().times(2).returning(|| Ok(()));
        let (mut controller, mut events, mut msg_rx) = started(backend);
        stdout(&mut controller, "Status: Enabled");

        controller.suspend_for(1).unwrap();
        stdout(&mut controller, "Status: Disabled");

        let Some(Message::SuspendExpired { token }) = msg_rx.recv().await else {
            panic!("expected suspend expiry");
        };
        controller.on_suspend_expired(token);
        stdout(&mut controller, "Status: Enabled");

        assert_eq!(
            drain(&mut events),
            vec![
                ControllerEvent::InhibitChanged { inhibited: false },
                ControllerEvent::InhibitChanged { inhibited: true },
                ControllerEvent::InhibitChanged { inhibited: false },
            ]
        );
    }

    #[tokio::test]
    async fn test_user_toggle_cancels_suspend() {
        let mut backend = running_backend();
        backend.expect_toggle_inhibit().times(2).returning(|| Ok(()));
        let (mut controller, _events, _rx) = started(backend);
        stdout(&mut controller, "Status: Enabled");

        controller.suspend_for(30).unwrap();
        assert!(controller.suspend_pending());
        stdout(&mut controller, "Status: Disabled");

        controller.toggle_inhibit().unwrap();
        assert!(!controller.suspend_pending());
    }

    #[tokio::test]
    async fn test_suspend_zero_minutes_rejected() {
        let (mut controller, _events, _rx) = started(running_backend());
        assert!(matches!(
            controller.suspend_for(0),
            Err(Error::InvalidRequest { .. })
        ));
    }

    // ─────────────────────────────────────────────────────────
    // Fullscreen
    // ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_fullscreen_inhibits_and_restores() {
        let mut backend = running_backend();
        backend.expect_toggle_inhibit().times(2).returning(|| Ok(()));
        let (mut controller, mut events, _rx) = started(backend);
        stdout(&mut controller, "Status: Enabled");
        drain(&mut events);

        controller.set_fullscreen(true);
        stdout(&mut controller, "Status: Disabled");
        controller.set_fullscreen(false);
        stdout(&mut controller, "Status: Enabled");

        assert_eq!(
            drain(&mut events),
            vec![
                ControllerEvent::FullscreenChanged { fullscreen: true },
                ControllerEvent::InhibitChanged { inhibited: true },
                ControllerEvent::FullscreenChanged { fullscreen: false },
                ControllerEvent::InhibitChanged { inhibited: false },
            ]
        );
    }

    #[tokio::test]
    async fn test_leaving_fullscreen_keeps_user_inhibit() {
        let mut backend = running_backend();
        backend.expect_toggle_inhibit().times(1).returning(|| Ok(()));
        let (mut controller, mut events, _rx) = started(backend);
        stdout(&mut controller, "Status: Enabled");

        controller.set_inhibit(true).unwrap();
        stdout(&mut controller, "Status: Disabled");
        controller.set_fullscreen(true);
        controller.set_fullscreen(false);
        drain(&mut events);

        assert!(controller.state().inhibited);
    }

    #[tokio::test]
    async fn test_fullscreen_inhibit_disabled() {
        let (msg_tx, _rx) = mpsc::channel(4);
        let mut controller =
            Controller::new(Box::new(running_backend()), msg_tx).with_fullscreen_inhibit(false);
        let mut events = controller.subscribe();
        controller.start().unwrap();

        controller.set_fullscreen(true);
        controller.set_fullscreen(true);
        assert_eq!(
            drain(&mut events),
            vec![ControllerEvent::FullscreenChanged { fullscreen: true }]
        );
        assert!(controller.state().fullscreen);
    }
}
