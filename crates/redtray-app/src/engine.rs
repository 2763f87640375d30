//! Engine - orchestration for the tray controller
//!
//! The Engine owns the message channel, the [`Controller`], the optional
//! fullscreen watcher and the settings. Runners (headless today) subscribe to
//! controller events, feed commands through [`Engine::msg_sender`], and drive
//! [`Engine::run`] until the controller stops.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use redtray_core::prelude::*;
use redtray_core::{ControlCommand, ControllerEvent};
use redtray_daemon::resolve_binary;

use crate::backend::{DaemonBackend, ProcessBackend};
use crate::config::Settings;
use crate::controller::Controller;
use crate::fullscreen::{FullscreenWatcher, WindowQuery};
use crate::message::{Message, WatcherEvent};
use crate::signals;

/// Capacity of the engine message channel
const MESSAGE_BUFFER: usize = 256;

/// How long a graceful shutdown may take before the daemon is killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Engine {
    controller: Controller,
    settings: Settings,
    msg_tx: mpsc::Sender<Message>,
    msg_rx: mpsc::Receiver<Message>,

    /// Capability handed to the watcher on start
    window_query: Option<Box<dyn WindowQuery>>,
    watcher: Option<FullscreenWatcher>,

    /// Switch to manual mode once the daemon has reported a temperature
    manual_pending: bool,
    quit_requested: bool,
}

impl Engine {
    /// Resolve the daemon binary and build the engine.
    ///
    /// Nothing is spawned until [`start`](Self::start).
    pub fn new(settings: Settings, window_query: Option<Box<dyn WindowQuery>>) -> Result<Self> {
        let program = resolve_binary(&settings.daemon.binary)?;
        let (msg_tx, msg_rx) = mpsc::channel::<Message>(MESSAGE_BUFFER);
        let backend = ProcessBackend::new(program, settings.daemon.args.clone(), msg_tx.clone());
        Ok(Self::with_backend(
            settings,
            Box::new(backend),
            msg_tx,
            msg_rx,
            window_query,
        ))
    }

    pub(crate) fn with_backend(
        settings: Settings,
        backend: Box<dyn DaemonBackend>,
        msg_tx: mpsc::Sender<Message>,
        msg_rx: mpsc::Receiver<Message>,
        window_query: Option<Box<dyn WindowQuery>>,
    ) -> Self {
        let controller = Controller::new(backend, msg_tx.clone())
            .with_fullscreen_inhibit(settings.fullscreen.inhibit_on_fullscreen);

        Self {
            controller,
            settings,
            msg_tx,
            msg_rx,
            window_query,
            watcher: None,
            manual_pending: false,
            quit_requested: false,
        }
    }

    /// Subscribe to controller events.
    ///
    /// If the subscriber falls behind, older events are dropped and the
    /// receiver reports `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.controller.subscribe()
    }

    /// Sender for commands and other messages into the loop
    pub fn msg_sender(&self) -> mpsc::Sender<Message> {
        self.msg_tx.clone()
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn has_watcher(&self) -> bool {
        self.watcher.is_some()
    }

    /// Spawn the daemon, then the watcher and signal handlers.
    ///
    /// If setup fails after the daemon is up, the daemon is killed before the
    /// error is returned.
    pub fn start(&mut self) -> Result<()> {
        self.controller.start()?;

        if let Err(e) = self.start_watcher() {
            error!("Setup failed after spawning redshift: {}", e);
            if let Err(kill_err) = self.controller.kill() {
                warn!("Failed to kill redshift: {}", kill_err);
            }
            return Err(e);
        }

        signals::spawn_signal_handler(self.msg_tx.clone());
        signals::spawn_toggle_handler(self.msg_tx.clone());

        self.manual_pending = self.settings.behavior.start_in_manual_mode;
        Ok(())
    }

    fn start_watcher(&mut self) -> Result<()> {
        if !self.settings.fullscreen.enabled {
            info!("Fullscreen watcher disabled");
            return Ok(());
        }
        let Some(query) = self.window_query.take() else {
            info!("No window manager query available, fullscreen watcher not started");
            return Ok(());
        };

        let watcher = FullscreenWatcher::spawn(
            query,
            self.settings.fullscreen.poll_interval(),
            self.msg_tx.clone(),
        )?;
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Process a single message.
    pub fn process_message(&mut self, msg: Message) {
        match msg {
            Message::Daemon { generation, event } => {
                self.controller.handle_daemon_event(generation, event);
                self.maybe_enter_manual_mode();
            }
            Message::Command(command) => {
                if let Err(e) = self.process_command(command) {
                    if e.is_recoverable() {
                        warn!("Command {:?} rejected: {}", command, e);
                    } else {
                        error!("Command {:?} failed: {}", command, e);
                    }
                }
            }
            Message::Watcher(WatcherEvent::Changed(fullscreen)) => {
                self.controller.set_fullscreen(fullscreen);
            }
            Message::Watcher(WatcherEvent::Completed { clean }) => {
                if clean {
                    debug!("Fullscreen watcher completed");
                } else {
                    warn!("Fullscreen watcher terminated abnormally");
                }
            }
            Message::SuspendExpired { token } => self.controller.on_suspend_expired(token),
            Message::ManualHandoverTimeout { generation } => {
                self.controller.on_manual_handover_timeout(generation)
            }
            Message::ToggleSignal => {
                if let Err(e) = self.controller.toggle_inhibit() {
                    warn!("Toggle failed: {}", e);
                }
            }
            Message::Quit => self.request_quit(),
            Message::ShutdownTimeout => {
                if !self.controller.is_stopped() {
                    warn!("redshift did not exit within {:?}, killing", SHUTDOWN_GRACE);
                    if let Err(e) = self.controller.kill() {
                        error!("Failed to kill redshift: {}", e);
                    }
                }
            }
        }
    }

    /// Apply a consumer command, returning the controller's rejection if any.
    pub fn process_command(&mut self, command: ControlCommand) -> Result<()> {
        self.controller.handle_command(command)
    }

    fn maybe_enter_manual_mode(&mut self) {
        if !self.manual_pending || self.controller.state().temperature == 0 {
            return;
        }
        self.manual_pending = false;
        if let Err(e) = self.controller.set_manual_mode(true) {
            warn!("Failed to enter manual mode: {}", e);
        }
    }

    /// First quit is graceful with a deadline, a second one kills.
    fn request_quit(&mut self) {
        if self.quit_requested {
            warn!("Second quit request, killing redshift");
            if let Err(e) = self.controller.kill() {
                error!("Failed to kill redshift: {}", e);
            }
            return;
        }
        self.quit_requested = true;

        if let Err(e) = self.controller.terminate() {
            warn!("Graceful termination failed: {}", e);
        }
        if !self.controller.is_stopped() {
            let tx = self.msg_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(SHUTDOWN_GRACE).await;
                let _ = tx.send(Message::ShutdownTimeout).await;
            });
        }
    }

    /// Wait for the next message, for runners that multiplex their own inputs.
    pub async fn next_message(&mut self) -> Option<Message> {
        self.msg_rx.recv().await
    }

    /// Process messages until the controller stops.
    pub async fn run(&mut self) {
        while !self.controller.is_stopped() {
            match self.next_message().await {
                Some(msg) => self.process_message(msg),
                None => break,
            }
        }
        info!("Engine loop finished");
    }

    /// Stop the watcher and wait for its thread to unwind.
    pub async fn shutdown(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.cancel();
            match tokio::task::spawn_blocking(move || watcher.join()).await {
                Ok(true) => debug!("Fullscreen watcher joined"),
                Ok(false) => warn!("Fullscreen watcher thread panicked"),
                Err(e) => warn!("Failed to join fullscreen watcher: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockDaemonBackend;
    use crate::fullscreen::MockWindowQuery;
    use mockall::predicate::eq;
    use redtray_core::{ControlMode, DaemonEvent, DaemonExit};
    use redtray_daemon::OneShot;

    fn engine(backend: MockDaemonBackend, settings: Settings) -> Engine {
        let (msg_tx, msg_rx) = mpsc::channel(16);
        Engine::with_backend(settings, Box::new(backend), msg_tx, msg_rx, None)
    }

    fn spawning_backend() -> MockDaemonBackend {
        let mut backend = MockDaemonBackend::new();
        backend.expect_spawn_automatic().returning(|_| Ok(()));
        backend
    }

    fn stdout(engine: &mut Engine, line: &str) {
        let generation = engine.controller().generation();
        engine.process_message(Message::Daemon {
            generation,
            event: DaemonEvent::Stdout(line.to_string()),
        });
    }

    #[tokio::test]
    async fn test_commands_reach_controller() {
        let mut backend = spawning_backend();
        backend.expect_toggle_inhibit().times(1).returning(|| Ok(()));
        let mut engine = engine(backend, Settings::default());
        engine.start().unwrap();
        stdout(&mut engine, "Status: Enabled");

        engine.process_message(Message::Command(ControlCommand::SetInhibit { inhibit: true }));
        // Rejected commands are logged, not fatal
        engine.process_message(Message::Command(ControlCommand::SetTemperature { kelvin: 4000 }));
        assert!(!engine.controller().is_stopped());
    }

    #[tokio::test]
    async fn test_process_command_returns_rejection() {
        let mut engine = engine(spawning_backend(), Settings::default());
        engine.start().unwrap();

        let err = engine
            .process_command(ControlCommand::SetTemperature { kelvin: 4000 })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
        let err = engine
            .process_command(ControlCommand::SuspendFor { minutes: 0 })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
        assert!(!engine.controller().is_stopped());
    }

    #[tokio::test]
    async fn test_toggle_signal_toggles() {
        let mut backend = spawning_backend();
        backend.expect_toggle_inhibit().times(1).returning(|| Ok(()));
        let mut engine = engine(backend, Settings::default());
        engine.start().unwrap();
        stdout(&mut engine, "Status: Enabled");

        engine.process_message(Message::ToggleSignal);
    }

    #[tokio::test]
    async fn test_start_in_manual_mode_waits_for_temperature() {
        let mut backend = spawning_backend();
        backend.expect_interrupt().times(1).returning(|| Ok(()));
        backend
            .expect_run_oneshot()
            .with(eq(OneShot::Temperature(5100)))
            .times(1)
            .returning(|_| Ok(()));
        let mut settings = Settings::default();
        settings.behavior.start_in_manual_mode = true;
        let mut engine = engine(backend, settings);
        engine.start().unwrap();

        stdout(&mut engine, "Status: Enabled");
        assert_eq!(engine.controller().mode(), Some(ControlMode::Automatic));

        stdout(&mut engine, "Color temperature: 5100K");
        assert_eq!(engine.controller().mode(), Some(ControlMode::Manual));

        // The one-shot follows the automatic daemon's exit
        engine.process_message(Message::Daemon {
            generation: 1,
            event: DaemonEvent::Exited(DaemonExit {
                code: Some(0),
                ..Default::default()
            }),
        });
        assert!(!engine.controller().manual_handover_pending());
    }

    #[tokio::test]
    async fn test_quit_interrupts_then_second_quit_kills() {
        let mut backend = spawning_backend();
        backend.expect_interrupt().times(1).returning(|| Ok(()));
        backend.expect_kill().times(1).returning(|| Ok(()));
        let mut engine = engine(backend, Settings::default());
        engine.start().unwrap();

        engine.process_message(Message::Quit);
        assert!(!engine.controller().is_stopped());
        engine.process_message(Message::Quit);
    }

    #[tokio::test(start_paused = true)]
    #[serial_test::serial]
    async fn test_shutdown_timeout_escalates_to_kill() {
        let mut backend = spawning_backend();
        backend.expect_interrupt().times(1).returning(|| Ok(()));
        backend.expect_kill().times(1).returning(|| Ok(()));
        let mut engine = engine(backend, Settings::default());
        engine.start().unwrap();

        engine.process_message(Message::Quit);
        let msg = engine.msg_rx.recv().await.unwrap();
        assert!(matches!(msg, Message::ShutdownTimeout));
        engine.process_message(msg);

        engine.process_message(Message::Daemon {
            generation: 1,
            event: DaemonEvent::Exited(DaemonExit {
                code: None,
                signal: Some(9),
                stderr: String::new(),
            }),
        });
        assert!(engine.controller().is_stopped());
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_run_ends_when_controller_stops() {
        let mut engine = engine(spawning_backend(), Settings::default());
        let mut events = engine.subscribe();
        engine.start().unwrap();

        let tx = engine.msg_sender();
        tx.send(Message::Daemon {
            generation: 1,
            event: DaemonEvent::Exited(DaemonExit {
                code: Some(2),
                signal: None,
                stderr: "fatal: cannot open display\n".to_string(),
            }),
        })
        .await
        .unwrap();

        engine.run().await;
        engine.shutdown().await;

        assert_eq!(
            events.recv().await.unwrap(),
            ControllerEvent::ErrorOccurred {
                message: "fatal: cannot open display".to_string()
            }
        );
        assert_eq!(events.recv().await.unwrap(), ControllerEvent::Stopped);
    }

    #[tokio::test]
    async fn test_watcher_started_only_when_enabled() {
        let (msg_tx, msg_rx) = mpsc::channel(16);
        let mut query = MockWindowQuery::new();
        query.expect_active_window_fullscreen().returning(|| Ok(false));
        let mut settings = Settings::default();
        settings.fullscreen.enabled = false;
        let mut engine = Engine::with_backend(
            settings,
            Box::new(spawning_backend()),
            msg_tx,
            msg_rx,
            Some(Box::new(query)),
        );
        engine.start().unwrap();
        assert!(!engine.has_watcher());

        let (msg_tx, msg_rx) = mpsc::channel(16);
        let mut query = MockWindowQuery::new();
        query.expect_active_window_fullscreen().returning(|| Ok(false));
        let mut engine = Engine::with_backend(
            Settings::default(),
            Box::new(spawning_backend()),
            msg_tx,
            msg_rx,
            Some(Box::new(query)),
        );
        engine.start().unwrap();
        assert!(engine.has_watcher());
        engine.shutdown().await;
        assert!(!engine.has_watcher());
    }

    #[tokio::test]
    async fn test_watcher_transition_reaches_state() {
        let mut backend = spawning_backend();
        backend.expect_toggle_inhibit().times(1).returning(|| Ok(()));
        let mut engine = engine(backend, Settings::default());
        let mut events = engine.subscribe();
        engine.start().unwrap();

        engine.process_message(Message::Watcher(WatcherEvent::Changed(true)));
        assert!(engine.controller().state().fullscreen);
        assert_eq!(
            events.recv().await.unwrap(),
            ControllerEvent::FullscreenChanged { fullscreen: true }
        );
    }
}
