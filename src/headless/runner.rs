//! Headless mode runner - main event loop without a UI

use std::str::FromStr;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use redtray_app::config::Settings;
use redtray_app::{Engine, Message, WindowQuery};
use redtray_core::prelude::Result;
use redtray_core::{ControlCommand, ControllerEvent};

use super::HeadlessEvent;

/// A parsed stdin line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdinRequest {
    Command { command: ControlCommand, input: String },
    Status,
    Quit,
}

/// Parse one stdin line. Blank lines yield `None`.
pub fn parse_stdin_line(line: &str) -> Option<std::result::Result<StdinRequest, String>> {
    let trimmed = line.trim();
    let request = match trimmed {
        "" => return None,
        "status" | "s" => StdinRequest::Status,
        "quit" | "q" => StdinRequest::Quit,
        other => match ControlCommand::from_str(other) {
            Ok(command) => StdinRequest::Command {
                command,
                input: other.to_string(),
            },
            Err(e) => return Some(Err(e.to_string())),
        },
    };
    Some(Ok(request))
}

/// Run in headless mode - output JSON events instead of a tray icon
pub async fn run_headless(
    settings: Settings,
    window_query: Option<Box<dyn WindowQuery>>,
) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("redshift-tray starting in HEADLESS mode");
    info!("Daemon: {} {:?}", settings.daemon.binary, settings.daemon.args);
    info!("═══════════════════════════════════════════════════════");

    let binary = settings.daemon.binary.clone();
    let mut engine = match Engine::new(settings, window_query) {
        Ok(engine) => engine,
        Err(e) => {
            HeadlessEvent::error(e.to_string(), true).emit();
            return Err(e);
        }
    };
    let mut events = engine.subscribe();

    if let Err(e) = engine.start() {
        error!("Failed to start: {}", e);
        HeadlessEvent::error(e.to_string(), e.is_fatal()).emit();
        drain_events(&mut events);
        engine.shutdown().await;
        return Err(e);
    }
    HeadlessEvent::Started {
        binary,
        fullscreen_watcher: engine.has_watcher(),
    }
    .emit();

    // Headless-specific stdin reader
    let (stdin_tx, stdin_rx) = mpsc::channel::<StdinRequest>(32);
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || read_stdin_blocking(stdin_tx))?;

    headless_event_loop(&mut engine, &mut events, stdin_rx).await;

    engine.shutdown().await;
    info!("redshift-tray headless mode exiting");
    Ok(())
}

/// Main headless event loop
async fn headless_event_loop(
    engine: &mut Engine,
    events: &mut broadcast::Receiver<ControllerEvent>,
    mut stdin_rx: mpsc::Receiver<StdinRequest>,
) {
    let mut stdin_open = true;

    while !engine.controller().is_stopped() {
        tokio::select! {
            msg = engine.next_message() => match msg {
                Some(msg) => engine.process_message(msg),
                None => {
                    info!("Message channel closed");
                    break;
                }
            },
            request = stdin_rx.recv(), if stdin_open => match request {
                Some(request) => {
                    if let Some(reply) = handle_stdin_request(engine, request) {
                        reply.emit();
                    }
                }
                None => {
                    // Running detached from a terminal is normal
                    info!("Stdin closed, commands no longer accepted");
                    stdin_open = false;
                }
            },
        }

        drain_events(events);
    }
}

/// Apply one stdin request. Returns the line to print in reply, if any.
fn handle_stdin_request(engine: &mut Engine, request: StdinRequest) -> Option<HeadlessEvent> {
    match request {
        StdinRequest::Status => Some(HeadlessEvent::Status {
            mode: engine.controller().mode(),
            state: engine.controller().state().clone(),
        }),
        StdinRequest::Quit => {
            engine.process_message(Message::Quit);
            None
        }
        StdinRequest::Command { command, input } => match engine.process_command(command) {
            Ok(()) => None,
            Err(e) => {
                warn!("Command {:?} rejected: {}", input, e);
                Some(HeadlessEvent::CommandRejected {
                    input,
                    reason: e.to_string(),
                })
            }
        },
    }
}

/// Write every queued controller event to stdout
fn drain_events(events: &mut broadcast::Receiver<ControllerEvent>) {
    loop {
        match events.try_recv() {
            Ok(event) => super::emit(&event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!("Headless output lagged, {} events dropped", skipped);
            }
            Err(_) => break,
        }
    }
}

/// Read stdin lines and forward them as requests (blocking thread)
fn read_stdin_blocking(tx: mpsc::Sender<StdinRequest>) {
    use std::io::BufRead;

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to read stdin: {}", e);
                break;
            }
        };

        match parse_stdin_line(&line) {
            None => {}
            Some(Ok(request)) => {
                info!("Stdin: {:?}", request);
                if tx.blocking_send(request).is_err() {
                    break;
                }
            }
            Some(Err(reason)) => {
                warn!("Rejected stdin command {:?}: {}", line, reason);
                HeadlessEvent::CommandRejected {
                    input: line.trim().to_string(),
                    reason,
                }
                .emit();
            }
        }
    }

    info!("Stdin reader exiting");
}
