use crate::app::stats::format_session_stats;
use crate::coach::{CoachEvent, VoiceCoach};
use crate::config::AppConfig;
use crate::exchange::{CommandTransport, ExchangeClient, ExchangeTransport, HttpTransport};
use crate::playback::{CommandPlaybackDevice, PlaybackDevice};
use crate::{log_debug, log_debug_content, logging_enabled};
use anyhow::{bail, Context, Result};
#[cfg(any(test, feature = "mutants"))]
use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

use super::devices::{CaptureFeed, IpcCaptureDevice, IpcPlaybackDevice, SpeechFeed};
use super::protocol::{IpcCommand, IpcEvent, IpcTurn};
use super::router::{handle_command, LoopControl};

const IPC_TICK: Duration = Duration::from_millis(5);

// ============================================================================
// IPC State
// ============================================================================

pub(super) struct IpcState {
    pub(super) coach: VoiceCoach,
    pub(super) capture_feed: CaptureFeed,
    pub(super) speech_feed: SpeechFeed,
    pub(super) session_id: String,
    transport_label: &'static str,
    playback_label: &'static str,
}

impl IpcState {
    pub(super) fn new(config: &AppConfig) -> Result<Self> {
        let transport = build_transport(config)?;
        Ok(Self::with_transport(config, transport))
    }

    pub(super) fn with_transport(config: &AppConfig, transport: Arc<dyn ExchangeTransport>) -> Self {
        let session_id = format!(
            "{:x}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis()
        );
        let transport_label = transport.label();

        let capture_feed = CaptureFeed::default();
        let speech_feed = SpeechFeed::default();
        let (playback_device, playback_label): (Box<dyn PlaybackDevice>, &'static str) =
            match &config.tts_cmd {
                Some(cmd) => (Box::new(CommandPlaybackDevice::new(cmd)), "command"),
                None => (Box::new(IpcPlaybackDevice::new(speech_feed.clone())), "client"),
            };

        let coach = VoiceCoach::new(
            config.coach_config(),
            ExchangeClient::new(config.exchange_config(), transport),
            Box::new(IpcCaptureDevice::new(capture_feed.clone())),
            playback_device,
        );
        log_debug(&format!(
            "IPC session {session_id}: transport={transport_label} playback={playback_label}"
        ));

        Self {
            coach,
            capture_feed,
            speech_feed,
            session_id,
            transport_label,
            playback_label,
        }
    }

    pub(super) fn emit_capabilities(&self) {
        let config = self.coach.config();
        send_event(&IpcEvent::Capabilities {
            session_id: self.session_id.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            transport: self.transport_label.to_string(),
            playback: self.playback_label.to_string(),
            auto_send: config.auto_send,
            auto_speech: config.auto_speech,
            display_turns: config.session_log.display_turns,
            context_turns: config.session_log.context_turns,
        });
    }

    pub(super) fn emit_turns(&self, all: bool) {
        let turns = if all {
            self.coach.current_turns()
        } else {
            self.coach.display_turns()
        };
        send_event(&IpcEvent::Turns {
            turns: turns.iter().map(IpcTurn::from).collect(),
        });
    }

    /// Translate queued coach events onto the wire.
    pub(super) fn forward_coach_events(&mut self) {
        for event in self.coach.drain_events() {
            match event {
                CoachEvent::StateChanged(state) => send_event(&IpcEvent::State { state }),
                CoachEvent::TurnAppended(turn) => send_event(&IpcEvent::Turn(IpcTurn::from(&turn))),
                CoachEvent::Transcript(capture) => send_event(&IpcEvent::Transcript {
                    text: capture.text,
                    is_final: capture.is_final,
                }),
                CoachEvent::Notice { source, message } => send_event(&IpcEvent::Notice {
                    source: source.label().to_string(),
                    message,
                }),
                CoachEvent::Suppressed(reason) => {
                    log_debug(&format!("IPC: suppressed ({})", reason.label()));
                }
                CoachEvent::Speak { message_id, text } => {
                    log_debug_content(&format!("IPC: speaking turn {message_id}: {text}"));
                }
                CoachEvent::ExchangeFinished {
                    job_id,
                    attempts,
                    elapsed,
                    error,
                } => {
                    tracing::info!(
                        job_id,
                        attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = error.map(|err| err.label()),
                        "exchange finished"
                    );
                }
            }
        }
    }
}

pub(super) fn build_transport(config: &AppConfig) -> Result<Arc<dyn ExchangeTransport>> {
    if let Some(url) = &config.endpoint_url {
        let timeout = Duration::from_millis(config.exchange_timeout_ms);
        let transport = HttpTransport::new(url, timeout).context("failed to build HTTP transport")?;
        return Ok(Arc::new(transport));
    }
    if let Some(cmd) = &config.endpoint_cmd {
        return Ok(Arc::new(CommandTransport::new(cmd)));
    }
    bail!("no conversational endpoint configured; pass --endpoint-url or --endpoint-cmd")
}

// ============================================================================
// Event Sending
// ============================================================================

pub(super) fn send_event(event: &IpcEvent) {
    #[cfg(any(test, feature = "mutants"))]
    if capture_test_event(event) {
        return;
    }
    if let Ok(json) = serde_json::to_string(event) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{json}");
        let _ = stdout.flush();
    }
}

// Per-thread so parallel tests never see each other's events.
#[cfg(any(test, feature = "mutants"))]
thread_local! {
    static EVENT_SINK: RefCell<Option<Vec<IpcEvent>>> = const { RefCell::new(None) };
}

#[cfg(any(test, feature = "mutants"))]
fn capture_test_event(event: &IpcEvent) -> bool {
    EVENT_SINK.with(|sink| match sink.borrow_mut().as_mut() {
        Some(events) => {
            events.push(event.clone());
            true
        }
        None => false,
    })
}

#[cfg(any(test, feature = "mutants"))]
#[allow(dead_code)]
pub(super) fn init_event_sink() {
    EVENT_SINK.with(|sink| {
        sink.borrow_mut().get_or_insert_with(Vec::new);
    });
}

#[cfg(any(test, feature = "mutants"))]
#[allow(dead_code)]
pub(super) fn event_snapshot() -> usize {
    init_event_sink();
    EVENT_SINK.with(|sink| sink.borrow().as_ref().map(Vec::len).unwrap_or(0))
}

#[cfg(any(test, feature = "mutants"))]
#[allow(dead_code)]
pub(super) fn events_since(start: usize) -> Vec<IpcEvent> {
    EVENT_SINK.with(|sink| {
        sink.borrow()
            .as_ref()
            .map(|events| events.iter().skip(start).cloned().collect())
            .unwrap_or_default()
    })
}

// ============================================================================
// Stdin Reader Thread
// ============================================================================

fn spawn_stdin_reader(tx: Sender<IpcCommand>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match parse_command(trimmed) {
                Ok(cmd) => {
                    if tx.send(cmd).is_err() {
                        break; // Main loop has exited
                    }
                }
                Err(message) => send_event(&IpcEvent::Error {
                    message,
                    recoverable: true,
                }),
            }
        }
        log_debug("Stdin reader thread exiting");
    })
}

pub(super) fn parse_command(line: &str) -> Result<IpcCommand, String> {
    serde_json::from_str::<IpcCommand>(line).map_err(|err| format!("Invalid command: {err}"))
}

// ============================================================================
// Main Event Loop
// ============================================================================

pub fn run_ipc_mode(config: AppConfig) -> Result<()> {
    log_debug("Starting JSON IPC mode");
    let mut state = IpcState::new(&config)?;
    state.emit_capabilities();
    send_event(&IpcEvent::State {
        state: state.coach.state(),
    });

    let (cmd_tx, cmd_rx) = unbounded();
    let _stdin_handle = spawn_stdin_reader(cmd_tx);
    run_ipc_loop(&mut state, &cmd_rx, None)
}

pub(super) fn run_ipc_loop(
    state: &mut IpcState,
    cmd_rx: &Receiver<IpcCommand>,
    max_loops: Option<u64>,
) -> Result<()> {
    let mut loop_count: u64 = 0;
    loop {
        loop_count += 1;
        if loop_count.is_multiple_of(2000) {
            log_debug(&format!(
                "IPC loop iteration {loop_count}, state: {}",
                state.coach.state().label()
            ));
        }
        if let Some(limit) = max_loops {
            if loop_count > limit {
                log_debug("IPC loop reached its iteration limit, exiting");
                break;
            }
        }

        // Drain every queued command before ticking
        let mut exit = false;
        loop {
            match cmd_rx.try_recv() {
                Ok(cmd) => {
                    log_debug_content(&format!("IPC command received: {cmd:?}"));
                    if handle_command(state, cmd, Instant::now()) == LoopControl::Exit {
                        exit = true;
                        break;
                    }
                    state.forward_coach_events();
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    log_debug("Command channel disconnected, exiting");
                    exit = true;
                    break;
                }
            }
        }
        if exit {
            break;
        }

        state.coach.tick(Instant::now());
        state.forward_coach_events();

        thread::sleep(IPC_TICK);
    }

    finish_session(state);
    Ok(())
}

fn finish_session(state: &mut IpcState) {
    state.coach.interrupt_playback();
    state.forward_coach_events();
    let summary = format_session_stats(state.coach.stats());
    if !summary.is_empty() {
        log_debug(&summary);
        if logging_enabled() {
            eprintln!("{summary}");
        }
    }
    log_debug("IPC mode exiting");
}
