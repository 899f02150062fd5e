use super::protocol::*;
use super::router::*;
use super::session::*;
use crate::cancel::CancelToken;
use crate::config::AppConfig;
use crate::exchange::{ExchangeRequest, ExchangeTransport, TransportFailure};
use crate::session_log::Role;
use crate::state::ConversationState;
use clap::Parser;
use crossbeam_channel::unbounded;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Answers every exchange with the next canned reply.
struct CannedTransport {
    replies: Mutex<Vec<String>>,
}

impl CannedTransport {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
        })
    }
}

impl ExchangeTransport for CannedTransport {
    fn exchange(
        &self,
        _request: &ExchangeRequest,
        _cancel: &CancelToken,
    ) -> Result<String, TransportFailure> {
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| TransportFailure::Io("script exhausted".into()))
    }

    fn label(&self) -> &'static str {
        "canned"
    }
}

fn test_config(args: &[&str]) -> AppConfig {
    let mut argv = vec!["voicecoach"];
    argv.extend_from_slice(args);
    let mut config = AppConfig::parse_from(argv);
    config.tts_cmd = None;
    config
}

fn new_test_state(replies: &[&str]) -> IpcState {
    IpcState::with_transport(&test_config(&[]), CannedTransport::new(replies))
}

fn command(state: &mut IpcState, cmd: IpcCommand) -> LoopControl {
    let control = handle_command(state, cmd, Instant::now());
    state.forward_coach_events();
    control
}

/// Tick until an event matching `done` shows up after `start`.
fn settle(state: &mut IpcState, start: usize, done: impl Fn(&IpcEvent) -> bool) -> Vec<IpcEvent> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let events = events_since(start);
        if events.iter().any(&done) {
            return events;
        }
        assert!(Instant::now() < deadline, "expected event never arrived: {events:?}");
        state.coach.tick(Instant::now());
        state.forward_coach_events();
        thread::sleep(Duration::from_millis(2));
    }
}

fn is_assistant_turn(event: &IpcEvent) -> bool {
    matches!(event, IpcEvent::Turn(turn) if turn.role == Role::Assistant)
}

fn speak_utterance(events: &[IpcEvent]) -> u64 {
    events
        .iter()
        .find_map(|event| match event {
            IpcEvent::Speak { utterance, .. } => Some(*utterance),
            _ => None,
        })
        .expect("speak event")
}

// -------------------------------------------------------------------------
// Protocol
// -------------------------------------------------------------------------

#[test]
fn parses_commands() {
    assert_eq!(
        parse_command(r#"{"cmd":"submit_text","text":"How do I volley?"}"#),
        Ok(IpcCommand::SubmitText {
            text: "How do I volley?".into()
        })
    );
    assert_eq!(
        parse_command(r#"{"cmd":"get_turns"}"#),
        Ok(IpcCommand::GetTurns { all: false })
    );
    assert_eq!(
        parse_command(r#"{"cmd":"speech_error","utterance":4}"#),
        Ok(IpcCommand::SpeechError {
            utterance: 4,
            message: None
        })
    );
    assert_eq!(
        parse_command(r#"{"cmd":"capture_error","error":"not-allowed"}"#),
        Ok(IpcCommand::CaptureError {
            error: "not-allowed".into()
        })
    );
    assert_eq!(parse_command(r#"{"cmd":"exit"}"#), Ok(IpcCommand::Exit));
}

#[test]
fn rejects_unknown_or_malformed_commands() {
    let err = parse_command(r#"{"cmd":"dance"}"#).unwrap_err();
    assert!(err.starts_with("Invalid command"));
    assert!(parse_command("not json").is_err());
    assert!(parse_command(r#"{"cmd":"submit_text"}"#).is_err());
}

#[test]
fn events_serialize_with_event_tag() {
    let state = serde_json::to_value(IpcEvent::State {
        state: ConversationState::Thinking,
    })
    .unwrap();
    assert_eq!(state, serde_json::json!({"event": "state", "state": "thinking"}));

    let turn = serde_json::to_value(IpcEvent::Turn(IpcTurn {
        id: 7,
        role: Role::Assistant,
        text: "Split step first.".into(),
    }))
    .unwrap();
    assert_eq!(
        turn,
        serde_json::json!({"event": "turn", "id": 7, "role": "assistant", "text": "Split step first."})
    );

    let cancel = serde_json::to_value(IpcEvent::SpeakCancel { utterance: 2 }).unwrap();
    assert_eq!(cancel, serde_json::json!({"event": "speak_cancel", "utterance": 2}));
}

// -------------------------------------------------------------------------
// Transport selection
// -------------------------------------------------------------------------

#[test]
fn build_transport_requires_an_endpoint() {
    let config = AppConfig::parse_from(["voicecoach"]);
    if config.endpoint_url.is_none() && config.endpoint_cmd.is_none() {
        assert!(build_transport(&config).is_err());
    }
}

#[test]
fn build_transport_picks_configured_kind() {
    let config = AppConfig::parse_from(["voicecoach", "--endpoint-cmd", "coach-reply"]);
    assert_eq!(build_transport(&config).unwrap().label(), "command");

    let config = AppConfig::parse_from(["voicecoach", "--endpoint-url", "http://127.0.0.1:9/chat"]);
    assert_eq!(build_transport(&config).unwrap().label(), "http");
}

// -------------------------------------------------------------------------
// Router
// -------------------------------------------------------------------------

#[test]
fn capabilities_describe_the_session() {
    let state = new_test_state(&[]);
    let start = event_snapshot();
    state.emit_capabilities();
    let events = events_since(start);
    match &events[..] {
        [IpcEvent::Capabilities {
            transport,
            playback,
            display_turns,
            ..
        }] => {
            assert_eq!(transport, "canned");
            assert_eq!(playback, "client");
            assert_eq!(*display_turns, 3);
        }
        other => panic!("unexpected events: {other:?}"),
    }
}

#[test]
fn submit_text_round_trip_with_client_speech() {
    let mut state = new_test_state(&["Keep your racket up."]);
    let start = event_snapshot();
    command(
        &mut state,
        IpcCommand::SubmitText {
            text: "How do I volley?".into(),
        },
    );
    let events = settle(&mut state, start, |e| matches!(e, IpcEvent::Speak { .. }));

    assert!(events.contains(&IpcEvent::State {
        state: ConversationState::Thinking
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        IpcEvent::Turn(turn) if turn.role == Role::User && turn.text == "How do I volley?"
    )));
    assert!(events.iter().any(is_assistant_turn));
    assert_eq!(state.coach.state(), ConversationState::Speaking);

    let utterance = speak_utterance(&events);
    command(&mut state, IpcCommand::SpeechStarted { utterance });
    command(&mut state, IpcCommand::SpeechEnded { utterance });
    let events = settle(&mut state, start, |e| {
        *e == IpcEvent::State {
            state: ConversationState::Idle,
        }
    });
    assert!(!events.iter().any(|e| matches!(e, IpcEvent::Error { .. })));
}

#[test]
fn speech_reports_for_old_utterances_are_ignored() {
    let mut state = new_test_state(&["Stay low."]);
    let start = event_snapshot();
    command(
        &mut state,
        IpcCommand::SubmitText {
            text: "Tips for returns?".into(),
        },
    );
    let events = settle(&mut state, start, |e| matches!(e, IpcEvent::Speak { .. }));
    let utterance = speak_utterance(&events);

    command(
        &mut state,
        IpcCommand::SpeechEnded {
            utterance: utterance + 10,
        },
    );
    state.coach.tick(Instant::now());
    assert_eq!(state.coach.state(), ConversationState::Speaking);
}

#[test]
fn interrupt_cancels_client_speech() {
    let mut state = new_test_state(&["Stay low."]);
    let start = event_snapshot();
    command(
        &mut state,
        IpcCommand::SubmitText {
            text: "Tips for returns?".into(),
        },
    );
    let events = settle(&mut state, start, |e| matches!(e, IpcEvent::Speak { .. }));
    let utterance = speak_utterance(&events);

    command(&mut state, IpcCommand::Interrupt);
    let events = events_since(start);
    assert!(events.contains(&IpcEvent::SpeakCancel { utterance }));
    assert_eq!(state.coach.state(), ConversationState::Idle);
}

#[test]
fn client_recognizer_feeds_capture() {
    let mut state = new_test_state(&["Turn your shoulders."]);
    let start = event_snapshot();
    command(&mut state, IpcCommand::StartListening);
    assert_eq!(state.coach.state(), ConversationState::Listening);
    command(
        &mut state,
        IpcCommand::Interim {
            text: "how do I hit".into(),
        },
    );
    command(
        &mut state,
        IpcCommand::Final {
            text: "How do I hit a forehand?".into(),
        },
    );
    let events = settle(&mut state, start, is_assistant_turn);

    assert!(events.contains(&IpcEvent::Transcript {
        text: "how do I hit".into(),
        is_final: false
    }));
    assert!(events.contains(&IpcEvent::Transcript {
        text: "How do I hit a forehand?".into(),
        is_final: true
    }));
    assert!(events.iter().any(|e| matches!(
        e,
        IpcEvent::Turn(turn) if turn.role == Role::User && turn.text == "How do I hit a forehand?"
    )));
}

#[test]
fn recognizer_report_without_listening_is_an_error() {
    let mut state = new_test_state(&[]);
    let start = event_snapshot();
    command(
        &mut state,
        IpcCommand::Final {
            text: "hello".into(),
        },
    );
    let events = events_since(start);
    assert!(matches!(
        events.as_slice(),
        [IpcEvent::Error {
            recoverable: true,
            ..
        }]
    ));
    assert!(state.coach.current_turns().is_empty());
}

#[test]
fn capture_error_becomes_notice() {
    let mut state = new_test_state(&[]);
    let start = event_snapshot();
    command(&mut state, IpcCommand::StartListening);
    command(
        &mut state,
        IpcCommand::CaptureError {
            error: "not-allowed".into(),
        },
    );
    let events = settle(&mut state, start, |e| matches!(e, IpcEvent::Notice { .. }));
    assert!(events.contains(&IpcEvent::Notice {
        source: "capture".into(),
        message: "microphone permission was denied".into(),
    }));
    assert_eq!(state.coach.state(), ConversationState::Idle);
}

#[test]
fn get_turns_returns_display_window_or_everything() {
    let mut state = new_test_state(&["one", "two"]);
    let start = event_snapshot();
    command(&mut state, IpcCommand::SubmitText { text: "first".into() });
    settle(&mut state, start, is_assistant_turn);
    command(&mut state, IpcCommand::Interrupt);
    let mid = event_snapshot();
    command(&mut state, IpcCommand::SubmitText { text: "second".into() });
    settle(&mut state, mid, is_assistant_turn);

    let start = event_snapshot();
    command(&mut state, IpcCommand::GetTurns { all: false });
    command(&mut state, IpcCommand::GetTurns { all: true });
    let counts: Vec<_> = events_since(start)
        .into_iter()
        .filter_map(|e| match e {
            IpcEvent::Turns { turns } => Some(turns.len()),
            _ => None,
        })
        .collect();
    assert_eq!(counts, vec![3, 4]);
}

// -------------------------------------------------------------------------
// Loop
// -------------------------------------------------------------------------

#[test]
fn loop_exits_on_exit_command() {
    let mut state = new_test_state(&[]);
    let (tx, rx) = unbounded();
    tx.send(IpcCommand::Exit).unwrap();
    init_event_sink();
    assert!(run_ipc_loop(&mut state, &rx, Some(1_000)).is_ok());
    assert_eq!(handle_command(&mut state, IpcCommand::Exit, Instant::now()), LoopControl::Exit);
}

#[test]
fn loop_exits_when_stdin_closes() {
    let mut state = new_test_state(&[]);
    let (tx, rx) = unbounded::<IpcCommand>();
    drop(tx);
    init_event_sink();
    assert!(run_ipc_loop(&mut state, &rx, Some(1_000)).is_ok());
}

#[test]
fn loop_runs_an_exchange_end_to_end() {
    let mut state = new_test_state(&["Bend your knees."]);
    let (tx, rx) = unbounded();
    tx.send(IpcCommand::SubmitText {
        text: "Why do I net my serves?".into(),
    })
    .unwrap();
    let start = event_snapshot();
    run_ipc_loop(&mut state, &rx, Some(200)).unwrap();
    let events = events_since(start);
    assert!(events.iter().any(|e| matches!(
        e,
        IpcEvent::Turn(turn) if turn.text == "Bend your knees."
    )));
    drop(tx);
}
