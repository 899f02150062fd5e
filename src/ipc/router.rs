use crate::capture::{CaptureDeviceEvent, CaptureError};
use crate::log_debug;
use crate::playback::PlaybackEventKind;
use std::time::Instant;

use super::protocol::{IpcCommand, IpcEvent};
use super::session::{send_event, IpcState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum LoopControl {
    Continue,
    Exit,
}

// ============================================================================
// Command Handlers
// ============================================================================

pub(super) fn handle_command(state: &mut IpcState, cmd: IpcCommand, now: Instant) -> LoopControl {
    match cmd {
        IpcCommand::SubmitText { text } => {
            let _ = state.coach.submit_text(&text, now);
        }
        IpcCommand::SubmitVoice { text } => {
            let _ = state.coach.submit_voice(&text, now);
        }
        IpcCommand::StartListening => {
            let _ = state.coach.start_listening(now);
        }
        IpcCommand::StopListening => state.coach.stop_listening(now),
        IpcCommand::Interim { text } => feed_capture(state, CaptureDeviceEvent::Interim(text)),
        IpcCommand::Final { text } => feed_capture(state, CaptureDeviceEvent::Final(text)),
        IpcCommand::CaptureError { error } => {
            let err = CaptureError::from_label(&error).unwrap_or_else(|| {
                log_debug(&format!("IPC: unknown capture error {error:?}, treating as unavailable"));
                CaptureError::DeviceUnavailable
            });
            feed_capture(state, CaptureDeviceEvent::Error(err));
        }
        IpcCommand::Interrupt => {
            state.coach.interrupt_playback();
        }
        IpcCommand::SpeechStarted { utterance } => {
            state.speech_feed.report(utterance, PlaybackEventKind::Started);
        }
        IpcCommand::SpeechEnded { utterance } => {
            state.speech_feed.report(utterance, PlaybackEventKind::Ended);
        }
        IpcCommand::SpeechError { utterance, message } => {
            let message = message.unwrap_or_else(|| "client synthesis failed".to_string());
            state
                .speech_feed
                .report(utterance, PlaybackEventKind::Error(message));
        }
        IpcCommand::GetTurns { all } => state.emit_turns(all),
        IpcCommand::Exit => {
            log_debug("IPC: exit requested");
            return LoopControl::Exit;
        }
    }
    LoopControl::Continue
}

fn feed_capture(state: &mut IpcState, event: CaptureDeviceEvent) {
    if !state.capture_feed.push(event) {
        send_event(&IpcEvent::Error {
            message: "Not listening; send start_listening first".to_string(),
            recoverable: true,
        });
    }
}
