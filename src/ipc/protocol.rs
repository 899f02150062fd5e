//! Wire types for the JSON-lines IPC surface. One JSON object per line.

use crate::session_log::{Role, Turn, TurnId};
use crate::state::ConversationState;
use serde::{Deserialize, Serialize};

// ============================================================================
// IPC Events (Rust → client)
// ============================================================================

/// Events emitted by the coach.
///
/// Serialized as JSON with an `"event"` tag field for type discrimination.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event")]
pub enum IpcEvent {
    /// Sent once on startup
    #[serde(rename = "capabilities")]
    Capabilities {
        session_id: String,
        version: String,
        transport: String,
        /// `"command"` when a local TTS command speaks, `"client"` when the UI does
        playback: String,
        auto_send: bool,
        auto_speech: bool,
        display_turns: usize,
        context_turns: usize,
    },

    #[serde(rename = "state")]
    State { state: ConversationState },

    /// A turn was appended to the session log
    #[serde(rename = "turn")]
    Turn(IpcTurn),

    /// Interim or final transcript from capture
    #[serde(rename = "transcript")]
    Transcript { text: String, is_final: bool },

    /// Transient, non-fatal notice for the user
    #[serde(rename = "notice")]
    Notice { source: String, message: String },

    /// Client-side synthesis request
    #[serde(rename = "speak")]
    Speak {
        utterance: u64,
        text: String,
        rate: f32,
        pitch: f32,
        volume: f32,
    },

    /// Stop the client-side utterance
    #[serde(rename = "speak_cancel")]
    SpeakCancel { utterance: u64 },

    /// Reply to `get_turns`
    #[serde(rename = "turns")]
    Turns { turns: Vec<IpcTurn> },

    #[serde(rename = "error")]
    Error { message: String, recoverable: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpcTurn {
    pub id: TurnId,
    pub role: Role,
    pub text: String,
}

impl From<&Turn> for IpcTurn {
    fn from(turn: &Turn) -> Self {
        Self {
            id: turn.id,
            role: turn.role,
            text: turn.text.clone(),
        }
    }
}

// ============================================================================
// IPC Commands (client → Rust)
// ============================================================================

/// Commands received from an IPC client
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd")]
pub enum IpcCommand {
    #[serde(rename = "submit_text")]
    SubmitText { text: String },

    /// Transcript the client recognized itself and wants dispatched
    #[serde(rename = "submit_voice")]
    SubmitVoice { text: String },

    #[serde(rename = "start_listening")]
    StartListening,

    #[serde(rename = "stop_listening")]
    StopListening,

    /// Recognizer reports, fed into the capture session
    #[serde(rename = "interim")]
    Interim { text: String },
    #[serde(rename = "final")]
    Final { text: String },
    #[serde(rename = "capture_error")]
    CaptureError { error: String },

    /// Stop the current utterance
    #[serde(rename = "interrupt")]
    Interrupt,

    /// Client-side synthesis reports
    #[serde(rename = "speech_started")]
    SpeechStarted { utterance: u64 },
    #[serde(rename = "speech_ended")]
    SpeechEnded { utterance: u64 },
    #[serde(rename = "speech_error")]
    SpeechError {
        utterance: u64,
        #[serde(default)]
        message: Option<String>,
    },

    /// Request the turns; the display window unless `all` is set
    #[serde(rename = "get_turns")]
    GetTurns {
        #[serde(default)]
        all: bool,
    },

    #[serde(rename = "exit")]
    Exit,
}
