//! UI-facing conversation status, derived from the three activity signals.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationState {
    Idle,
    Listening,
    Thinking,
    Speaking,
}

impl ConversationState {
    /// Listening beats Speaking beats Thinking; Idle only when nothing is active.
    pub fn derive(capturing: bool, playing: bool, dispatch_in_flight: bool) -> Self {
        if capturing {
            ConversationState::Listening
        } else if playing {
            ConversationState::Speaking
        } else if dispatch_in_flight {
            ConversationState::Thinking
        } else {
            ConversationState::Idle
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ConversationState::Idle => "idle",
            ConversationState::Listening => "listening",
            ConversationState::Thinking => "thinking",
            ConversationState::Speaking => "speaking",
        }
    }
}
