//! Speech playback with single-utterance locking and replay suppression.
//!
//! The synthesis engine is an external [`PlaybackDevice`]; the session decides
//! whether a turn may be spoken at all, tracks the one active utterance, and
//! interprets the device's start/end/error reports.

mod command;
#[cfg(test)]
mod tests;

pub use command::CommandPlaybackDevice;

use crate::text::{normalize_for_compare, speakable_text, text_hash};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

pub type UtteranceId = u64;
/// Identifier of the turn being spoken.
pub type MessageId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpeechParams {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for SpeechParams {
    fn default() -> Self {
        Self {
            rate: crate::config::DEFAULT_SPEECH_RATE,
            pitch: crate::config::DEFAULT_SPEECH_PITCH,
            volume: crate::config::DEFAULT_SPEECH_VOLUME,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    SynthesisFailed(String),
}

impl fmt::Display for PlaybackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackError::SynthesisFailed(detail) => write!(f, "speech synthesis failed: {detail}"),
        }
    }
}

impl std::error::Error for PlaybackError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEventKind {
    Started,
    Ended,
    Error(String),
}

/// Report from a playback device, tagged with the utterance it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackDeviceEvent {
    pub utterance: UtteranceId,
    pub kind: PlaybackEventKind,
}

/// Speech synthesizer consumed by [`PlaybackSession`].
pub trait PlaybackDevice: Send {
    fn speak(
        &mut self,
        utterance: UtteranceId,
        text: &str,
        params: &SpeechParams,
        events: Sender<PlaybackDeviceEvent>,
    ) -> Result<(), PlaybackError>;

    /// Cancel whatever is playing. Must tolerate being called while idle.
    fn cancel(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackConfig {
    /// Identical text is not started again within this window.
    pub cooldown: Duration,
    pub params: SpeechParams,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(crate::config::DEFAULT_SPEAK_COOLDOWN_MS),
            params: SpeechParams::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another utterance holds the playback lock.
    Busy,
    SameMessage,
    SameText,
    Cooldown,
    /// Nothing speakable left after stripping symbols.
    Empty,
}

impl SkipReason {
    pub fn label(self) -> &'static str {
        match self {
            SkipReason::Busy => "busy",
            SkipReason::SameMessage => "same_message",
            SkipReason::SameText => "same_text",
            SkipReason::Cooldown => "cooldown",
            SkipReason::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakOutcome {
    Started {
        utterance: UtteranceId,
        text: String,
    },
    Skipped(SkipReason),
}

/// Replay markers; cleared by an interrupt so the turn can be replayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackToken {
    pub last_spoken_message_id: Option<MessageId>,
    pub last_spoken_text_hash: Option<u64>,
    pub last_speak_started_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackUpdate {
    Started { message_id: MessageId },
    Finished { message_id: MessageId },
    Failed { message_id: MessageId, error: PlaybackError },
}

#[derive(Debug, Clone, Copy)]
struct ActivePlayback {
    utterance: UtteranceId,
    message_id: MessageId,
}

pub struct PlaybackSession {
    config: PlaybackConfig,
    device: Box<dyn PlaybackDevice>,
    events_tx: Sender<PlaybackDeviceEvent>,
    events_rx: Receiver<PlaybackDeviceEvent>,
    active: Option<ActivePlayback>,
    token: PlaybackToken,
    /// Hash and start time of the last text started; survives interrupts so the
    /// cooldown still applies to an immediate replay.
    recent_start: Option<(u64, Instant)>,
    next_utterance: UtteranceId,
}

impl PlaybackSession {
    pub fn new(config: PlaybackConfig, device: Box<dyn PlaybackDevice>) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            config,
            device,
            events_tx,
            events_rx,
            active: None,
            token: PlaybackToken::default(),
            recent_start: None,
            next_utterance: 0,
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.active.is_some()
    }

    pub fn token(&self) -> PlaybackToken {
        self.token
    }

    pub fn active_message(&self) -> Option<MessageId> {
        self.active.map(|active| active.message_id)
    }

    pub fn speak(
        &mut self,
        text: &str,
        message_id: MessageId,
        now: Instant,
    ) -> Result<SpeakOutcome, PlaybackError> {
        let speakable = speakable_text(text);
        if speakable.is_empty() {
            return Ok(SpeakOutcome::Skipped(SkipReason::Empty));
        }
        let hash = text_hash(&normalize_for_compare(&speakable));

        if let Some(reason) = self.skip_reason(message_id, hash, now) {
            crate::log_debug(&format!(
                "PlaybackSession: skip message {message_id} ({})",
                reason.label()
            ));
            return Ok(SpeakOutcome::Skipped(reason));
        }

        self.next_utterance += 1;
        let utterance = self.next_utterance;
        // Markers are set before the device call so a failed synthesis is not retried.
        self.token = PlaybackToken {
            last_spoken_message_id: Some(message_id),
            last_spoken_text_hash: Some(hash),
            last_speak_started_at: Some(now),
        };
        self.recent_start = Some((hash, now));

        self.device
            .speak(utterance, &speakable, &self.config.params, self.events_tx.clone())?;
        self.active = Some(ActivePlayback {
            utterance,
            message_id,
        });
        tracing::debug!(message_id, utterance, "playback started");
        Ok(SpeakOutcome::Started {
            utterance,
            text: speakable,
        })
    }

    fn skip_reason(&self, message_id: MessageId, hash: u64, now: Instant) -> Option<SkipReason> {
        if self.active.is_some() {
            return Some(SkipReason::Busy);
        }
        if self.token.last_spoken_message_id == Some(message_id) {
            return Some(SkipReason::SameMessage);
        }
        if self.token.last_spoken_text_hash == Some(hash) {
            return Some(SkipReason::SameText);
        }
        match self.recent_start {
            Some((recent, at))
                if recent == hash && now.saturating_duration_since(at) < self.config.cooldown =>
            {
                Some(SkipReason::Cooldown)
            }
            _ => None,
        }
    }

    /// Cancel the active utterance and clear the replay markers. Returns the
    /// interrupted message, or `None` (and changes nothing) when idle.
    pub fn interrupt(&mut self) -> Option<MessageId> {
        let active = self.active.take()?;
        self.device.cancel();
        self.token.last_spoken_message_id = None;
        self.token.last_spoken_text_hash = None;
        crate::log_debug(&format!(
            "PlaybackSession: interrupted message {}",
            active.message_id
        ));
        Some(active.message_id)
    }

    /// Apply device reports; reports for superseded utterances are ignored.
    pub fn poll(&mut self) -> Vec<PlaybackUpdate> {
        let mut updates = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            let Some(active) = self.active else {
                continue;
            };
            if event.utterance != active.utterance {
                continue;
            }
            match event.kind {
                PlaybackEventKind::Started => updates.push(PlaybackUpdate::Started {
                    message_id: active.message_id,
                }),
                PlaybackEventKind::Ended => {
                    self.active = None;
                    updates.push(PlaybackUpdate::Finished {
                        message_id: active.message_id,
                    });
                }
                PlaybackEventKind::Error(detail) => {
                    self.active = None;
                    crate::log_debug(&format!(
                        "PlaybackSession: synthesis failed for message {}: {detail}",
                        active.message_id
                    ));
                    updates.push(PlaybackUpdate::Failed {
                        message_id: active.message_id,
                        error: PlaybackError::SynthesisFailed(detail),
                    });
                }
            }
        }
        updates
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if self.active.take().is_some() {
            self.device.cancel();
        }
    }
}
