//! Conversation reducer. `VoiceCoach` owns every guard and device session and
//! is driven from one thread: UI calls plus a periodic `tick(now)` that pumps
//! capture reports, exchange outcomes and playback reports.
//!
//! Flow: capture → dispatch gate → exchange → response guard → session log →
//! playback, with the conversation state recomputed after every step.


use crate::app::stats::SessionStats;
use crate::capture::{
    CaptureConfig, CaptureDevice, CaptureError, CaptureEvent, CaptureSession, CaptureUpdate,
    StartOutcome,
};
use crate::dispatch::{DispatchConfig, DispatchError, DispatchGate, DispatchTokenId};
use crate::exchange::{ExchangeClient, ExchangeError, ExchangeJob, ExchangeJobId, ExchangeOutcome};
use crate::playback::{
    MessageId, PlaybackConfig, PlaybackDevice, PlaybackSession, PlaybackUpdate,
    SkipReason, SpeakOutcome,
};
use crate::response::ResponseGuard;
use crate::session_log::{Role, SessionLog, SessionLogConfig, Turn, TurnId};
use crate::state::ConversationState;
use crate::{log_debug, log_debug_content};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct CoachConfig {
    pub session_log: SessionLogConfig,
    pub dispatch: DispatchConfig,
    pub capture: CaptureConfig,
    pub playback: PlaybackConfig,
    pub response_dedup_window: usize,
    /// Dispatch voice finals without waiting for a manual submit.
    pub auto_send: bool,
    /// Speak accepted assistant turns.
    pub auto_speech: bool,
    pub log_timings: bool,
}

impl Default for CoachConfig {
    fn default() -> Self {
        Self {
            session_log: SessionLogConfig::default(),
            dispatch: DispatchConfig::default(),
            capture: CaptureConfig::default(),
            playback: PlaybackConfig::default(),
            response_dedup_window: crate::config::DEFAULT_RESPONSE_DEDUP_WINDOW,
            auto_send: true,
            auto_speech: true,
            log_timings: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSource {
    Capture,
    Playback,
}

impl NoticeSource {
    pub fn label(self) -> &'static str {
        match self {
            NoticeSource::Capture => "capture",
            NoticeSource::Playback => "playback",
        }
    }
}

/// Something the coach filtered out on purpose. Never shown as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    Dispatch(DispatchError),
    DuplicateReply,
    Playback(SkipReason),
}

impl Suppression {
    pub fn label(self) -> &'static str {
        match self {
            Suppression::Dispatch(err) => err.label(),
            Suppression::DuplicateReply => "duplicate_reply",
            Suppression::Playback(reason) => reason.label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoachEvent {
    StateChanged(ConversationState),
    TurnAppended(Turn),
    Transcript(CaptureEvent),
    Notice {
        source: NoticeSource,
        message: String,
    },
    Suppressed(Suppression),
    /// An utterance started for `message_id`; `text` is what the device received.
    Speak {
        message_id: MessageId,
        text: String,
    },
    ExchangeFinished {
        job_id: ExchangeJobId,
        attempts: u32,
        elapsed: Duration,
        error: Option<ExchangeError>,
    },
}

/// Assistant turn recorded in place of a reply when an exchange fails.
pub fn apology_text(error: ExchangeError) -> Option<&'static str> {
    match error {
        ExchangeError::Aborted => None,
        ExchangeError::Timeout => {
            Some("Sorry, that took too long to answer. Please try asking again.")
        }
        ExchangeError::ServiceUnavailable => {
            Some("Sorry, the coach is unavailable right now. Please try again in a moment.")
        }
        ExchangeError::InvalidResponse => {
            Some("Sorry, I didn't get a usable answer. Could you ask that again?")
        }
        ExchangeError::ClientError => Some("Sorry, I couldn't process that request."),
    }
}

struct PendingExchange {
    token: DispatchTokenId,
    job: ExchangeJob,
}

pub struct VoiceCoach {
    config: CoachConfig,
    log: SessionLog,
    gate: DispatchGate,
    responses: ResponseGuard,
    exchange: ExchangeClient,
    capture: CaptureSession,
    playback: PlaybackSession,
    pending: Option<PendingExchange>,
    state: ConversationState,
    subscribers: Vec<Sender<ConversationState>>,
    events: VecDeque<CoachEvent>,
    stats: SessionStats,
}

impl VoiceCoach {
    pub fn new(
        config: CoachConfig,
        exchange: ExchangeClient,
        capture_device: Box<dyn CaptureDevice>,
        playback_device: Box<dyn PlaybackDevice>,
    ) -> Self {
        Self {
            log: SessionLog::new(config.session_log),
            gate: DispatchGate::new(config.dispatch),
            responses: ResponseGuard::new(config.response_dedup_window),
            exchange,
            capture: CaptureSession::new(config.capture, capture_device),
            playback: PlaybackSession::new(config.playback, playback_device),
            pending: None,
            state: ConversationState::Idle,
            subscribers: Vec::new(),
            events: VecDeque::new(),
            stats: SessionStats::new(),
            config,
        }
    }

    pub fn config(&self) -> &CoachConfig {
        &self.config
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// State feed; the current state is delivered first.
    pub fn subscribe(&mut self) -> Receiver<ConversationState> {
        let (tx, rx) = unbounded();
        let _ = tx.send(self.state);
        self.subscribers.push(tx);
        rx
    }

    pub fn drain_events(&mut self) -> Vec<CoachEvent> {
        self.events.drain(..).collect()
    }

    /// Every retained turn, oldest first.
    pub fn current_turns(&self) -> Vec<Turn> {
        self.log.turns().cloned().collect()
    }

    pub fn display_turns(&self) -> Vec<Turn> {
        self.log.display_window()
    }

    pub fn submit_text(&mut self, text: &str, now: Instant) -> Result<TurnId, DispatchError> {
        let result = self.dispatch(text, now);
        self.publish_state();
        result
    }

    /// Submit a spoken message. Playback is interrupted first so the coach
    /// never talks over the user.
    pub fn submit_voice(&mut self, text: &str, now: Instant) -> Result<TurnId, DispatchError> {
        self.barge_in();
        let result = self.dispatch(text, now);
        self.publish_state();
        result
    }

    pub fn start_listening(&mut self, now: Instant) -> Result<StartOutcome, CaptureError> {
        self.barge_in();
        let result = self.capture.start(now);
        if let Err(err) = result {
            self.notice(NoticeSource::Capture, err.to_string());
        }
        self.publish_state();
        result
    }

    /// Stop capture; pending interim text is promoted and handled as a final.
    pub fn stop_listening(&mut self, now: Instant) {
        if let Some(event) = self.capture.stop(now) {
            self.handle_transcript(event, now);
        }
        self.publish_state();
    }

    pub fn interrupt_playback(&mut self) -> Option<MessageId> {
        let interrupted = self.playback.interrupt();
        if interrupted.is_some() {
            self.stats.interrupts += 1;
        }
        self.publish_state();
        interrupted
    }

    /// Pump capture, exchange and playback reports, then republish state.
    pub fn tick(&mut self, now: Instant) {
        for update in self.capture.poll(now) {
            match update {
                CaptureUpdate::Transcript(event) => self.handle_transcript(event, now),
                CaptureUpdate::Failed(err) => {
                    self.notice(NoticeSource::Capture, err.to_string());
                }
            }
        }

        let outcome = self
            .pending
            .as_mut()
            .and_then(|pending| pending.job.try_outcome());
        if let Some(outcome) = outcome {
            self.handle_outcome(outcome, now);
        }

        for update in self.playback.poll() {
            match update {
                PlaybackUpdate::Started { message_id } => {
                    log_debug(&format!("VoiceCoach: speaking turn {message_id}"));
                }
                PlaybackUpdate::Finished { message_id } => {
                    log_debug(&format!("VoiceCoach: finished speaking turn {message_id}"));
                }
                PlaybackUpdate::Failed { message_id, error } => {
                    log_debug(&format!("VoiceCoach: playback of turn {message_id} failed"));
                    self.notice(NoticeSource::Playback, error.to_string());
                }
            }
        }

        self.publish_state();
    }

    fn handle_transcript(&mut self, event: CaptureEvent, now: Instant) {
        self.barge_in();
        let is_final = event.is_final;
        let text = event.text.clone();
        self.events.push_back(CoachEvent::Transcript(event));
        if is_final && self.config.auto_send {
            let _ = self.dispatch(&text, now);
        }
    }

    fn barge_in(&mut self) {
        if let Some(message_id) = self.playback.interrupt() {
            self.stats.interrupts += 1;
            log_debug(&format!("VoiceCoach: barge-in stopped turn {message_id}"));
        }
    }

    fn dispatch(&mut self, text: &str, now: Instant) -> Result<TurnId, DispatchError> {
        let accepted = match self.gate.submit(text, &mut self.log, now) {
            Ok(accepted) => accepted,
            Err(err) => {
                self.stats.suppressed += 1;
                log_debug(&format!("VoiceCoach: submission suppressed ({})", err.label()));
                tracing::debug!(reason = err.label(), "dispatch suppressed");
                self.events
                    .push_back(CoachEvent::Suppressed(Suppression::Dispatch(err)));
                return Err(err);
            }
        };

        if let Some(stale) = accepted.recovered_stale {
            self.stats.stale_recoveries += 1;
            if let Some(previous) = self.pending.take() {
                log_debug(&format!(
                    "VoiceCoach: abandoning exchange {} held by stale token {stale}",
                    previous.job.id
                ));
                previous.job.abort();
            }
        }

        if accepted.resent {
            log_debug(&format!("VoiceCoach: resending unanswered turn {}", accepted.turn_id));
        } else {
            self.push_turn(accepted.turn_id);
        }
        let job = self.exchange.send(&accepted.context);
        log_debug_content(&format!("VoiceCoach: dispatching {text:?} as job {}", job.id));
        self.pending = Some(PendingExchange {
            token: accepted.token,
            job,
        });
        self.stats.dispatches += 1;
        Ok(accepted.turn_id)
    }

    fn handle_outcome(&mut self, outcome: ExchangeOutcome, now: Instant) {
        // Only the live job is polled; abandoned jobs are dropped unread.
        let Some(pending) = self.pending.take() else {
            return;
        };
        self.gate.release(pending.token);
        self.exchange.mark_finished(outcome.job_id);
        self.stats.retries += outcome.attempts.saturating_sub(1);

        if self.config.log_timings {
            log_debug(&format!(
                "timing|phase=exchange|job={}|attempts={}|elapsed_ms={}|result={}",
                outcome.job_id,
                outcome.attempts,
                outcome.elapsed.as_millis(),
                match &outcome.result {
                    Ok(_) => "ok",
                    Err(err) => err.label(),
                }
            ));
        }
        self.events.push_back(CoachEvent::ExchangeFinished {
            job_id: outcome.job_id,
            attempts: outcome.attempts,
            elapsed: outcome.elapsed,
            error: outcome.result.as_ref().err().copied(),
        });

        match outcome.result {
            Ok(reply) => match self.responses.accept(&mut self.log, &reply.text, now) {
                Some(turn_id) => {
                    self.stats.replies += 1;
                    self.push_turn(turn_id);
                    self.auto_speak(turn_id, now);
                }
                None => {
                    self.stats.duplicate_replies += 1;
                    self.events
                        .push_back(CoachEvent::Suppressed(Suppression::DuplicateReply));
                }
            },
            Err(err) => {
                let Some(apology) = apology_text(err) else {
                    return;
                };
                match self.log.append(Role::Assistant, apology, now) {
                    Ok(turn_id) => {
                        self.stats.apologies += 1;
                        self.push_turn(turn_id);
                        self.auto_speak(turn_id, now);
                    }
                    Err(append_err) => {
                        log_debug(&format!("VoiceCoach: apology not recorded: {append_err}"));
                    }
                }
            }
        }
    }

    fn auto_speak(&mut self, turn_id: TurnId, now: Instant) {
        if !self.config.auto_speech {
            return;
        }
        let Some(text) = self.log.get(turn_id).map(|turn| turn.text.clone()) else {
            return;
        };
        match self.playback.speak(&text, turn_id, now) {
            Ok(SpeakOutcome::Started { text, .. }) => {
                self.stats.utterances += 1;
                self.events.push_back(CoachEvent::Speak {
                    message_id: turn_id,
                    text,
                });
            }
            Ok(SpeakOutcome::Skipped(reason)) => {
                self.events
                    .push_back(CoachEvent::Suppressed(Suppression::Playback(reason)));
            }
            Err(err) => self.notice(NoticeSource::Playback, err.to_string()),
        }
    }

    fn push_turn(&mut self, turn_id: TurnId) {
        if let Some(turn) = self.log.get(turn_id) {
            self.events.push_back(CoachEvent::TurnAppended(turn.clone()));
        }
    }

    fn notice(&mut self, source: NoticeSource, message: String) {
        log_debug(&format!("VoiceCoach: {} notice: {message}", source.label()));
        self.events.push_back(CoachEvent::Notice { source, message });
    }

    fn publish_state(&mut self) {
        let next = ConversationState::derive(
            self.capture.is_listening(),
            self.playback.is_speaking(),
            self.gate.in_flight(),
        );
        if next == self.state {
            return;
        }
        tracing::debug!(from = self.state.label(), to = next.label(), "conversation state");
        self.state = next;
        self.subscribers.retain(|tx| tx.send(next).is_ok());
        self.events.push_back(CoachEvent::StateChanged(next));
    }
}
