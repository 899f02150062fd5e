//! Single-flight gate for outgoing user messages.
//!
//! A voice auto-send and a manual send can fire for the same utterance within
//! a few hundred milliseconds; the gate lets exactly one of them through and
//! keeps at most one exchange in flight.

use crate::session_log::{AppendError, Role, SessionLog, Turn, TurnId};
use crate::text::normalize_for_compare;
use std::fmt;
use std::time::{Duration, Instant};

pub type DispatchTokenId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Identical text inside this window is rejected as a duplicate.
    pub cooldown: Duration,
    /// A token older than this is presumed stuck and force-cleared.
    pub stale_lock_after: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(crate::config::DEFAULT_DISPATCH_COOLDOWN_MS),
            stale_lock_after: Duration::from_millis(crate::config::DEFAULT_STALE_LOCK_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    AlreadyInFlight,
    DuplicateMessage,
    Empty,
}

impl DispatchError {
    pub fn label(self) -> &'static str {
        match self {
            DispatchError::AlreadyInFlight => "already_in_flight",
            DispatchError::DuplicateMessage => "duplicate_message",
            DispatchError::Empty => "empty",
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::AlreadyInFlight => f.write_str("a message is already being answered"),
            DispatchError::DuplicateMessage => f.write_str("message repeats the one just sent"),
            DispatchError::Empty => f.write_str("message is empty"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// In-flight marker; at most one exists at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchToken {
    pub id: DispatchTokenId,
    pub started_at: Instant,
    pub normalized_text: String,
}

/// Result of an accepted submission.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub token: DispatchTokenId,
    pub turn_id: TurnId,
    /// Context window including the new user turn, ready for the exchange.
    pub context: Vec<Turn>,
    /// Token that was force-cleared as stale to make room for this one.
    pub recovered_stale: Option<DispatchTokenId>,
    /// The text repeats an unanswered user turn; that turn is resent as-is.
    pub resent: bool,
}

#[derive(Debug, Default)]
pub struct DispatchGate {
    config: DispatchConfig,
    token: Option<DispatchToken>,
    last_accepted: Option<(String, Instant)>,
    next_token_id: DispatchTokenId,
}

impl DispatchGate {
    pub fn new(config: DispatchConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Record the user turn and take the in-flight token, or explain why not.
    pub fn submit(
        &mut self,
        text: &str,
        log: &mut SessionLog,
        now: Instant,
    ) -> Result<Accepted, DispatchError> {
        let normalized = normalize_for_compare(text);
        if normalized.is_empty() {
            return Err(DispatchError::Empty);
        }

        if let Some((last_text, accepted_at)) = &self.last_accepted {
            if *last_text == normalized && now.saturating_duration_since(*accepted_at) < self.config.cooldown {
                return Err(DispatchError::DuplicateMessage);
            }
        }

        let mut recovered_stale = None;
        if let Some(token) = &self.token {
            let age = now.saturating_duration_since(token.started_at);
            if age < self.config.stale_lock_after {
                return Err(DispatchError::AlreadyInFlight);
            }
            crate::log_debug(&format!(
                "DispatchGate: clearing stale token {} after {}ms",
                token.id,
                age.as_millis()
            ));
            tracing::warn!(token = token.id, age_ms = age.as_millis() as u64, "stale dispatch lock cleared");
            recovered_stale = Some(token.id);
        }

        // Past the cooldown, repeating a question that never got an answer
        // resends the existing turn instead of stacking a copy.
        let (turn_id, resent) = match log.append(Role::User, text, now) {
            Ok(id) => (id, false),
            Err(AppendError::Empty) => return Err(DispatchError::Empty),
            Err(AppendError::AdjacentDuplicate) => match log.last() {
                Some(last) if last.role == Role::User => (last.id, true),
                _ => return Err(DispatchError::DuplicateMessage),
            },
        };

        if recovered_stale.is_some() {
            self.token = None;
        }
        self.next_token_id += 1;
        let token = self.next_token_id;
        self.token = Some(DispatchToken {
            id: token,
            started_at: now,
            normalized_text: normalized.clone(),
        });
        self.last_accepted = Some((normalized, now));

        Ok(Accepted {
            token,
            turn_id,
            context: log.context_window(),
            recovered_stale,
            resent,
        })
    }

    /// Release the token if it is still the active one. A token that was
    /// force-cleared as stale can no longer release its successor.
    pub fn release(&mut self, token: DispatchTokenId) -> bool {
        match &self.token {
            Some(active) if active.id == token => {
                self.token = None;
                true
            }
            _ => false,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.token.is_some()
    }

    pub fn active_token(&self) -> Option<&DispatchToken> {
        self.token.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_log::SessionLogConfig;

    fn gate() -> (DispatchGate, SessionLog) {
        (
            DispatchGate::new(DispatchConfig::default()),
            SessionLog::new(SessionLogConfig::default()),
        )
    }

    fn user_turns(log: &SessionLog) -> usize {
        log.turns().filter(|t| t.role == Role::User).count()
    }

    #[test]
    fn rejects_whitespace_only() {
        let (mut gate, mut log) = gate();
        assert_eq!(
            gate.submit("   \t", &mut log, Instant::now()).unwrap_err(),
            DispatchError::Empty
        );
        assert_eq!(
            gate.submit("🎾", &mut log, Instant::now()).unwrap_err(),
            DispatchError::Empty
        );
        assert!(log.is_empty());
        assert!(!gate.in_flight());
    }

    #[test]
    fn rapid_identical_submits_append_one_turn() {
        let (mut gate, mut log) = gate();
        let start = Instant::now();
        assert!(gate.submit("How do I improve my serve?", &mut log, start).is_ok());
        for step in 1..10 {
            let now = start + Duration::from_millis(step * 100);
            assert!(gate.submit("How do I improve my serve?", &mut log, now).is_err());
        }
        assert_eq!(user_turns(&log), 1);
    }

    #[test]
    fn duplicate_within_cooldown_reports_duplicate_not_in_flight() {
        let (mut gate, mut log) = gate();
        let start = Instant::now();
        gate.submit("Same words", &mut log, start).unwrap();
        let err = gate
            .submit("same words", &mut log, start + Duration::from_millis(500))
            .unwrap_err();
        assert_eq!(err, DispatchError::DuplicateMessage);
        assert_eq!(user_turns(&log), 1);
    }

    #[test]
    fn different_text_while_in_flight_is_rejected() {
        let (mut gate, mut log) = gate();
        let start = Instant::now();
        gate.submit("first", &mut log, start).unwrap();
        let err = gate
            .submit("second", &mut log, start + Duration::from_millis(100))
            .unwrap_err();
        assert_eq!(err, DispatchError::AlreadyInFlight);
    }

    #[test]
    fn release_frees_the_gate() {
        let (mut gate, mut log) = gate();
        let start = Instant::now();
        let accepted = gate.submit("first", &mut log, start).unwrap();
        assert!(gate.release(accepted.token));
        assert!(!gate.release(accepted.token));
        log.append(Role::Assistant, "reply", start).unwrap();
        assert!(gate
            .submit("second", &mut log, start + Duration::from_millis(10))
            .is_ok());
    }

    #[test]
    fn stale_lock_is_force_cleared() {
        let (mut gate, mut log) = gate();
        let start = Instant::now();
        let first = gate.submit("first", &mut log, start).unwrap();
        let later = start + Duration::from_millis(5_001);
        let second = gate.submit("second", &mut log, later).unwrap();
        assert_eq!(second.recovered_stale, Some(first.token));
        assert!(!gate.release(first.token));
        assert!(gate.in_flight());
        assert!(gate.release(second.token));
    }

    #[test]
    fn same_text_allowed_after_cooldown_once_released() {
        let (mut gate, mut log) = gate();
        let start = Instant::now();
        let first = gate.submit("again please", &mut log, start).unwrap();
        gate.release(first.token);
        log.append(Role::Assistant, "here you go", start).unwrap();
        assert!(gate
            .submit("again please", &mut log, start + Duration::from_millis(2_100))
            .is_ok());
    }

    #[test]
    fn unanswered_question_is_resent_after_cooldown() {
        let (mut gate, mut log) = gate();
        let start = Instant::now();
        let first = gate.submit("hello", &mut log, start).unwrap();
        gate.release(first.token);
        assert!(!first.resent);

        let later = start + Duration::from_secs(60);
        let again = gate.submit("HELLO", &mut log, later).unwrap();
        assert!(again.resent);
        assert_eq!(again.turn_id, first.turn_id);
        assert_eq!(user_turns(&log), 1);
        assert_eq!(again.context.last().map(|t| t.id), Some(first.turn_id));
    }

    #[test]
    fn context_window_ends_with_new_user_turn() {
        let (mut gate, mut log) = gate();
        let accepted = gate.submit("hello coach", &mut log, Instant::now()).unwrap();
        let last = accepted.context.last().unwrap();
        assert_eq!(last.id, accepted.turn_id);
        assert_eq!(last.role, Role::User);
    }
}
