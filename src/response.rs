//! Duplicate suppression for incoming assistant messages. Client retries can
//! deliver the same reply twice; only the first is recorded.

use crate::session_log::{Role, SessionLog, TurnId};
use crate::text::normalize_for_compare;
use std::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct ResponseGuard {
    /// Number of recent assistant turns a candidate is compared against.
    window: usize,
}

impl Default for ResponseGuard {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_RESPONSE_DEDUP_WINDOW)
    }
}

impl ResponseGuard {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    pub fn is_duplicate(&self, log: &SessionLog, text: &str) -> bool {
        let candidate = normalize_for_compare(text);
        log.recent_by_role(Role::Assistant, self.window)
            .any(|turn| normalize_for_compare(&turn.text) == candidate)
    }

    /// Append the reply unless it repeats a recent assistant turn.
    pub fn accept(&self, log: &mut SessionLog, text: &str, now: Instant) -> Option<TurnId> {
        if self.is_duplicate(log, text) {
            crate::log_debug("ResponseGuard: duplicate assistant reply dropped");
            return None;
        }
        log.append(Role::Assistant, text, now).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_log::SessionLogConfig;

    fn log_with(turns: &[(Role, &str)]) -> SessionLog {
        let mut log = SessionLog::new(SessionLogConfig::default());
        let now = Instant::now();
        for (role, text) in turns {
            log.append(*role, text, now).unwrap();
        }
        log
    }

    #[test]
    fn accepts_fresh_reply() {
        let mut log = log_with(&[(Role::User, "How do I improve my serve?")]);
        let id = ResponseGuard::default().accept(&mut log, "Focus on your toss.", Instant::now());
        assert!(id.is_some());
        assert_eq!(log.last().unwrap().role, Role::Assistant);
    }

    #[test]
    fn rejects_reply_seen_in_recent_window() {
        let mut log = log_with(&[
            (Role::User, "q1"),
            (Role::Assistant, "Focus on your toss."),
            (Role::User, "q2"),
            (Role::Assistant, "Bend your knees."),
            (Role::User, "q3"),
        ]);
        let guard = ResponseGuard::default();
        assert!(guard
            .accept(&mut log, "focus on your toss. 🎾", Instant::now())
            .is_none());
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn old_replies_outside_window_are_allowed() {
        let mut log = log_with(&[
            (Role::Assistant, "Warm up first."),
            (Role::User, "q1"),
            (Role::Assistant, "a"),
            (Role::User, "q2"),
            (Role::Assistant, "b"),
            (Role::User, "q3"),
            (Role::Assistant, "c"),
            (Role::User, "q4"),
        ]);
        let guard = ResponseGuard::new(3);
        assert!(guard.accept(&mut log, "Warm up first.", Instant::now()).is_some());
    }
}
