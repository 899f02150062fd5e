//! Ordered, append-only history of conversation turns. Feeds both the short
//! display window and the longer context window sent to the exchange.

use crate::text::normalize_for_compare;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

/// Monotonic turn identifier; never reused within a session.
pub type TurnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One user- or assistant-authored message. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub id: TurnId,
    pub role: Role,
    pub text: String,
    pub created_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLogConfig {
    pub display_turns: usize,
    pub context_turns: usize,
    /// Storage cap; the oldest turns are dropped past this point.
    pub retained_turns: usize,
}

impl Default for SessionLogConfig {
    fn default() -> Self {
        Self {
            display_turns: crate::config::DEFAULT_DISPLAY_TURNS,
            context_turns: crate::config::DEFAULT_CONTEXT_TURNS,
            retained_turns: crate::config::DEFAULT_RETAINED_TURNS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendError {
    Empty,
    /// Same role and normalized text as the turn immediately before it.
    AdjacentDuplicate,
}

impl fmt::Display for AppendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppendError::Empty => f.write_str("turn text is empty"),
            AppendError::AdjacentDuplicate => f.write_str("turn repeats the previous turn"),
        }
    }
}

impl std::error::Error for AppendError {}

pub struct SessionLog {
    config: SessionLogConfig,
    turns: VecDeque<Turn>,
    next_id: TurnId,
}

impl SessionLog {
    pub fn new(config: SessionLogConfig) -> Self {
        let retained = config
            .retained_turns
            .max(config.context_turns)
            .max(config.display_turns);
        Self {
            config: SessionLogConfig {
                retained_turns: retained,
                ..config
            },
            turns: VecDeque::with_capacity(retained.min(256)),
            next_id: 0,
        }
    }

    pub fn append(&mut self, role: Role, text: &str, now: Instant) -> Result<TurnId, AppendError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppendError::Empty);
        }
        if let Some(last) = self.turns.back() {
            if last.role == role && normalize_for_compare(&last.text) == normalize_for_compare(text)
            {
                return Err(AppendError::AdjacentDuplicate);
            }
        }
        self.next_id += 1;
        let id = self.next_id;
        self.turns.push_back(Turn {
            id,
            role,
            text: text.to_string(),
            created_at: now,
        });
        while self.turns.len() > self.config.retained_turns {
            self.turns.pop_front();
        }
        Ok(id)
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        // Ids are dense and increasing, so the offset from the front is exact.
        let front = self.turns.front()?.id;
        let offset = id.checked_sub(front)? as usize;
        self.turns.get(offset).filter(|turn| turn.id == id)
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.back()
    }

    /// Most recent `limit` turns of `role`, newest first.
    pub fn recent_by_role(&self, role: Role, limit: usize) -> impl Iterator<Item = &Turn> {
        self.turns
            .iter()
            .rev()
            .filter(move |turn| turn.role == role)
            .take(limit)
    }

    pub fn display_window(&self) -> Vec<Turn> {
        self.tail(self.config.display_turns)
    }

    pub fn context_window(&self) -> Vec<Turn> {
        self.tail(self.config.context_turns)
    }

    pub fn turns(&self) -> impl ExactSizeIterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn tail(&self, count: usize) -> Vec<Turn> {
        let skip = self.turns.len().saturating_sub(count);
        self.turns.iter().skip(skip).cloned().collect()
    }
}
