//! Session counters summarized on exit when logging is enabled.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Submissions that reached the exchange
    pub dispatches: u32,
    /// Submissions filtered by the dispatch gate
    pub suppressed: u32,
    /// Stale dispatch locks force-cleared
    pub stale_recoveries: u32,
    /// Exchange attempts beyond the first
    pub retries: u32,
    /// Assistant replies recorded
    pub replies: u32,
    /// Replies dropped as duplicates
    pub duplicate_replies: u32,
    /// Apology turns recorded after failed exchanges
    pub apologies: u32,
    /// Utterances spoken
    pub utterances: u32,
    /// Playback interrupted (barge-in or manual)
    pub interrupts: u32,
    start_time: Option<Instant>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    pub fn session_duration(&self) -> Duration {
        self.start_time
            .map(|start| start.elapsed())
            .unwrap_or_default()
    }

    pub fn has_activity(&self) -> bool {
        self.dispatches > 0 || self.suppressed > 0 || self.utterances > 0
    }
}

/// One-line summary for the debug log; empty when nothing happened.
pub fn format_session_stats(stats: &SessionStats) -> String {
    if !stats.has_activity() {
        return String::new();
    }
    format!(
        "session|duration_s={:.1}|dispatches={}|suppressed={}|stale_recoveries={}|retries={}|replies={}|duplicate_replies={}|apologies={}|utterances={}|interrupts={}",
        stats.session_duration().as_secs_f32(),
        stats.dispatches,
        stats.suppressed,
        stats.stale_recoveries,
        stats.retries,
        stats.replies,
        stats.duplicate_replies,
        stats.apologies,
        stats.utterances,
        stats.interrupts,
    )
}
