//! Conversation core for a voice coaching assistant: speech capture, single-flight
//! dispatch to a conversational endpoint, reply dedup, and interruptible playback.

pub mod app;
pub mod cancel;
pub mod capture;
pub mod coach;
pub mod config;
pub mod dispatch;
pub mod exchange;
pub mod ipc;
mod lock;
pub mod playback;
mod process;
pub mod response;
pub mod session_log;
pub mod state;
mod telemetry;
pub mod text;

pub(crate) use lock::lock_or_recover;

pub use app::logging::{
    crash_log_path, init_logging, log_debug, log_debug_content, log_file_path, log_panic,
    logging_enabled,
};
pub use coach::{CoachConfig, CoachEvent, VoiceCoach};
pub use state::ConversationState;
pub use telemetry::{init_tracing, tracing_log_path};
