//! JSON IPC mode for external UI integration.
//!
//! The UI talks to the coach over newline-delimited JSON on stdin/stdout.
//!
//! Architecture:
//! - Stdin reader thread: parses commands, sends them to the main loop
//! - Main loop: applies commands to the coach, ticks it, forwards its events
//! - Client devices: when no local recognizer/TTS command is configured, the
//!   UI does recognition and synthesis and reports back through commands
//!
//! Protocol:
//! - Events (Rust → client): {"event": "...", ...}
//! - Commands (client → Rust): {"cmd": "...", ...}

mod devices;
mod protocol;
mod router;
mod session;

#[cfg(test)]
mod tests;

pub use protocol::{IpcCommand, IpcEvent, IpcTurn};
pub use session::run_ipc_mode;
