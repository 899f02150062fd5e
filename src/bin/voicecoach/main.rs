//! VoiceCoach entrypoint: JSON IPC on stdin/stdout, driven by an external UI.

use anyhow::Result;
use std::panic;
use voicecoach::config::AppConfig;
use voicecoach::ipc::run_ipc_mode;
use voicecoach::{init_logging, init_tracing, log_debug, log_file_path, log_panic};

fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        log_panic(info);
        let location = info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        log_debug(&format!("panic at {location}"));
        previous(info);
    }));
}

fn main() -> Result<()> {
    let config = AppConfig::parse_args()?;
    install_panic_hook();
    init_logging(&config);
    init_tracing(&config);
    log_debug(&format!(
        "voicecoach {} starting (debug log at {})",
        env!("CARGO_PKG_VERSION"),
        log_file_path().display()
    ));
    run_ipc_mode(config)
}
