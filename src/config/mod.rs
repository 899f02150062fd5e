//! Command-line parsing, validation, and per-component config derivation.

mod defaults;
#[cfg(test)]
mod tests;
mod validation;

use crate::capture::CaptureConfig;
use crate::coach::CoachConfig;
use crate::dispatch::DispatchConfig;
use crate::exchange::{ExchangeConfig, RetryPolicy};
use crate::playback::{PlaybackConfig, SpeechParams};
use crate::session_log::SessionLogConfig;
use clap::{Parser, ValueEnum};
use std::time::Duration;

pub use defaults::{
    DEFAULT_CONTEXT_TURNS, DEFAULT_DISPATCH_COOLDOWN_MS, DEFAULT_DISPLAY_TURNS,
    DEFAULT_EXCHANGE_RETRIES, DEFAULT_EXCHANGE_TIMEOUT_MS, DEFAULT_RESPONSE_DEDUP_WINDOW,
    DEFAULT_RETAINED_TURNS, DEFAULT_RETRY_BASE_DELAY_MS, DEFAULT_SILENCE_TIMEOUT_MS,
    DEFAULT_SPEAK_COOLDOWN_MS, DEFAULT_SPEECH_PITCH, DEFAULT_SPEECH_RATE,
    DEFAULT_SPEECH_VOLUME, DEFAULT_STALE_LOCK_MS,
};

/// CLI options for the voice coach. Validated values keep the guards and
/// subprocesses within sane bounds.
#[derive(Debug, Parser, Clone)]
#[command(about = "VoiceCoach conversation core", author, version)]
pub struct AppConfig {
    /// Conversational endpoint URL (JSON POST)
    #[arg(long = "endpoint-url", env = "VOICECOACH_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Command that answers one exchange (request JSON on stdin, reply JSON on stdout)
    #[arg(long = "endpoint-cmd", env = "VOICECOACH_ENDPOINT_CMD")]
    pub endpoint_cmd: Option<String>,

    /// Speech synthesis command; `{rate}`, `{pitch}`, `{volume}` are substituted
    #[arg(long = "tts-cmd", env = "VOICECOACH_TTS_CMD")]
    pub tts_cmd: Option<String>,

    /// Turns shown to the user
    #[arg(long = "display-turns", default_value_t = DEFAULT_DISPLAY_TURNS)]
    pub display_turns: usize,

    /// Turns sent to the exchange as context
    #[arg(long = "context-turns", default_value_t = DEFAULT_CONTEXT_TURNS)]
    pub context_turns: usize,

    /// Turns kept in memory before the oldest are dropped
    #[arg(long = "retained-turns", default_value_t = DEFAULT_RETAINED_TURNS)]
    pub retained_turns: usize,

    /// Recent assistant turns compared when suppressing duplicate replies
    #[arg(long = "response-dedup-window", default_value_t = DEFAULT_RESPONSE_DEDUP_WINDOW)]
    pub response_dedup_window: usize,

    /// Window in which an identical outgoing message is suppressed (milliseconds)
    #[arg(long = "dispatch-cooldown-ms", default_value_t = DEFAULT_DISPATCH_COOLDOWN_MS)]
    pub dispatch_cooldown_ms: u64,

    /// Age after which an in-flight dispatch lock is presumed stuck (milliseconds)
    #[arg(long = "stale-lock-ms", default_value_t = DEFAULT_STALE_LOCK_MS)]
    pub stale_lock_ms: u64,

    /// Window in which identical text is not spoken again (milliseconds)
    #[arg(long = "speak-cooldown-ms", default_value_t = DEFAULT_SPEAK_COOLDOWN_MS)]
    pub speak_cooldown_ms: u64,

    /// Silence before capture finalizes and stops (milliseconds)
    #[arg(long = "silence-timeout-ms", default_value_t = DEFAULT_SILENCE_TIMEOUT_MS)]
    pub silence_timeout_ms: u64,

    /// Hard timeout for each exchange attempt (milliseconds)
    #[arg(long = "exchange-timeout-ms", default_value_t = DEFAULT_EXCHANGE_TIMEOUT_MS)]
    pub exchange_timeout_ms: u64,

    /// Retries for retryable exchange failures
    #[arg(long = "exchange-retries", default_value_t = DEFAULT_EXCHANGE_RETRIES)]
    pub exchange_retries: u32,

    /// Base delay between exchange retries (milliseconds)
    #[arg(long = "retry-base-delay-ms", default_value_t = DEFAULT_RETRY_BASE_DELAY_MS)]
    pub retry_base_delay_ms: u64,

    /// Growth of the delay between retries
    #[arg(long = "retry-backoff", value_enum, default_value_t = BackoffKind::Linear)]
    pub retry_backoff: BackoffKind,

    /// Speech rate passed to the synthesis device
    #[arg(long = "speech-rate", default_value_t = DEFAULT_SPEECH_RATE)]
    pub speech_rate: f32,

    /// Speech pitch passed to the synthesis device
    #[arg(long = "speech-pitch", default_value_t = DEFAULT_SPEECH_PITCH)]
    pub speech_pitch: f32,

    /// Speech volume passed to the synthesis device
    #[arg(long = "speech-volume", default_value_t = DEFAULT_SPEECH_VOLUME)]
    pub speech_volume: f32,

    /// Keep final voice transcripts for manual sending instead of dispatching them
    #[arg(long = "no-auto-send", default_value_t = false)]
    pub no_auto_send: bool,

    /// Do not speak assistant replies
    #[arg(long = "no-auto-speech", default_value_t = false)]
    pub no_auto_speech: bool,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOICECOACH_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOICECOACH_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Allow logging transcript/reply snippets (debug log only)
    #[arg(
        long = "log-content",
        env = "VOICECOACH_LOG_CONTENT",
        default_value_t = false
    )]
    pub log_content: bool,

    /// Enable verbose timing logs
    #[arg(long)]
    pub log_timings: bool,
}

/// How the delay between exchange retries grows with the attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackoffKind {
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    Exponential,
}

impl BackoffKind {
    pub fn label(self) -> &'static str {
        match self {
            BackoffKind::Linear => "linear",
            BackoffKind::Exponential => "exponential",
        }
    }
}

impl AppConfig {
    pub fn session_log_config(&self) -> SessionLogConfig {
        SessionLogConfig {
            display_turns: self.display_turns,
            context_turns: self.context_turns,
            retained_turns: self.retained_turns,
        }
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            cooldown: Duration::from_millis(self.dispatch_cooldown_ms),
            stale_lock_after: Duration::from_millis(self.stale_lock_ms),
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            silence_timeout: Duration::from_millis(self.silence_timeout_ms),
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            cooldown: Duration::from_millis(self.speak_cooldown_ms),
            params: SpeechParams {
                rate: self.speech_rate,
                pitch: self.speech_pitch,
                volume: self.speech_volume,
            },
        }
    }

    pub fn exchange_config(&self) -> ExchangeConfig {
        ExchangeConfig {
            attempt_timeout: Duration::from_millis(self.exchange_timeout_ms),
            policy: RetryPolicy::new(
                self.exchange_retries,
                Duration::from_millis(self.retry_base_delay_ms),
                self.retry_backoff,
            ),
        }
    }

    pub fn coach_config(&self) -> CoachConfig {
        CoachConfig {
            session_log: self.session_log_config(),
            dispatch: self.dispatch_config(),
            capture: self.capture_config(),
            playback: self.playback_config(),
            response_dedup_window: self.response_dedup_window,
            auto_send: !self.no_auto_send,
            auto_speech: !self.no_auto_speech,
            log_timings: self.log_timings,
        }
    }
}
