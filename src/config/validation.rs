use super::defaults::{
    FORBIDDEN_COMMAND_CHARS, MAX_CONTEXT_TURNS, MAX_COOLDOWN_MS, MAX_EXCHANGE_RETRIES,
    MAX_EXCHANGE_TIMEOUT_MS,
};
use super::AppConfig;
use anyhow::{bail, Context, Result};
use clap::Parser;

impl AppConfig {
    /// Parse CLI arguments and validate them right away.
    pub fn parse_args() -> Result<Self> {
        let mut config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    /// Check CLI values and normalize endpoint/command strings.
    pub fn validate(&mut self) -> Result<()> {
        if self.display_turns == 0 {
            bail!("--display-turns must be at least 1");
        }
        if self.context_turns < self.display_turns || self.context_turns > MAX_CONTEXT_TURNS {
            bail!(
                "--context-turns must be between --display-turns ({}) and {MAX_CONTEXT_TURNS}, got {}",
                self.display_turns,
                self.context_turns
            );
        }
        if self.retained_turns < self.context_turns {
            bail!(
                "--retained-turns ({}) cannot be smaller than --context-turns ({})",
                self.retained_turns,
                self.context_turns
            );
        }
        if !(1..=20).contains(&self.response_dedup_window) {
            bail!(
                "--response-dedup-window must be between 1 and 20, got {}",
                self.response_dedup_window
            );
        }
        for (flag, value) in [
            ("--dispatch-cooldown-ms", self.dispatch_cooldown_ms),
            ("--speak-cooldown-ms", self.speak_cooldown_ms),
        ] {
            if value > MAX_COOLDOWN_MS {
                bail!("{flag} must be at most {MAX_COOLDOWN_MS} ms, got {value}");
            }
        }
        if self.stale_lock_ms < 1_000 || self.stale_lock_ms > MAX_EXCHANGE_TIMEOUT_MS {
            bail!(
                "--stale-lock-ms must be between 1000 and {MAX_EXCHANGE_TIMEOUT_MS}, got {}",
                self.stale_lock_ms
            );
        }
        if !(500..=60_000).contains(&self.silence_timeout_ms) {
            bail!(
                "--silence-timeout-ms must be between 500 and 60000, got {}",
                self.silence_timeout_ms
            );
        }
        if self.exchange_timeout_ms < 1_000 || self.exchange_timeout_ms > MAX_EXCHANGE_TIMEOUT_MS
        {
            bail!(
                "--exchange-timeout-ms must be between 1000 and {MAX_EXCHANGE_TIMEOUT_MS}, got {}",
                self.exchange_timeout_ms
            );
        }
        if self.exchange_retries > MAX_EXCHANGE_RETRIES {
            bail!(
                "--exchange-retries must be at most {MAX_EXCHANGE_RETRIES}, got {}",
                self.exchange_retries
            );
        }
        if self.retry_base_delay_ms > 30_000 {
            bail!(
                "--retry-base-delay-ms must be at most 30000, got {}",
                self.retry_base_delay_ms
            );
        }
        if !(0.1..=10.0).contains(&self.speech_rate) {
            bail!(
                "--speech-rate must be between 0.1 and 10.0, got {}",
                self.speech_rate
            );
        }
        if !(0.0..=2.0).contains(&self.speech_pitch) {
            bail!(
                "--speech-pitch must be between 0.0 and 2.0, got {}",
                self.speech_pitch
            );
        }
        if !(0.0..=1.0).contains(&self.speech_volume) {
            bail!(
                "--speech-volume must be between 0.0 and 1.0, got {}",
                self.speech_volume
            );
        }

        match (&self.endpoint_url, &self.endpoint_cmd) {
            (Some(_), Some(_)) => bail!("--endpoint-url and --endpoint-cmd are mutually exclusive"),
            (Some(url), None) => {
                let trimmed = url.trim();
                if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
                    bail!("--endpoint-url must start with http:// or https://, got {trimmed}");
                }
                self.endpoint_url = Some(trimmed.to_string());
            }
            (None, Some(cmd)) => {
                self.endpoint_cmd = Some(
                    sanitize_command(cmd).context("--endpoint-cmd failed validation")?,
                );
            }
            (None, None) => {}
        }

        if let Some(cmd) = &self.tts_cmd {
            self.tts_cmd = Some(sanitize_command(cmd).context("--tts-cmd failed validation")?);
        }

        Ok(())
    }
}

/// Reject control characters and commands that do not split into at least a program name.
pub(super) fn sanitize_command(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        bail!("command is empty");
    }
    if trimmed.contains(FORBIDDEN_COMMAND_CHARS) {
        bail!("command contains control characters");
    }
    let words = shell_words::split(trimmed).context("command has unbalanced quoting")?;
    if words.is_empty() {
        bail!("command is empty");
    }
    Ok(trimmed.to_string())
}
