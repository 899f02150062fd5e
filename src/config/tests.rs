use super::validation::sanitize_command;
use super::{AppConfig, BackoffKind};
use clap::Parser;
use std::time::Duration;

#[test]
fn defaults_validate() {
    let mut cfg = AppConfig::parse_from(["test-app"]);
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.display_turns, 3);
    assert_eq!(cfg.context_turns, 10);
    assert_eq!(cfg.retry_backoff, BackoffKind::Linear);
}

#[test]
fn rejects_context_smaller_than_display() {
    let mut cfg = AppConfig::parse_from(["test-app", "--display-turns", "5", "--context-turns", "4"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_zero_display_turns() {
    let mut cfg = AppConfig::parse_from(["test-app", "--display-turns", "0"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_retention_below_context() {
    let mut cfg = AppConfig::parse_from(["test-app", "--retained-turns", "5"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_excessive_retries() {
    let mut cfg = AppConfig::parse_from(["test-app", "--exchange-retries", "11"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_short_stale_lock() {
    let mut cfg = AppConfig::parse_from(["test-app", "--stale-lock-ms", "999"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_volume_out_of_range() {
    let mut cfg = AppConfig::parse_from(["test-app", "--speech-volume", "1.5"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_both_endpoint_kinds() {
    let mut cfg = AppConfig::parse_from([
        "test-app",
        "--endpoint-url",
        "http://localhost:8080/chat",
        "--endpoint-cmd",
        "coach-reply",
    ]);
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_non_http_endpoint() {
    let mut cfg = AppConfig::parse_from(["test-app", "--endpoint-url", "ftp://example.com"]);
    assert!(cfg.validate().is_err());
}

#[test]
fn trims_endpoint_url() {
    let mut cfg = AppConfig::parse_from(["test-app", "--endpoint-url", "  https://coach.test/api  "]);
    cfg.validate().unwrap();
    assert_eq!(cfg.endpoint_url.as_deref(), Some("https://coach.test/api"));
}

#[test]
fn sanitize_command_rejects_control_chars_and_bad_quotes() {
    assert!(sanitize_command("say\nhello").is_err());
    assert!(sanitize_command("say 'unterminated").is_err());
    assert!(sanitize_command("   ").is_err());
    assert_eq!(sanitize_command("  espeak -s 170 ").unwrap(), "espeak -s 170");
}

#[test]
fn derived_configs_carry_flag_values() {
    let cfg = AppConfig::parse_from([
        "test-app",
        "--dispatch-cooldown-ms",
        "1500",
        "--stale-lock-ms",
        "8000",
        "--exchange-retries",
        "4",
        "--retry-backoff",
        "exponential",
        "--no-auto-speech",
    ]);
    let dispatch = cfg.dispatch_config();
    assert_eq!(dispatch.cooldown, Duration::from_millis(1500));
    assert_eq!(dispatch.stale_lock_after, Duration::from_millis(8000));

    let exchange = cfg.exchange_config();
    assert_eq!(exchange.policy.max_retries, 4);
    assert_eq!(exchange.policy.backoff, BackoffKind::Exponential);

    let coach = cfg.coach_config();
    assert!(coach.auto_send);
    assert!(!coach.auto_speech);
}
