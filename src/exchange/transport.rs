//! Wire-level access to the conversational endpoint. Transports only move
//! bytes and report raw failures; classification and retries live in the client.

use super::ExchangeRequest;
use crate::cancel::CancelToken;
use crate::process::{command_from_line, spawn_with_cancel, ProcessError};
use crate::{log_debug, log_debug_content};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Unclassified failure from one transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// The endpoint answered with an error status.
    Status { status: u16, message: String },
    /// The call did not complete in time on the transport's own clock.
    TimedOut,
    /// Connection or process failure before any answer.
    Io(String),
    /// An answer arrived but could not be understood.
    Malformed(String),
    Cancelled,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportFailure::Status { status, message } => write!(f, "status {status}: {message}"),
            TransportFailure::TimedOut => f.write_str("timed out"),
            TransportFailure::Io(message) => write!(f, "io: {message}"),
            TransportFailure::Malformed(message) => write!(f, "malformed reply: {message}"),
            TransportFailure::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Conversational endpoint consumed by the exchange client.
pub trait ExchangeTransport: Send + Sync {
    /// Perform one round trip and return the assistant message text.
    fn exchange(&self, request: &ExchangeRequest, cancel: &CancelToken)
        -> Result<String, TransportFailure>;

    fn label(&self) -> &'static str;
}

#[derive(Debug, Deserialize)]
struct ReplyBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    status: Option<u16>,
}

/// Interpret an endpoint answer: `{message}` on success, `{error, status}` otherwise.
pub(crate) fn parse_reply(http_status: u16, body: &str) -> Result<String, TransportFailure> {
    let parsed = serde_json::from_str::<ReplyBody>(body.trim());
    let success = (200..300).contains(&http_status);
    match parsed {
        Ok(reply) if !success => Err(TransportFailure::Status {
            status: reply.status.unwrap_or(http_status),
            message: reply.error.unwrap_or_else(|| format!("http {http_status}")),
        }),
        Ok(ReplyBody {
            error: Some(error),
            status,
            ..
        }) => Err(TransportFailure::Status {
            status: status.unwrap_or(500),
            message: error,
        }),
        Ok(ReplyBody {
            message: Some(message),
            ..
        }) => Ok(message),
        Ok(_) => Err(TransportFailure::Malformed("reply has no message".into())),
        Err(_) if !success => Err(TransportFailure::Status {
            status: http_status,
            message: body.trim().chars().take(200).collect(),
        }),
        Err(err) => Err(TransportFailure::Malformed(err.to_string())),
    }
}

/// JSON POST to an HTTP endpoint.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl ExchangeTransport for HttpTransport {
    fn exchange(
        &self,
        request: &ExchangeRequest,
        cancel: &CancelToken,
    ) -> Result<String, TransportFailure> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .map_err(|err| {
                if err.is_timeout() {
                    TransportFailure::TimedOut
                } else {
                    TransportFailure::Io(err.to_string())
                }
            })?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| TransportFailure::Io(err.to_string()))?;
        if cancel.is_cancelled() {
            return Err(TransportFailure::Cancelled);
        }
        log_debug_content(&format!("HttpTransport: status={status} body_len={}", body.len()));
        parse_reply(status, &body)
    }

    fn label(&self) -> &'static str {
        "http"
    }
}

/// Runs a local command per exchange: request JSON on stdin, reply JSON on stdout.
pub struct CommandTransport {
    command_line: String,
}

impl CommandTransport {
    pub fn new(command_line: &str) -> Self {
        Self {
            command_line: command_line.to_string(),
        }
    }
}

impl ExchangeTransport for CommandTransport {
    fn exchange(
        &self,
        request: &ExchangeRequest,
        cancel: &CancelToken,
    ) -> Result<String, TransportFailure> {
        let payload =
            serde_json::to_string(request).map_err(|err| TransportFailure::Io(err.to_string()))?;
        let cmd = command_from_line(&self.command_line, &[])
            .map_err(|err| TransportFailure::Io(format!("{err:#}")))?;
        let output = match spawn_with_cancel(cmd, Some(&payload), cancel) {
            Ok(output) => output,
            Err(ProcessError::Cancelled) => return Err(TransportFailure::Cancelled),
            Err(ProcessError::Failure(err)) => {
                return Err(TransportFailure::Io(format!("{err:#}")));
            }
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() || serde_json::from_str::<ReplyBody>(stdout.trim()).is_ok() {
            return parse_reply(200, &stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        log_debug(&format!(
            "CommandTransport: exited with {} ({})",
            output.status,
            stderr.trim()
        ));
        Err(TransportFailure::Io(format!(
            "endpoint command failed: {}",
            stderr.trim()
        )))
    }

    fn label(&self) -> &'static str {
        "command"
    }
}
