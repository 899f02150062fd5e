//! Network leg of a conversation turn. The client runs each exchange on a
//! worker thread with a per-attempt timeout, bounded retries driven by a
//! [`RetryPolicy`], and cancellation; the event loop polls the returned
//! [`ExchangeJob`] for its single outcome.

mod policy;
mod transport;

pub use policy::{default_retryable, RetryPolicy, RetryPredicate};
pub use transport::{CommandTransport, ExchangeTransport, HttpTransport, TransportFailure};

use crate::cancel::CancelToken;
use crate::session_log::{Role, Turn};
use crate::{log_debug, log_debug_content};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type ExchangeJobId = u64;

const ATTEMPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeError {
    Timeout,
    /// Expected cancellation; never surfaced to the user.
    Aborted,
    ServiceUnavailable,
    ClientError,
    InvalidResponse,
}

impl ExchangeError {
    pub fn label(self) -> &'static str {
        match self {
            ExchangeError::Timeout => "timeout",
            ExchangeError::Aborted => "aborted",
            ExchangeError::ServiceUnavailable => "service_unavailable",
            ExchangeError::ClientError => "client_error",
            ExchangeError::InvalidResponse => "invalid_response",
        }
    }
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ExchangeError::Timeout => "exchange timed out",
            ExchangeError::Aborted => "exchange aborted",
            ExchangeError::ServiceUnavailable => "service unavailable",
            ExchangeError::ClientError => "request rejected by the service",
            ExchangeError::InvalidResponse => "service returned an empty or invalid reply",
        };
        f.write_str(message)
    }
}

impl std::error::Error for ExchangeError {}

/// Map a raw transport failure onto the exchange taxonomy.
pub fn classify_failure(failure: &TransportFailure) -> ExchangeError {
    match failure {
        TransportFailure::Status { status, .. } => match *status {
            408 | 504 => ExchangeError::Timeout,
            429 | 500..=599 => ExchangeError::ServiceUnavailable,
            _ => ExchangeError::ClientError,
        },
        TransportFailure::TimedOut => ExchangeError::Timeout,
        TransportFailure::Io(_) => ExchangeError::ServiceUnavailable,
        TransportFailure::Malformed(_) => ExchangeError::InvalidResponse,
        TransportFailure::Cancelled => ExchangeError::Aborted,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireTurn {
    pub role: Role,
    pub text: String,
}

/// Request body sent to the endpoint: the context window, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExchangeRequest {
    pub turns: Vec<WireTurn>,
}

impl ExchangeRequest {
    pub fn from_turns(turns: &[Turn]) -> Self {
        Self {
            turns: turns
                .iter()
                .map(|turn| WireTurn {
                    role: turn.role,
                    text: turn.text.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssistantReply {
    pub text: String,
}

/// Terminal result of one exchange job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOutcome {
    pub job_id: ExchangeJobId,
    pub attempts: u32,
    pub elapsed: Duration,
    pub result: Result<AssistantReply, ExchangeError>,
}

#[derive(Debug, Clone, Copy)]
pub struct ExchangeConfig {
    /// Bound on a single transport call. A timed-out attempt counts as
    /// retryable, so a job may run up to `policy.max_attempts()` of these
    /// plus backoff before it reports `Timeout`.
    pub attempt_timeout: Duration,
    pub policy: RetryPolicy,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_millis(crate::config::DEFAULT_EXCHANGE_TIMEOUT_MS),
            policy: RetryPolicy::default(),
        }
    }
}

/// Handle to one in-flight exchange.
pub struct ExchangeJob {
    pub id: ExchangeJobId,
    receiver: Receiver<ExchangeOutcome>,
    cancel: CancelToken,
    attempts: Arc<AtomicU32>,
    handle: Option<JoinHandle<()>>,
}

impl ExchangeJob {
    /// Request cancellation; the job resolves to `ExchangeError::Aborted`.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Non-blocking poll for the outcome.
    pub fn try_outcome(&mut self) -> Option<ExchangeOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => {
                self.join();
                Some(outcome)
            }
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(self.lost_worker()),
        }
    }

    /// Block up to `timeout` for the outcome.
    pub fn wait_outcome(&mut self, timeout: Duration) -> Option<ExchangeOutcome> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => {
                self.join();
                Some(outcome)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(self.lost_worker()),
        }
    }

    fn lost_worker(&mut self) -> ExchangeOutcome {
        log_debug(&format!("ExchangeJob {}: worker exited without an outcome", self.id));
        self.join();
        ExchangeOutcome {
            job_id: self.id,
            attempts: self.attempts(),
            elapsed: Duration::ZERO,
            result: Err(ExchangeError::ServiceUnavailable),
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct ExchangeClient {
    config: ExchangeConfig,
    transport: Arc<dyn ExchangeTransport>,
    next_job_id: ExchangeJobId,
    outstanding: Option<(ExchangeJobId, CancelToken)>,
}

impl ExchangeClient {
    pub fn new(config: ExchangeConfig, transport: Arc<dyn ExchangeTransport>) -> Self {
        Self {
            config,
            transport,
            next_job_id: 0,
            outstanding: None,
        }
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Start an exchange for `turns` (already trimmed to the context window).
    /// Any exchange still outstanding is aborted first.
    pub fn send(&mut self, turns: &[Turn]) -> ExchangeJob {
        self.abort_outstanding();

        self.next_job_id += 1;
        let job_id = self.next_job_id;
        let cancel = CancelToken::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let (tx, rx) = bounded(1);
        let context = JobContext {
            job_id,
            request: Arc::new(ExchangeRequest::from_turns(turns)),
            config: self.config,
            transport: Arc::clone(&self.transport),
        };
        log_debug_content(&format!(
            "ExchangeClient: job {job_id} with {} turns",
            context.request.turns.len()
        ));

        let worker_cancel = cancel.clone();
        let worker_attempts = Arc::clone(&attempts);
        let handle = thread::spawn(move || {
            let started = Instant::now();
            let result = run_exchange(&context, &worker_cancel, &worker_attempts);
            let _ = tx.send(ExchangeOutcome {
                job_id: context.job_id,
                attempts: worker_attempts.load(Ordering::SeqCst),
                elapsed: started.elapsed(),
                result,
            });
        });

        self.outstanding = Some((job_id, cancel.clone()));
        ExchangeJob {
            id: job_id,
            receiver: rx,
            cancel,
            attempts,
            handle: Some(handle),
        }
    }

    /// Abort the most recent exchange if it has not been marked finished.
    pub fn abort_outstanding(&mut self) -> bool {
        match self.outstanding.take() {
            Some((job_id, cancel)) if !cancel.is_cancelled() => {
                log_debug(&format!("ExchangeClient: aborting outstanding job {job_id}"));
                cancel.cancel();
                true
            }
            _ => false,
        }
    }

    /// Forget the outstanding job once its outcome has been consumed.
    pub fn mark_finished(&mut self, job_id: ExchangeJobId) {
        if matches!(self.outstanding, Some((id, _)) if id == job_id) {
            self.outstanding = None;
        }
    }
}

struct JobContext {
    job_id: ExchangeJobId,
    request: Arc<ExchangeRequest>,
    config: ExchangeConfig,
    transport: Arc<dyn ExchangeTransport>,
}

fn run_exchange(
    context: &JobContext,
    cancel: &CancelToken,
    attempts: &AtomicU32,
) -> Result<AssistantReply, ExchangeError> {
    let policy = context.config.policy;
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(ExchangeError::Aborted);
        }
        attempt += 1;
        attempts.store(attempt, Ordering::SeqCst);
        let attempt_started = Instant::now();

        let result = run_attempt(context, cancel).and_then(validate_reply);
        let elapsed_ms = attempt_started.elapsed().as_millis() as u64;
        match result {
            Ok(reply) => {
                tracing::info!(
                    job_id = context.job_id,
                    attempt,
                    elapsed_ms,
                    transport = context.transport.label(),
                    "exchange succeeded"
                );
                return Ok(reply);
            }
            Err(ExchangeError::Aborted) => {
                tracing::debug!(job_id = context.job_id, attempt, "exchange aborted");
                return Err(ExchangeError::Aborted);
            }
            Err(err) => {
                let retry = policy.should_retry(err, attempt);
                tracing::warn!(
                    job_id = context.job_id,
                    attempt,
                    elapsed_ms,
                    error = err.label(),
                    retry,
                    "exchange attempt failed"
                );
                log_debug(&format!(
                    "ExchangeClient: job {} attempt {attempt} failed: {err} (retry={retry})",
                    context.job_id
                ));
                if !retry {
                    return Err(err);
                }
                if !sleep_unless_cancelled(policy.delay_after(attempt), cancel) {
                    return Err(ExchangeError::Aborted);
                }
            }
        }
    }
}

/// One transport call on its own thread, bounded by the attempt timeout and
/// the job's cancellation.
fn run_attempt(context: &JobContext, job_cancel: &CancelToken) -> Result<String, ExchangeError> {
    let attempt_cancel = CancelToken::new();
    let (tx, rx) = bounded(1);
    {
        let transport = Arc::clone(&context.transport);
        let request = Arc::clone(&context.request);
        let cancel = attempt_cancel.clone();
        thread::spawn(move || {
            let _ = tx.send(transport.exchange(&request, &cancel));
        });
    }

    let deadline = Instant::now() + context.config.attempt_timeout;
    loop {
        match rx.recv_timeout(ATTEMPT_POLL_INTERVAL) {
            Ok(Ok(text)) => return Ok(text),
            Ok(Err(failure)) => {
                log_debug(&format!("ExchangeClient: transport failure: {failure}"));
                return Err(classify_failure(&failure));
            }
            Err(RecvTimeoutError::Disconnected) => return Err(ExchangeError::ServiceUnavailable),
            Err(RecvTimeoutError::Timeout) => {}
        }
        if job_cancel.is_cancelled() {
            attempt_cancel.cancel();
            return Err(ExchangeError::Aborted);
        }
        if Instant::now() >= deadline {
            attempt_cancel.cancel();
            return Err(ExchangeError::Timeout);
        }
    }
}

fn validate_reply(text: String) -> Result<AssistantReply, ExchangeError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ExchangeError::InvalidResponse);
    }
    Ok(AssistantReply {
        text: trimmed.to_string(),
    })
}

/// Returns false when cancelled before the delay elapsed.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(ATTEMPT_POLL_INTERVAL));
    }
}
