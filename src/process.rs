//! Subprocess helpers for the command-backed exchange transport and speech
//! device: spawn with stdin payload, wait with cancellation, signal escalation.

use crate::cancel::CancelToken;
use crate::log_debug;
use anyhow::{anyhow, Context, Error, Result};
use std::{
    io::{self, Write},
    process::{Child, Command, Output, Stdio},
    sync::mpsc::{self, TryRecvError},
    thread,
    time::{Duration, Instant},
};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const SIGKILL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub(crate) enum ProcessError {
    Cancelled,
    Failure(Error),
}

impl From<Error> for ProcessError {
    fn from(err: Error) -> Self {
        Self::Failure(err)
    }
}

impl From<io::Error> for ProcessError {
    fn from(err: io::Error) -> Self {
        Self::Failure(err.into())
    }
}

/// Split a validated command line into a `Command` with stdio wired for a
/// stdin payload.
pub(crate) fn command_from_line(line: &str, substitutions: &[(&str, String)]) -> Result<Command> {
    let mut words = shell_words::split(line).context("command has unbalanced quoting")?;
    if words.is_empty() {
        return Err(anyhow!("command is empty"));
    }
    for word in words.iter_mut() {
        for (placeholder, value) in substitutions {
            if word.contains(placeholder) {
                *word = word.replace(placeholder, value);
            }
        }
    }
    let program = words.remove(0);
    let mut cmd = Command::new(program);
    cmd.args(words)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    Ok(cmd)
}

pub(crate) fn spawn_with_cancel(
    mut cmd: Command,
    payload: Option<&str>,
    cancel: &CancelToken,
) -> Result<Output, ProcessError> {
    let mut child = cmd.spawn()?;
    if let Some(text) = payload {
        if let Some(mut stdin) = child.stdin.take() {
            write_with_newline(&mut stdin, text)?;
        }
    }
    wait_child_with_cancel(child, cancel)
}

fn wait_child_with_cancel(child: Child, cancel: &CancelToken) -> Result<Output, ProcessError> {
    let pid = child.id();
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    let mut cancel_requested_at: Option<Instant> = None;
    let mut sigkill_sent = false;

    loop {
        match rx.try_recv() {
            Ok(result) => {
                return match result {
                    Ok(_) if cancel_requested_at.is_some() => Err(ProcessError::Cancelled),
                    Ok(output) => Ok(output),
                    Err(err) => Err(ProcessError::Failure(err.into())),
                };
            }
            Err(TryRecvError::Disconnected) => {
                return Err(ProcessError::Failure(anyhow!(
                    "child waiter disconnected unexpectedly"
                )));
            }
            Err(TryRecvError::Empty) => {}
        }

        if cancel.is_cancelled() {
            if cancel_requested_at.is_none() {
                log_debug(&format!("process {pid}: cancellation requested; sending SIGTERM"));
                send_signal(pid, Signal::Term);
                cancel_requested_at = Some(Instant::now());
            } else if should_send_sigkill(sigkill_sent, cancel_requested_at, Instant::now()) {
                log_debug(&format!("process {pid}: escalating to SIGKILL"));
                send_signal(pid, Signal::Kill);
                sigkill_sent = true;
            }
        }

        thread::sleep(WAIT_POLL_INTERVAL);
    }
}

pub(crate) fn should_send_sigkill(
    sigkill_sent: bool,
    cancel_requested_at: Option<Instant>,
    now: Instant,
) -> bool {
    if sigkill_sent {
        return false;
    }
    cancel_requested_at.is_some_and(|start| now.duration_since(start) >= SIGKILL_GRACE)
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Signal {
    Term,
    Kill,
}

pub(crate) fn send_signal(pid: u32, signal: Signal) {
    #[cfg(unix)]
    unsafe {
        let signo = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        if libc::kill(pid as i32, signo) != 0 {
            log_debug(&format!(
                "process {pid}: failed to send signal {signo}: {}",
                io::Error::last_os_error()
            ));
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (pid, signal);
        log_debug("process: signals unsupported on this platform");
    }
}

pub(crate) fn write_with_newline<W: Write>(writer: &mut W, text: &str) -> io::Result<()> {
    writer.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        writer.write_all(b"\n")?;
    }
    writer.flush()
}
