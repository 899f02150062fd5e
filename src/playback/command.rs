use super::{PlaybackDevice, PlaybackDeviceEvent, PlaybackError, PlaybackEventKind, SpeechParams, UtteranceId};
use crate::process::{command_from_line, send_signal, should_send_sigkill, write_with_newline, Signal};
use crate::{lock_or_recover, log_debug, log_debug_content};
use crossbeam_channel::Sender;
use std::io::Read;
use std::process::{Child, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Speaks through a local TTS command (e.g. `espeak`, `say`), text on stdin.
/// `{rate}`, `{pitch}` and `{volume}` in the command line are substituted.
pub struct CommandPlaybackDevice {
    command_line: String,
    running: Arc<Mutex<Option<RunningUtterance>>>,
}

/// The child stays in the slot until it is reaped, so its pid is never
/// signalled after the kernel could have reused it.
struct RunningUtterance {
    utterance: UtteranceId,
    child: Child,
}

impl CommandPlaybackDevice {
    pub fn new(command_line: &str) -> Self {
        Self {
            command_line: command_line.to_string(),
            running: Arc::new(Mutex::new(None)),
        }
    }

    fn is_running(&self) -> bool {
        lock_or_recover(&self.running, "CommandPlaybackDevice").is_some()
    }
}

fn substitutions(params: &SpeechParams) -> [(&'static str, String); 3] {
    [
        ("{rate}", format!("{}", params.rate)),
        ("{pitch}", format!("{}", params.pitch)),
        ("{volume}", format!("{}", params.volume)),
    ]
}

impl PlaybackDevice for CommandPlaybackDevice {
    fn speak(
        &mut self,
        utterance: UtteranceId,
        text: &str,
        params: &SpeechParams,
        events: Sender<PlaybackDeviceEvent>,
    ) -> Result<(), PlaybackError> {
        self.cancel();

        let mut cmd = command_from_line(&self.command_line, &substitutions(params))
            .map_err(|err| PlaybackError::SynthesisFailed(format!("{err:#}")))?;
        cmd.stdout(Stdio::null());
        let mut child = cmd
            .spawn()
            .map_err(|err| PlaybackError::SynthesisFailed(format!("failed to start TTS: {err}")))?;
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(err) = write_with_newline(&mut stdin, text) {
                let _ = child.kill();
                let _ = child.wait();
                return Err(PlaybackError::SynthesisFailed(format!(
                    "failed to write TTS input: {err}"
                )));
            }
        }
        log_debug_content(&format!("CommandPlaybackDevice: speaking {} chars", text.len()));

        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });
        *lock_or_recover(&self.running, "CommandPlaybackDevice") = Some(RunningUtterance { utterance, child });
        let _ = events.send(PlaybackDeviceEvent {
            utterance,
            kind: PlaybackEventKind::Started,
        });

        let slot = Arc::clone(&self.running);
        thread::spawn(move || {
            let Some(result) = wait_while_current(&slot, utterance) else {
                // Cancelled; the canceller owns the child now.
                return;
            };
            let detail = stderr
                .and_then(|reader| reader.join().ok())
                .unwrap_or_default();
            let kind = match result {
                Ok(status) if status.success() => PlaybackEventKind::Ended,
                Ok(status) => PlaybackEventKind::Error(format!("TTS exited with {status}: {}", detail.trim())),
                Err(err) => PlaybackEventKind::Error(err.to_string()),
            };
            let _ = events.send(PlaybackDeviceEvent { utterance, kind });
        });
        Ok(())
    }

    fn cancel(&mut self) {
        let taken = lock_or_recover(&self.running, "CommandPlaybackDevice").take();
        if let Some(running) = taken {
            log_debug(&format!(
                "CommandPlaybackDevice: cancelling utterance {}",
                running.utterance
            ));
            terminate(running.child);
        }
    }
}

/// Poll the child while it is still the live utterance. Returns `None` once
/// the slot was taken by `cancel`, otherwise the reaped exit status.
fn wait_while_current(
    slot: &Mutex<Option<RunningUtterance>>,
    utterance: UtteranceId,
) -> Option<std::io::Result<ExitStatus>> {
    loop {
        {
            let mut guard = lock_or_recover(slot, "CommandPlaybackDevice");
            let running = guard.as_mut().filter(|running| running.utterance == utterance)?;
            match running.child.try_wait() {
                Ok(Some(status)) => {
                    guard.take();
                    return Some(Ok(status));
                }
                Ok(None) => {}
                Err(err) => {
                    guard.take();
                    return Some(Err(err));
                }
            }
        }
        thread::sleep(CHILD_POLL_INTERVAL);
    }
}

/// SIGTERM now, SIGKILL after the grace period, and reap either way.
fn terminate(mut child: Child) {
    let pid = child.id();
    send_signal(pid, Signal::Term);
    thread::spawn(move || {
        let requested_at = Some(Instant::now());
        let mut sigkill_sent = false;
        loop {
            match child.try_wait() {
                Ok(None) => {}
                Ok(Some(_)) | Err(_) => return,
            }
            if should_send_sigkill(sigkill_sent, requested_at, Instant::now()) {
                log_debug(&format!("CommandPlaybackDevice: TTS {pid} ignored SIGTERM, killing"));
                send_signal(pid, Signal::Kill);
                sigkill_sent = true;
            }
            thread::sleep(CHILD_POLL_INTERVAL);
        }
    });
}
