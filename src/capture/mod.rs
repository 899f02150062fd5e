//! Speech-capture lifecycle. The recognizer itself is an external device that
//! reports interim/final text over a channel; this session turns those reports
//! into transcript events, finalizes on silence, and owns start/stop.


use crate::text::sanitize_transcript;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::fmt;
use std::time::{Duration, Instant};

/// Failures reported by the capture device or the session itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureError {
    PermissionDenied,
    DeviceUnavailable,
    Unsupported,
    SilenceTimeout,
}

impl CaptureError {
    pub fn label(self) -> &'static str {
        match self {
            CaptureError::PermissionDenied => "permission_denied",
            CaptureError::DeviceUnavailable => "device_unavailable",
            CaptureError::Unsupported => "unsupported",
            CaptureError::SilenceTimeout => "silence_timeout",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "permission_denied" | "not-allowed" => Some(CaptureError::PermissionDenied),
            "device_unavailable" | "audio-capture" => Some(CaptureError::DeviceUnavailable),
            "unsupported" => Some(CaptureError::Unsupported),
            "silence_timeout" | "no-speech" => Some(CaptureError::SilenceTimeout),
            _ => None,
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            CaptureError::PermissionDenied => "microphone permission was denied",
            CaptureError::DeviceUnavailable => "no microphone is available",
            CaptureError::Unsupported => "speech capture is not supported here",
            CaptureError::SilenceTimeout => "no speech was detected",
        };
        f.write_str(message)
    }
}

impl std::error::Error for CaptureError {}

/// Raw report from a capture device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureDeviceEvent {
    Interim(String),
    Final(String),
    Error(CaptureError),
}

/// Speech recognizer consumed by [`CaptureSession`].
pub trait CaptureDevice: Send {
    /// Begin recognition, reporting through `events` until stopped.
    fn start(&mut self, events: Sender<CaptureDeviceEvent>) -> Result<(), CaptureError>;
    /// Stop recognition. Must tolerate being called when already stopped.
    fn stop(&mut self);
}

/// Transient transcript notification; never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureEvent {
    pub text: String,
    pub is_final: bool,
    pub timestamp: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureUpdate {
    Transcript(CaptureEvent),
    /// Capture ended with a failure; the session is stopped.
    Failed(CaptureError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// Start while listening is a no-op; the running capture continues untouched.
    AlreadyListening,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub silence_timeout: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            silence_timeout: Duration::from_millis(crate::config::DEFAULT_SILENCE_TIMEOUT_MS),
        }
    }
}

pub struct CaptureSession {
    config: CaptureConfig,
    device: Box<dyn CaptureDevice>,
    events: Option<Receiver<CaptureDeviceEvent>>,
    pending: Option<String>,
    last_activity: Option<Instant>,
}

impl CaptureSession {
    pub fn new(config: CaptureConfig, device: Box<dyn CaptureDevice>) -> Self {
        Self {
            config,
            device,
            events: None,
            pending: None,
            last_activity: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.events.is_some()
    }

    pub fn start(&mut self, now: Instant) -> Result<StartOutcome, CaptureError> {
        if self.is_listening() {
            return Ok(StartOutcome::AlreadyListening);
        }
        // Fresh channel per capture so reports from an earlier run cannot leak in.
        let (tx, rx) = unbounded();
        self.device.start(tx)?;
        self.events = Some(rx);
        self.pending = None;
        self.last_activity = Some(now);
        crate::log_debug("CaptureSession: listening");
        Ok(StartOutcome::Started)
    }

    /// Stop listening. Interim text still pending becomes the final transcript.
    pub fn stop(&mut self, now: Instant) -> Option<CaptureEvent> {
        if !self.is_listening() {
            return None;
        }
        let mut updates = Vec::new();
        self.drain_device(now, &mut updates);
        if !self.is_listening() {
            // The device finished on its own while draining.
            return updates.into_iter().find_map(|update| match update {
                CaptureUpdate::Transcript(event) if event.is_final => Some(event),
                _ => None,
            });
        }
        let promoted = self.take_pending_final(now);
        self.finish();
        promoted
    }

    /// Drain device reports and apply the silence timeout.
    pub fn poll(&mut self, now: Instant) -> Vec<CaptureUpdate> {
        let mut updates = Vec::new();
        if !self.is_listening() {
            return updates;
        }
        self.drain_device(now, &mut updates);
        if !self.is_listening() {
            return updates;
        }

        let idle_for = self
            .last_activity
            .map(|at| now.saturating_duration_since(at))
            .unwrap_or_default();
        if idle_for >= self.config.silence_timeout {
            match self.take_pending_final(now) {
                Some(event) => updates.push(CaptureUpdate::Transcript(event)),
                None => updates.push(CaptureUpdate::Failed(CaptureError::SilenceTimeout)),
            }
            crate::log_debug(&format!(
                "CaptureSession: silence for {}ms, stopping",
                idle_for.as_millis()
            ));
            self.finish();
        }
        updates
    }

    fn drain_device(&mut self, now: Instant, updates: &mut Vec<CaptureUpdate>) {
        loop {
            let Some(rx) = self.events.as_ref() else {
                return;
            };
            let event = match rx.try_recv() {
                Ok(event) => event,
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    crate::log_debug("CaptureSession: device channel closed");
                    if let Some(event) = self.take_pending_final(now) {
                        updates.push(CaptureUpdate::Transcript(event));
                    }
                    self.finish();
                    return;
                }
            };
            self.last_activity = Some(now);
            match event {
                CaptureDeviceEvent::Interim(text) => {
                    let text = sanitize_transcript(&text);
                    if text.is_empty() {
                        continue;
                    }
                    self.pending = Some(text.clone());
                    updates.push(CaptureUpdate::Transcript(CaptureEvent {
                        text,
                        is_final: false,
                        timestamp: now,
                    }));
                }
                CaptureDeviceEvent::Final(text) => {
                    let text = sanitize_transcript(&text);
                    let final_event = if text.is_empty() {
                        self.take_pending_final(now)
                    } else {
                        self.pending = None;
                        Some(CaptureEvent {
                            text,
                            is_final: true,
                            timestamp: now,
                        })
                    };
                    match final_event {
                        Some(event) => updates.push(CaptureUpdate::Transcript(event)),
                        None => updates.push(CaptureUpdate::Failed(CaptureError::SilenceTimeout)),
                    }
                    self.finish();
                    return;
                }
                CaptureDeviceEvent::Error(err) => {
                    crate::log_debug(&format!("CaptureSession: device error: {err}"));
                    self.pending = None;
                    updates.push(CaptureUpdate::Failed(err));
                    self.finish();
                    return;
                }
            }
        }
    }

    fn take_pending_final(&mut self, now: Instant) -> Option<CaptureEvent> {
        self.pending.take().map(|text| CaptureEvent {
            text,
            is_final: true,
            timestamp: now,
        })
    }

    fn finish(&mut self) {
        if self.events.take().is_some() {
            self.device.stop();
        }
        self.pending = None;
        self.last_activity = None;
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.finish();
    }
}
