//! Capture and playback devices backed by the IPC client. The client owns the
//! actual recognizer/synthesizer; these adapters turn its commands into device
//! reports and the coach's requests into events.

use crate::capture::{CaptureDevice, CaptureDeviceEvent, CaptureError};
use crate::lock_or_recover;
use crate::log_debug;
use crate::playback::{
    PlaybackDevice, PlaybackDeviceEvent, PlaybackError, PlaybackEventKind, SpeechParams,
    UtteranceId,
};
use crossbeam_channel::Sender;
use std::sync::{Arc, Mutex};

use super::protocol::IpcEvent;
use super::session::send_event;

/// Shared slot holding the sender of the capture run in progress.
#[derive(Clone, Default)]
pub(super) struct CaptureFeed {
    slot: Arc<Mutex<Option<Sender<CaptureDeviceEvent>>>>,
}

impl CaptureFeed {
    /// Forward a recognizer report. Returns false when nobody is listening.
    pub(super) fn push(&self, event: CaptureDeviceEvent) -> bool {
        let slot = lock_or_recover(&self.slot, "CaptureFeed");
        match slot.as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

pub(super) struct IpcCaptureDevice {
    feed: CaptureFeed,
}

impl IpcCaptureDevice {
    pub(super) fn new(feed: CaptureFeed) -> Self {
        Self { feed }
    }
}

impl CaptureDevice for IpcCaptureDevice {
    fn start(&mut self, events: Sender<CaptureDeviceEvent>) -> Result<(), CaptureError> {
        *lock_or_recover(&self.feed.slot, "IpcCaptureDevice") = Some(events);
        Ok(())
    }

    fn stop(&mut self) {
        lock_or_recover(&self.feed.slot, "IpcCaptureDevice").take();
    }
}

#[derive(Default)]
struct SpeechSlot {
    utterance: Option<UtteranceId>,
    events: Option<Sender<PlaybackDeviceEvent>>,
}

/// Routes the client's `speech_*` reports to the active utterance.
#[derive(Clone, Default)]
pub(super) struct SpeechFeed {
    slot: Arc<Mutex<SpeechSlot>>,
}

impl SpeechFeed {
    /// Returns false for reports about an utterance that is no longer current.
    pub(super) fn report(&self, utterance: UtteranceId, kind: PlaybackEventKind) -> bool {
        let mut slot = lock_or_recover(&self.slot, "SpeechFeed");
        if slot.utterance != Some(utterance) {
            log_debug(&format!("SpeechFeed: ignoring report for utterance {utterance}"));
            return false;
        }
        let terminal = !matches!(kind, PlaybackEventKind::Started);
        let sent = slot
            .events
            .as_ref()
            .map(|tx| tx.send(PlaybackDeviceEvent { utterance, kind }).is_ok())
            .unwrap_or(false);
        if terminal {
            *slot = SpeechSlot::default();
        }
        sent
    }
}

pub(super) struct IpcPlaybackDevice {
    feed: SpeechFeed,
}

impl IpcPlaybackDevice {
    pub(super) fn new(feed: SpeechFeed) -> Self {
        Self { feed }
    }
}

impl PlaybackDevice for IpcPlaybackDevice {
    fn speak(
        &mut self,
        utterance: UtteranceId,
        text: &str,
        params: &SpeechParams,
        events: Sender<PlaybackDeviceEvent>,
    ) -> Result<(), PlaybackError> {
        {
            let mut slot = lock_or_recover(&self.feed.slot, "IpcPlaybackDevice");
            slot.utterance = Some(utterance);
            slot.events = Some(events);
        }
        send_event(&IpcEvent::Speak {
            utterance,
            text: text.to_string(),
            rate: params.rate,
            pitch: params.pitch,
            volume: params.volume,
        });
        Ok(())
    }

    fn cancel(&mut self) {
        let previous = {
            let mut slot = lock_or_recover(&self.feed.slot, "IpcPlaybackDevice");
            let utterance = slot.utterance;
            *slot = SpeechSlot::default();
            utterance
        };
        if let Some(utterance) = previous {
            send_event(&IpcEvent::SpeakCancel { utterance });
        }
    }
}
