use super::*;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct SpeakerLog {
    spoken: Vec<(UtteranceId, String)>,
    cancels: usize,
    sender: Option<Sender<PlaybackDeviceEvent>>,
}

/// Device that records requests; tests drive start/end reports by hand.
#[derive(Clone, Default)]
struct FakeSpeaker {
    log: Arc<Mutex<SpeakerLog>>,
    fail: bool,
}

impl FakeSpeaker {
    fn report(&self, utterance: UtteranceId, kind: PlaybackEventKind) {
        let log = self.log.lock().unwrap();
        log.sender
            .as_ref()
            .expect("speak not called")
            .send(PlaybackDeviceEvent { utterance, kind })
            .unwrap();
    }

    fn spoken(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .spoken
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }

    fn cancels(&self) -> usize {
        self.log.lock().unwrap().cancels
    }
}

impl PlaybackDevice for FakeSpeaker {
    fn speak(
        &mut self,
        utterance: UtteranceId,
        text: &str,
        _params: &SpeechParams,
        events: Sender<PlaybackDeviceEvent>,
    ) -> Result<(), PlaybackError> {
        if self.fail {
            return Err(PlaybackError::SynthesisFailed("no voices".into()));
        }
        let mut log = self.log.lock().unwrap();
        log.spoken.push((utterance, text.to_string()));
        log.sender = Some(events);
        Ok(())
    }

    fn cancel(&mut self) {
        self.log.lock().unwrap().cancels += 1;
    }
}

fn session(speaker: &FakeSpeaker) -> PlaybackSession {
    PlaybackSession::new(PlaybackConfig::default(), Box::new(speaker.clone()))
}

fn started(outcome: Result<SpeakOutcome, PlaybackError>) -> UtteranceId {
    match outcome {
        Ok(SpeakOutcome::Started { utterance, .. }) => utterance,
        other => panic!("expected playback to start, got {other:?}"),
    }
}

#[test]
fn duplicate_id_while_speaking_is_noop_and_toggles_once() {
    let speaker = FakeSpeaker::default();
    let mut playback = session(&speaker);
    let now = Instant::now();
    let utterance = started(playback.speak("Focus on your toss.", 1, now));
    assert!(playback.is_speaking());
    assert_eq!(
        playback.speak("Focus on your toss.", 1, now),
        Ok(SpeakOutcome::Skipped(SkipReason::Busy))
    );

    speaker.report(utterance, PlaybackEventKind::Started);
    speaker.report(utterance, PlaybackEventKind::Ended);
    let updates = playback.poll();
    assert_eq!(
        updates,
        vec![
            PlaybackUpdate::Started { message_id: 1 },
            PlaybackUpdate::Finished { message_id: 1 }
        ]
    );
    assert!(!playback.is_speaking());
    assert_eq!(speaker.spoken().len(), 1);
}

#[test]
fn same_id_after_completion_within_cooldown_is_noop() {
    let speaker = FakeSpeaker::default();
    let mut playback = session(&speaker);
    let now = Instant::now();
    let utterance = started(playback.speak("Focus on your toss.", 4, now));
    speaker.report(utterance, PlaybackEventKind::Ended);
    playback.poll();
    assert_eq!(
        playback.speak("Focus on your toss.", 4, now + Duration::from_millis(500)),
        Ok(SpeakOutcome::Skipped(SkipReason::SameMessage))
    );
    assert_eq!(speaker.spoken().len(), 1);
}

#[test]
fn same_text_under_new_id_is_noop() {
    let speaker = FakeSpeaker::default();
    let mut playback = session(&speaker);
    let now = Instant::now();
    let utterance = started(playback.speak("Great rally! 🎾", 1, now));
    speaker.report(utterance, PlaybackEventKind::Ended);
    playback.poll();
    assert_eq!(
        playback.speak("great rally!", 2, now + Duration::from_secs(10)),
        Ok(SpeakOutcome::Skipped(SkipReason::SameText))
    );
}

#[test]
fn emoji_never_reach_the_device() {
    let speaker = FakeSpeaker::default();
    let mut playback = session(&speaker);
    started(playback.speak("Nice serve 🎾🔥!", 1, Instant::now()));
    assert_eq!(speaker.spoken(), vec!["Nice serve !"]);
}

#[test]
fn symbols_only_text_is_skipped() {
    let speaker = FakeSpeaker::default();
    let mut playback = session(&speaker);
    assert_eq!(
        playback.speak("👍🏽🎾", 1, Instant::now()),
        Ok(SpeakOutcome::Skipped(SkipReason::Empty))
    );
    assert!(!playback.is_speaking());
}

#[test]
fn interrupt_while_idle_is_noop() {
    let speaker = FakeSpeaker::default();
    let mut playback = session(&speaker);
    let before = playback.token();
    assert_eq!(playback.interrupt(), None);
    assert_eq!(playback.token(), before);
    assert_eq!(speaker.cancels(), 0);
    assert!(started(playback.speak("still works", 1, Instant::now())) > 0);
}

#[test]
fn interrupt_resets_markers_and_allows_replay_after_cooldown() {
    let speaker = FakeSpeaker::default();
    let mut playback = session(&speaker);
    let now = Instant::now();
    started(playback.speak("Watch the ball.", 9, now));
    assert_eq!(playback.interrupt(), Some(9));
    assert!(!playback.is_speaking());
    assert_eq!(speaker.cancels(), 1);
    assert_eq!(playback.token().last_spoken_message_id, None);
    assert_eq!(playback.token().last_spoken_text_hash, None);

    assert_eq!(
        playback.speak("Watch the ball.", 9, now + Duration::from_millis(100)),
        Ok(SpeakOutcome::Skipped(SkipReason::Cooldown))
    );
    started(playback.speak("Watch the ball.", 9, now + Duration::from_millis(2_000)));
}

#[test]
fn late_reports_from_interrupted_utterance_are_ignored() {
    let speaker = FakeSpeaker::default();
    let mut playback = session(&speaker);
    let now = Instant::now();
    let first = started(playback.speak("first answer", 1, now));
    playback.interrupt();
    started(playback.speak("second answer", 2, now));
    speaker.report(first, PlaybackEventKind::Ended);
    assert!(playback.poll().is_empty());
    assert!(playback.is_speaking());
}

#[test]
fn synthesis_error_releases_lock_but_keeps_markers() {
    let speaker = FakeSpeaker::default();
    let mut playback = session(&speaker);
    let now = Instant::now();
    let utterance = started(playback.speak("Try again", 5, now));
    speaker.report(utterance, PlaybackEventKind::Error("engine crashed".into()));
    let updates = playback.poll();
    assert!(matches!(
        updates.as_slice(),
        [PlaybackUpdate::Failed { message_id: 5, .. }]
    ));
    assert!(!playback.is_speaking());
    assert_eq!(
        playback.speak("Try again", 5, now + Duration::from_secs(5)),
        Ok(SpeakOutcome::Skipped(SkipReason::SameMessage))
    );
}

#[test]
fn device_refusal_is_reported_and_not_retried() {
    let speaker = FakeSpeaker {
        fail: true,
        ..FakeSpeaker::default()
    };
    let mut playback = session(&speaker);
    let now = Instant::now();
    assert!(matches!(
        playback.speak("hello", 1, now),
        Err(PlaybackError::SynthesisFailed(_))
    ));
    assert!(!playback.is_speaking());
    assert_eq!(
        playback.speak("hello", 1, now),
        Ok(SpeakOutcome::Skipped(SkipReason::SameMessage))
    );
}
