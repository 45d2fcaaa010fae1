//! Turn controller integration tests
//!
//! Drives a real controller through scripted collaborators: no network,
//! no audio hardware.

use std::time::Duration;

use parley::Error;
use parley::error::Stage;
use parley::turn::{
    AssistantEvent, AssistantState, DEFAULT_END_PHRASE, Severity, TurnId, TurnOutcome, TurnPolicy,
};
use parley::voice::PhraseGate;

mod common;

use common::Harness;

/// One second of audio at 16kHz
const SPEECH: usize = 16_000;

fn finished(turn: u64, outcome: TurnOutcome) -> impl Fn(&AssistantEvent) -> bool {
    move |event| {
        *event
            == AssistantEvent::TurnFinished {
                turn: TurnId(turn),
                outcome,
            }
    }
}

fn info(needle: &'static str) -> impl Fn(&AssistantEvent) -> bool {
    move |event| matches!(event, AssistantEvent::Info { text, .. } if text.contains(needle))
}

fn started(events: &[AssistantEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, AssistantEvent::TurnStarted { .. }))
        .count()
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn test_voice_turn_commits_after_playback() {
    let h = Harness::spawn(TurnPolicy::default());
    h.start().await;

    h.detector.speak(SPEECH);
    h.sink.wait_for(finished(1, TurnOutcome::Committed)).await;

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, AssistantState::Listening);
    assert!(snapshot.active_turn.is_none());
    assert_eq!(snapshot.transcript.len(), 1);
    assert_eq!(snapshot.transcript[0].user, "bonjour");
    assert_eq!(snapshot.transcript[0].assistant, "salut");

    let events = h.sink.events();
    let transcript = events
        .iter()
        .position(|e| matches!(e, AssistantEvent::TranscriptReady { .. }))
        .unwrap();
    let reply = events
        .iter()
        .position(|e| matches!(e, AssistantEvent::ReplyReady { .. }))
        .unwrap();
    assert!(transcript < reply);
    assert_eq!(h.stt.0.calls(), 1);
    assert_eq!(h.output.0.calls(), 1);
}

#[tokio::test]
async fn test_barge_in_during_playback_stops_speaker() {
    let h = Harness::spawn(TurnPolicy::default());
    h.start().await;
    h.output.0.gate.hold();

    h.detector.speak(SPEECH);
    h.until(|| h.output.0.is_busy()).await;
    assert_eq!(h.handle.state(), AssistantState::Speaking);

    h.detector.speech_start();
    h.sink.wait_for(finished(1, TurnOutcome::Interrupted)).await;
    h.wait_state(AssistantState::SpeechActive).await;

    assert_eq!(h.output.0.cancels(), 1);
    assert!(!h.output.0.is_busy());
    assert_eq!(h.sink.infos(Severity::Warning), vec!["assistant interrupted"]);

    // The follow-up utterance becomes its own turn
    h.output.0.gate.release();
    h.detector.speech_end(SPEECH);
    h.sink.wait_for(finished(2, TurnOutcome::Committed)).await;

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.transcript.len(), 1);
    assert_eq!(snapshot.transcript[0].turn, TurnId(2));
}

#[tokio::test]
async fn test_barge_in_during_completion_discards_stale_reply() {
    let h = Harness::spawn(TurnPolicy::default());
    h.start().await;
    h.chat.script.gate.hold();

    h.detector.speak(SPEECH);
    h.until(|| h.chat.script.is_busy()).await;

    h.detector.speak(SPEECH);
    h.sink.wait_for(finished(1, TurnOutcome::Interrupted)).await;
    h.until(|| h.chat.script.calls() == 2).await;
    assert_eq!(h.chat.script.cancels(), 1);

    h.chat.script.gate.release();
    h.sink.wait_for(finished(2, TurnOutcome::Committed)).await;

    let events = h.sink.events();
    assert!(!events.iter().any(|e| matches!(
        e,
        AssistantEvent::ReplyReady { turn, .. } if *turn == TurnId(1)
    )));

    // Turn 1 never committed, so turn 2 is sent without history
    let requests = h.chat.requests();
    assert_eq!(requests[1].len(), 1);
}

#[tokio::test]
async fn test_barge_in_during_transcription_cancels_request() {
    let h = Harness::spawn(TurnPolicy::default());
    h.start().await;
    h.stt.0.gate.hold();

    h.detector.speak(SPEECH);
    h.until(|| h.stt.0.is_busy()).await;
    assert_eq!(h.handle.state(), AssistantState::Transcribing);

    h.detector.speech_start();
    h.sink.wait_for(finished(1, TurnOutcome::Interrupted)).await;
    assert_eq!(h.stt.0.cancels(), 1);
    assert_eq!(h.chat.script.calls(), 0);
}

#[tokio::test]
async fn test_short_utterance_is_ignored() {
    let h = Harness::spawn(TurnPolicy::default());
    h.start().await;

    h.detector.speak(50);
    settle().await;

    assert_eq!(started(&h.sink.events()), 0);
    assert_eq!(h.stt.0.calls(), 0);
    assert_eq!(h.handle.state(), AssistantState::Listening);
}

#[tokio::test]
async fn test_typed_message_while_idle() {
    let h = Harness::spawn(TurnPolicy::default());

    h.handle.send_text("bonjour").unwrap();
    h.sink.wait_for(finished(1, TurnOutcome::Committed)).await;

    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, AssistantState::Idle);
    assert!(!snapshot.running);
    assert_eq!(snapshot.transcript.len(), 1);
    assert_eq!(h.stt.0.calls(), 0);
    assert_eq!(h.detector.starts(), 0);
}

#[tokio::test]
async fn test_typed_message_preempts_voice_turn() {
    let h = Harness::spawn(TurnPolicy::default());
    h.start().await;
    h.stt.0.gate.hold();

    h.detector.speak(SPEECH);
    h.until(|| h.stt.0.is_busy()).await;

    h.handle.send_text("tapé au clavier").unwrap();
    h.sink.wait_for(finished(1, TurnOutcome::Interrupted)).await;
    h.sink.wait_for(finished(2, TurnOutcome::Committed)).await;

    assert_eq!(h.stt.0.cancels(), 1);
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.transcript.len(), 1);
    assert_eq!(snapshot.transcript[0].user, "tapé au clavier");
    assert_eq!(snapshot.state, AssistantState::Listening);
    h.stt.0.gate.release();
}

#[tokio::test]
async fn test_history_is_sent_with_next_request() {
    let h = Harness::spawn(TurnPolicy::default());

    h.handle.send_text("premier").unwrap();
    h.sink.wait_for(finished(1, TurnOutcome::Committed)).await;
    h.handle.send_text("second").unwrap();
    h.sink.wait_for(finished(2, TurnOutcome::Committed)).await;

    let requests = h.chat.requests();
    assert_eq!(requests.len(), 2);
    let contents: Vec<&str> = requests[1].iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["premier", "salut", "second"]);
}

#[tokio::test]
async fn test_end_phrase_stops_session() {
    let h = Harness::spawn(TurnPolicy::default());
    h.stt.0.reply(Ok("bon, Fin de discussion".to_string()));
    h.start().await;

    h.detector.speak(SPEECH);
    h.sink.wait_for(info("conversation ended")).await;
    h.wait_state(AssistantState::Idle).await;

    assert_eq!(h.chat.script.calls(), 0);
    assert!(!h.detector.is_running());
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(!snapshot.running);
    assert!(snapshot.transcript.is_empty());
}

#[tokio::test]
async fn test_missing_wake_phrase_restarts_listening() {
    let policy = TurnPolicy {
        gate: PhraseGate::new(Some("Monsieur"), Some(DEFAULT_END_PHRASE)),
        restart_delay: Duration::from_millis(20),
        ..TurnPolicy::default()
    };
    let h = Harness::spawn(policy);
    h.stt.0.reply(Ok("quelle heure est-il".to_string()));
    h.stt.0.reply(Ok("monsieur, quelle heure est-il".to_string()));
    h.start().await;

    h.detector.speak(SPEECH);
    h.sink.wait_for(finished(1, TurnOutcome::Aborted)).await;
    h.until(|| h.detector.starts() == 2).await;
    h.wait_state(AssistantState::Listening).await;
    assert_eq!(h.chat.script.calls(), 0);

    h.detector.speak(SPEECH);
    h.sink.wait_for(finished(2, TurnOutcome::Committed)).await;
    assert_eq!(h.chat.script.calls(), 1);
}

#[tokio::test]
async fn test_stop_cancels_in_flight_work() {
    let h = Harness::spawn(TurnPolicy::default());
    h.start().await;
    h.chat.script.gate.hold();

    h.detector.speak(SPEECH);
    h.until(|| h.chat.script.is_busy()).await;

    h.handle.stop().unwrap();
    h.wait_state(AssistantState::Idle).await;
    h.sink.wait_for(info("session stopped")).await;
    assert_eq!(h.chat.script.cancels(), 1);
    assert!(!h.detector.is_running());

    h.chat.script.gate.release();
    settle().await;
    assert!(
        !h.sink
            .events()
            .iter()
            .any(|e| matches!(e, AssistantEvent::ReplyReady { .. }))
    );

    // Stopping again is harmless
    h.handle.stop().unwrap();
    settle().await;
    assert_eq!(h.chat.script.cancels(), 1);
    assert_eq!(h.handle.state(), AssistantState::Idle);

    // A fresh start carries no residual turn
    h.start().await;
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.active_turn.is_none());
    assert!(snapshot.running);
}

#[tokio::test]
async fn test_muted_microphone_ignores_speech() {
    let h = Harness::spawn(TurnPolicy::default());
    h.start().await;

    h.handle.set_muted(true).unwrap();
    h.until(|| h.detector.is_muted()).await;
    h.detector.speak(SPEECH);
    settle().await;
    assert_eq!(started(&h.sink.events()), 0);
    assert!(h.sink.events().iter().any(|e| matches!(
        e,
        AssistantEvent::StatusChanged(status) if status.muted && !status.listening
    )));

    h.handle.set_muted(false).unwrap();
    h.until(|| !h.detector.is_muted()).await;
    h.detector.speak(SPEECH);
    h.sink.wait_for(finished(1, TurnOutcome::Committed)).await;
}

#[tokio::test]
async fn test_missing_credential_reports_error() {
    let h = Harness::spawn_with(None, TurnPolicy::default());

    h.handle.send_text("bonjour").unwrap();
    h.sink.wait_for(finished(1, TurnOutcome::Aborted)).await;

    assert_eq!(h.sink.infos(Severity::Error), vec!["no API key configured"]);
    assert_eq!(h.chat.script.calls(), 0);
}

#[tokio::test]
async fn test_transcription_failure_aborts_turn() {
    let h = Harness::spawn(TurnPolicy::default());
    h.stt.0.reply(Err(Error::RemoteCallFailed {
        stage: Stage::Transcription,
        status: "503 Service Unavailable".to_string(),
    }));
    h.start().await;

    h.detector.speak(SPEECH);
    h.sink.wait_for(finished(1, TurnOutcome::Aborted)).await;
    assert!(h.sink.infos(Severity::Error)[0].contains("transcription request failed"));
    h.wait_state(AssistantState::Listening).await;
    assert_eq!(h.chat.script.calls(), 0);

    // The next utterance goes through normally
    h.detector.speak(SPEECH);
    h.sink.wait_for(finished(2, TurnOutcome::Committed)).await;
}

#[tokio::test]
async fn test_playback_failure_is_not_fatal() {
    let h = Harness::spawn(TurnPolicy::default());
    h.output
        .0
        .reply(Err(Error::PlaybackFailed("device busy".to_string())));

    h.handle.send_text("bonjour").unwrap();
    h.sink.wait_for(finished(1, TurnOutcome::Interrupted)).await;

    assert_eq!(
        h.sink.infos(Severity::Warning),
        vec!["playback failed: device busy"]
    );
    assert!(h.sink.infos(Severity::Error).is_empty());
    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(snapshot.transcript.is_empty());
}

#[tokio::test]
async fn test_playback_timeout_commits_turn() {
    let policy = TurnPolicy {
        playback_timeout: Duration::from_millis(50),
        ..TurnPolicy::default()
    };
    let h = Harness::spawn(policy);
    h.output.0.gate.hold();

    h.handle.send_text("bonjour").unwrap();
    h.sink.wait_for(finished(1, TurnOutcome::Committed)).await;

    assert!(!h.output.0.is_busy());
    let snapshot = h.handle.snapshot().await.unwrap();
    assert_eq!(snapshot.transcript.len(), 1);
    h.output.0.gate.release();
}

#[tokio::test]
async fn test_reset_clears_history_but_not_turn_ids() {
    let h = Harness::spawn(TurnPolicy::default());

    h.handle.send_text("premier").unwrap();
    h.sink.wait_for(finished(1, TurnOutcome::Committed)).await;

    h.handle.reset().unwrap();
    h.sink.wait_for(info("conversation reset")).await;
    assert!(h.handle.snapshot().await.unwrap().transcript.is_empty());

    h.handle.send_text("second").unwrap();
    h.sink.wait_for(finished(2, TurnOutcome::Committed)).await;

    let requests = h.chat.requests();
    assert_eq!(requests.last().map(Vec::len), Some(1));
}

#[tokio::test]
async fn test_detector_failure_is_reported() {
    let h = Harness::spawn(TurnPolicy::default());
    h.detector.fail_next_start();

    h.handle.start().unwrap();
    h.sink
        .wait_for(info("voice detector failed to start"))
        .await;

    let snapshot = h.handle.snapshot().await.unwrap();
    assert!(!snapshot.running);
    assert_eq!(snapshot.state, AssistantState::Idle);

    // Retrying succeeds once the device is back
    h.start().await;
    assert_eq!(h.detector.starts(), 1);
}

#[tokio::test]
async fn test_detector_keeps_listening_during_playback_by_default() {
    let h = Harness::spawn(TurnPolicy::default());
    h.start().await;
    h.output.0.gate.hold();

    h.detector.speak(SPEECH);
    h.until(|| h.output.0.is_busy()).await;
    assert!(!h.detector.is_paused());
    h.output.0.gate.release();
}

#[tokio::test]
async fn test_detector_pauses_during_playback_without_resume() {
    let policy = TurnPolicy {
        resume_on_playback: false,
        ..TurnPolicy::default()
    };
    let h = Harness::spawn(policy);
    h.start().await;
    h.stt.0.gate.hold();
    h.output.0.gate.hold();

    h.detector.speak(SPEECH);
    h.until(|| h.stt.0.is_busy()).await;
    assert!(!h.detector.is_paused());

    h.stt.0.gate.release();
    h.until(|| h.output.0.is_busy()).await;
    assert!(h.detector.is_paused());

    h.output.0.gate.release();
    h.sink.wait_for(finished(1, TurnOutcome::Committed)).await;
    assert!(!h.detector.is_paused());
}

#[tokio::test]
async fn test_pause_while_processing_policy() {
    let policy = TurnPolicy {
        pause_while_processing: true,
        resume_on_playback: false,
        ..TurnPolicy::default()
    };
    let h = Harness::spawn(policy);
    h.start().await;
    h.stt.0.gate.hold();
    h.output.0.gate.hold();

    h.detector.speak(SPEECH);
    h.until(|| h.stt.0.is_busy()).await;
    assert!(h.detector.is_paused());

    h.stt.0.gate.release();
    h.until(|| h.output.0.is_busy()).await;
    assert!(h.detector.is_paused());

    h.output.0.gate.release();
    h.sink.wait_for(finished(1, TurnOutcome::Committed)).await;
    assert!(!h.detector.is_paused());
}
