//! Turn controller: the interruption-aware conversation state machine
//!
//! The controller is an actor. It owns the [`Session`], the speech detector,
//! and at most one in-flight stage future, and reacts to three inputs in a
//! single loop: commands from [`AssistantHandle`], detector events, and the
//! outcome of the current stage. Canceling a stage drops its future and
//! asks every collaborator to cancel, so a superseded turn can never
//! resolve into the turn that replaced it. Stage outcomes additionally
//! carry their [`TurnId`] and are checked against the active turn before
//! they are acted on.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::events::{AssistantEvent, EventSink, Severity, Status};
use super::session::{Exchange, Session};
use super::state::{AssistantState, TurnId, TurnOutcome, TurnSource, Utterance};
use crate::agent::{ChatCompletion, ChatMessage};
use crate::error::Stage;
use crate::voice::{
    AudioOutput, DetectorEvent, DetectorEvents, GateVerdict, PhraseGate, SpeechDetector,
    SpeechToText, TextToSpeech, encode_wav,
};
use crate::{Error, Result};

/// Default minimum utterance length in samples
pub const DEFAULT_MIN_UTTERANCE_SAMPLES: usize = 100;

/// Default playback safety timeout
pub const DEFAULT_PLAYBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default delay before listening restarts after a rejected transcript
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_millis(500);

/// Default phrase that ends the session
pub const DEFAULT_END_PHRASE: &str = "fin de discussion";

/// Behavioral knobs of the controller
#[derive(Debug, Clone)]
pub struct TurnPolicy {
    /// Utterances shorter than this are dropped before transcription
    pub min_utterance_samples: usize,
    /// Playback running longer than this is treated as ended
    pub playback_timeout: Duration,
    /// Wake-phrase and end-phrase matching on voice transcripts
    pub gate: PhraseGate,
    /// Delay between stop and restart when the wake phrase is missing
    pub restart_delay: Duration,
    /// Keep the detector listening during playback; pause it otherwise
    pub resume_on_playback: bool,
    /// Pause the detector while transcribing and completing
    pub pause_while_processing: bool,
}

impl Default for TurnPolicy {
    fn default() -> Self {
        Self {
            min_utterance_samples: DEFAULT_MIN_UTTERANCE_SAMPLES,
            playback_timeout: DEFAULT_PLAYBACK_TIMEOUT,
            gate: PhraseGate::new(None, Some(DEFAULT_END_PHRASE)),
            restart_delay: DEFAULT_RESTART_DELAY,
            resume_on_playback: true,
            pause_while_processing: false,
        }
    }
}

/// Everything the controller talks to
pub struct Collaborators {
    /// Voice activity source
    pub detector: Box<dyn SpeechDetector>,
    /// Transcription client
    pub stt: Arc<dyn SpeechToText>,
    /// Chat completion client
    pub chat: Arc<dyn ChatCompletion>,
    /// Speech synthesis client
    pub tts: Arc<dyn TextToSpeech>,
    /// Speaker
    pub output: Arc<dyn AudioOutput>,
    /// Event observer
    pub sink: Arc<dyn EventSink>,
}

/// Point-in-time view of the controller
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Current state
    pub state: AssistantState,
    /// Active turn, if any
    pub active_turn: Option<TurnId>,
    /// Committed exchanges
    pub transcript: Vec<Exchange>,
    /// Whether the detector has been started
    pub running: bool,
    /// Whether the microphone is muted
    pub muted: bool,
}

enum Command {
    Start,
    Stop,
    SetMuted(bool),
    SendText(String),
    Reset,
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown,
}

enum StageResult {
    Transcribed(Result<String>),
    Completed(Result<ChatMessage>),
    Synthesized(Result<Vec<u8>>),
    Played(Result<()>),
}

struct StageOutcome {
    turn: TurnId,
    stage: AssistantState,
    result: StageResult,
}

type StageFuture = Pin<Box<dyn Future<Output = StageOutcome> + Send>>;

/// Drives turns through transcription, completion, and speech
pub struct TurnController {
    session: Session,
    policy: TurnPolicy,
    state: AssistantState,
    running: bool,
    muted: bool,
    last_status: Option<Status>,
    detector: Box<dyn SpeechDetector>,
    stt: Arc<dyn SpeechToText>,
    chat: Arc<dyn ChatCompletion>,
    tts: Arc<dyn TextToSpeech>,
    output: Arc<dyn AudioOutput>,
    sink: Arc<dyn EventSink>,
    commands: mpsc::UnboundedReceiver<Command>,
    detector_tx: DetectorEvents,
    detector_rx: mpsc::UnboundedReceiver<DetectorEvent>,
    stage: Option<StageFuture>,
    restart_at: Option<Instant>,
    state_tx: watch::Sender<AssistantState>,
}

impl TurnController {
    /// Create a controller and the handle that commands it
    #[must_use]
    pub fn new(
        session: Session,
        policy: TurnPolicy,
        collaborators: Collaborators,
    ) -> (Self, AssistantHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (detector_tx, detector_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(AssistantState::Idle);

        let controller = Self {
            session,
            policy,
            state: AssistantState::Idle,
            running: false,
            muted: false,
            last_status: None,
            detector: collaborators.detector,
            stt: collaborators.stt,
            chat: collaborators.chat,
            tts: collaborators.tts,
            output: collaborators.output,
            sink: collaborators.sink,
            commands: command_rx,
            detector_tx,
            detector_rx,
            stage: None,
            restart_at: None,
            state_tx,
        };

        let handle = AssistantHandle {
            commands: command_tx,
            state: state_rx,
        };

        (controller, handle)
    }

    /// Create a controller and run it on the current runtime
    #[must_use]
    pub fn spawn(
        session: Session,
        policy: TurnPolicy,
        collaborators: Collaborators,
    ) -> (AssistantHandle, JoinHandle<()>) {
        let (controller, handle) = Self::new(session, policy, collaborators);
        (handle, tokio::spawn(controller.run()))
    }

    /// Process inputs until shut down or every handle is dropped
    pub async fn run(mut self) {
        tracing::info!(session = %self.session.id(), "turn controller running");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                Some(event) = self.detector_rx.recv() => self.on_detector_event(event),
                outcome = next_outcome(&mut self.stage), if self.stage.is_some() => {
                    self.stage = None;
                    self.on_stage_outcome(outcome);
                }
                () = wait_until(self.restart_at), if self.restart_at.is_some() => {
                    self.restart_at = None;
                    tracing::debug!("restarting listening");
                    self.start().await;
                }
            }
        }

        self.stop(false);
        tracing::info!("turn controller stopped");
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Start => self.start().await,
            Command::Stop => {
                self.restart_at = None;
                self.stop(true);
            }
            Command::SetMuted(muted) => self.set_muted(muted),
            Command::SendText(text) => self.send_text(&text),
            Command::Reset => self.reset(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    async fn start(&mut self) {
        if self.running {
            tracing::debug!("already listening");
            return;
        }
        self.restart_at = None;

        match self.detector.start(self.detector_tx.clone()).await {
            Ok(()) => {
                self.running = true;
                self.detector.set_muted(self.muted);
                tracing::info!("voice detection started");
                self.emit(AssistantEvent::info(
                    "voice detection started",
                    Severity::Success,
                ));
                if self.session.active().is_none() {
                    self.set_state(AssistantState::Listening);
                } else {
                    self.sync_detector();
                    self.emit_status();
                }
            }
            Err(e) => {
                let error = match e {
                    Error::DetectorInitFailed(_) => e,
                    other => Error::DetectorInitFailed(other.to_string()),
                };
                tracing::error!(error = %error, "speech detector failed to start");
                self.emit(AssistantEvent::info(error.to_string(), Severity::Error));
            }
        }
    }

    /// Cancel all work, release the microphone, and go idle
    fn stop(&mut self, announce: bool) {
        self.cancel_active(TurnOutcome::Interrupted);

        if self.running {
            self.detector.stop();
            self.running = false;
        }
        while self.detector_rx.try_recv().is_ok() {}

        self.set_state(AssistantState::Idle);
        self.emit_status();
        if announce {
            tracing::info!("session stopped");
            self.emit(AssistantEvent::info("session stopped", Severity::Info));
        }
    }

    fn reset(&mut self) {
        self.restart_at = None;
        self.stop(false);
        self.session.clear_history();
        self.emit(AssistantEvent::info("conversation reset", Severity::Success));
    }

    fn set_muted(&mut self, muted: bool) {
        if self.muted == muted {
            return;
        }
        self.muted = muted;
        self.detector.set_muted(muted);
        tracing::info!(muted, "microphone mute changed");

        if muted && self.state == AssistantState::SpeechActive {
            self.set_state(AssistantState::Listening);
        }
        self.emit_status();

        let text = if muted {
            "microphone muted"
        } else {
            "microphone unmuted"
        };
        self.emit(AssistantEvent::info(text, Severity::Info));
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: self.state,
            active_turn: self.session.active().map(|turn| turn.id),
            transcript: self.session.transcript().to_vec(),
            running: self.running,
            muted: self.muted,
        }
    }

    fn on_detector_event(&mut self, event: DetectorEvent) {
        if !self.running || self.muted {
            tracing::trace!(?event, "detector event ignored");
            return;
        }

        match event {
            DetectorEvent::SpeechStart => self.on_speech_start(),
            DetectorEvent::SpeechEnd(utterance) => self.on_speech_end(&utterance),
            DetectorEvent::Misfire => {
                tracing::debug!("speech misfire");
                if self.state == AssistantState::SpeechActive {
                    self.set_state(AssistantState::Listening);
                }
            }
        }
    }

    fn on_speech_start(&mut self) {
        match self.state {
            AssistantState::Listening => self.set_state(AssistantState::SpeechActive),
            AssistantState::Idle | AssistantState::SpeechActive => {}
            AssistantState::Transcribing
            | AssistantState::Completing
            | AssistantState::Speaking
            | AssistantState::Interrupting => {
                self.preempt();
                self.set_state(AssistantState::SpeechActive);
            }
        }
    }

    fn on_speech_end(&mut self, utterance: &Utterance) {
        if self.session.active().is_some() {
            self.preempt();
        }

        if utterance.len() < self.policy.min_utterance_samples {
            tracing::debug!(
                sequence = utterance.sequence,
                samples = utterance.len(),
                "utterance too short, discarded"
            );
            self.set_state(AssistantState::Listening);
            return;
        }

        let turn = self
            .session
            .begin_turn(TurnSource::Voice, AssistantState::Transcribing);
        tracing::info!(
            turn = %turn,
            sequence = utterance.sequence,
            samples = utterance.len(),
            "turn started"
        );
        self.emit(AssistantEvent::TurnStarted { turn });
        self.emit(AssistantEvent::UtteranceAccepted {
            turn,
            sequence: utterance.sequence,
            duration: utterance.duration(),
        });

        let Some(credential) = self.require_credential(turn) else {
            return;
        };

        let audio = match encode_wav(&utterance.samples, utterance.sample_rate) {
            Ok(audio) => audio,
            Err(e) => {
                self.fail_turn(turn, e.into_stage_failure(Stage::Transcription));
                return;
            }
        };

        self.advance(turn, AssistantState::Transcribing);
        let stt = Arc::clone(&self.stt);
        self.stage = Some(Box::pin(async move {
            let result = stt.submit(audio, &credential).await;
            StageOutcome {
                turn,
                stage: AssistantState::Transcribing,
                result: StageResult::Transcribed(result),
            }
        }));
    }

    fn send_text(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if self.session.active().is_some() {
            self.preempt();
        }

        let turn = self
            .session
            .begin_turn(TurnSource::Text, AssistantState::Completing);
        tracing::info!(turn = %turn, "typed turn started");
        self.emit(AssistantEvent::TurnStarted { turn });
        self.emit(AssistantEvent::TranscriptReady {
            turn,
            text: text.to_string(),
        });
        if let Some(active) = self.session.active_mut(turn) {
            active.transcript = Some(text.to_string());
        }

        self.request_completion(turn, text.to_string());
    }

    fn on_stage_outcome(&mut self, outcome: StageOutcome) {
        let StageOutcome {
            turn,
            stage,
            result,
        } = outcome;

        if !self.session.owns(turn, stage) {
            tracing::debug!(turn = %turn, stage = %stage, "discarding stale stage result");
            return;
        }

        match result {
            StageResult::Transcribed(result) => self.on_transcribed(turn, result),
            StageResult::Completed(result) => self.on_completed(turn, result),
            StageResult::Synthesized(result) => self.on_synthesized(turn, result),
            StageResult::Played(result) => self.on_played(turn, result),
        }
    }

    fn on_transcribed(&mut self, turn: TurnId, result: Result<String>) {
        let text = match result {
            Ok(text) => text.trim().to_string(),
            Err(e) => return self.settle_failure(turn, e),
        };

        if text.is_empty() {
            tracing::debug!(turn = %turn, "empty transcript, turn discarded");
            self.finish_turn(turn, TurnOutcome::Aborted);
            return;
        }

        self.emit(AssistantEvent::TranscriptReady {
            turn,
            text: text.clone(),
        });
        if let Some(active) = self.session.active_mut(turn) {
            active.transcript = Some(text.clone());
        }

        match self.policy.gate.check(&text) {
            GateVerdict::Pass => self.request_completion(turn, text),
            GateVerdict::EndSession => {
                self.end_turn(turn, TurnOutcome::Aborted);
                self.emit(AssistantEvent::info("conversation ended", Severity::Info));
                self.stop(true);
            }
            GateVerdict::Rejected => {
                self.end_turn(turn, TurnOutcome::Aborted);
                self.stop(false);
                self.restart_at = Some(Instant::now() + self.policy.restart_delay);
                tracing::debug!(
                    turn = %turn,
                    delay = ?self.policy.restart_delay,
                    "wake phrase missing, restart scheduled"
                );
            }
        }
    }

    fn request_completion(&mut self, turn: TurnId, text: String) {
        let Some(credential) = self.require_credential(turn) else {
            return;
        };

        let mut messages = self.session.history_messages();
        messages.push(ChatMessage::user(text));

        self.advance(turn, AssistantState::Completing);
        let chat = Arc::clone(&self.chat);
        self.stage = Some(Box::pin(async move {
            let result = chat.submit(messages, &credential).await;
            StageOutcome {
                turn,
                stage: AssistantState::Completing,
                result: StageResult::Completed(result),
            }
        }));
    }

    fn on_completed(&mut self, turn: TurnId, result: Result<ChatMessage>) {
        let reply = match result {
            Ok(message) => message.content.trim().to_string(),
            Err(e) => return self.settle_failure(turn, e),
        };

        if reply.is_empty() {
            self.fail_turn(
                turn,
                Error::RemoteCallFailed {
                    stage: Stage::Completion,
                    status: "empty reply".to_string(),
                },
            );
            return;
        }

        self.emit(AssistantEvent::ReplyReady {
            turn,
            text: reply.clone(),
        });
        if let Some(active) = self.session.active_mut(turn) {
            active.reply = Some(reply.clone());
        }

        let Some(credential) = self.require_credential(turn) else {
            return;
        };

        self.advance(turn, AssistantState::Speaking);
        let tts = Arc::clone(&self.tts);
        self.stage = Some(Box::pin(async move {
            let result = tts.submit(reply, &credential).await;
            StageOutcome {
                turn,
                stage: AssistantState::Speaking,
                result: StageResult::Synthesized(result),
            }
        }));
    }

    fn on_synthesized(&mut self, turn: TurnId, result: Result<Vec<u8>>) {
        let audio = match result {
            Ok(audio) => audio,
            Err(e) if e.is_canceled() => return self.settle_failure(turn, e),
            Err(e) => {
                tracing::warn!(turn = %turn, error = %e, "synthesis failed");
                self.emit(AssistantEvent::info(e.to_string(), Severity::Error));
                self.finish_turn(turn, TurnOutcome::Interrupted);
                return;
            }
        };

        let output = Arc::clone(&self.output);
        let timeout = self.policy.playback_timeout;
        self.stage = Some(Box::pin(async move {
            let result = match tokio::time::timeout(timeout, output.play(audio)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(turn = %turn, ?timeout, "playback timed out, treating as ended");
                    Ok(())
                }
            };
            StageOutcome {
                turn,
                stage: AssistantState::Speaking,
                result: StageResult::Played(result),
            }
        }));
    }

    fn on_played(&mut self, turn: TurnId, result: Result<()>) {
        match result {
            Ok(()) => {
                let exchange = self
                    .session
                    .active()
                    .and_then(|active| Some((active.transcript.clone()?, active.reply.clone()?)));
                if let Some((user, assistant)) = exchange {
                    self.session.commit(turn, user, assistant);
                }
                tracing::info!(turn = %turn, "turn committed");
                self.finish_turn(turn, TurnOutcome::Committed);
            }
            Err(e) if e.is_canceled() => self.settle_failure(turn, e),
            Err(e) => {
                tracing::warn!(turn = %turn, error = %e, "playback failed");
                self.emit(AssistantEvent::info(e.to_string(), Severity::Warning));
                self.finish_turn(turn, TurnOutcome::Interrupted);
            }
        }
    }

    /// Settle a stage error: cancellation quietly, anything else as a failure
    fn settle_failure(&mut self, turn: TurnId, error: Error) {
        if error.is_canceled() {
            tracing::debug!(turn = %turn, "stage canceled");
            self.finish_turn(turn, TurnOutcome::Interrupted);
        } else {
            self.fail_turn(turn, error);
        }
    }

    fn fail_turn(&mut self, turn: TurnId, error: Error) {
        tracing::warn!(turn = %turn, error = %error, "turn aborted");
        self.emit(AssistantEvent::info(error.to_string(), Severity::Error));
        self.finish_turn(turn, TurnOutcome::Aborted);
    }

    fn require_credential(&mut self, turn: TurnId) -> Option<Arc<SecretString>> {
        let credential = self.session.credential();
        if credential.is_none() {
            self.fail_turn(turn, Error::MissingCredential);
        }
        credential
    }

    /// Cancel the active turn because new input arrived
    fn preempt(&mut self) {
        self.set_state(AssistantState::Interrupting);
        if let Some(turn) = self.cancel_active(TurnOutcome::Interrupted) {
            tracing::info!(turn = %turn, "assistant interrupted");
            self.emit(AssistantEvent::info("assistant interrupted", Severity::Warning));
        }
    }

    /// Cancel in-flight work and end the active turn with `outcome`
    fn cancel_active(&mut self, outcome: TurnOutcome) -> Option<TurnId> {
        let canceled = [
            self.stt.cancel(),
            self.chat.cancel(),
            self.tts.cancel(),
            self.output.cancel(),
        ];
        if self.stage.take().is_some() || canceled.contains(&true) {
            tracing::debug!("in-flight stage canceled");
        }

        let mut turn = self.session.take_active()?;
        turn.canceled = true;
        tracing::debug!(
            turn = %turn.id,
            source = ?turn.source,
            stage = %turn.state,
            ?outcome,
            "turn canceled"
        );
        self.emit(AssistantEvent::TurnFinished {
            turn: turn.id,
            outcome,
        });
        Some(turn.id)
    }

    /// End `turn` and return to rest
    fn finish_turn(&mut self, turn: TurnId, outcome: TurnOutcome) {
        self.end_turn(turn, outcome);
        let rest = if self.running {
            AssistantState::Listening
        } else {
            AssistantState::Idle
        };
        self.set_state(rest);
    }

    fn end_turn(&mut self, turn: TurnId, outcome: TurnOutcome) {
        if self.session.active().is_some_and(|active| active.id == turn) {
            if let Some(ended) = self.session.take_active() {
                tracing::debug!(turn = %ended.id, source = ?ended.source, ?outcome, "turn ended");
            }
            self.emit(AssistantEvent::TurnFinished { turn, outcome });
        }
    }

    fn advance(&mut self, turn: TurnId, state: AssistantState) {
        if let Some(active) = self.session.active_mut(turn) {
            active.state = state;
        }
        self.set_state(state);
    }

    fn set_state(&mut self, state: AssistantState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "state changed");
        self.state = state;
        self.state_tx.send_replace(state);
        self.emit(AssistantEvent::StateChanged { state });
        self.sync_detector();
        self.emit_status();
    }

    /// Pause or resume the detector to match the current state and policy
    fn sync_detector(&mut self) {
        if !self.running {
            return;
        }

        let paused = match self.state {
            AssistantState::Transcribing | AssistantState::Completing => {
                self.policy.pause_while_processing
            }
            AssistantState::Speaking => !self.policy.resume_on_playback,
            AssistantState::Idle
            | AssistantState::Listening
            | AssistantState::SpeechActive
            | AssistantState::Interrupting => false,
        };

        if paused {
            self.detector.pause();
        } else {
            self.detector.resume();
        }
    }

    fn emit_status(&mut self) {
        let status = Status {
            listening: self.running && !self.muted && self.detector.is_listening(),
            speaking: self.state == AssistantState::Speaking,
            processing: self.state.is_processing(),
            muted: self.muted,
        };

        if self.last_status != Some(status) {
            self.last_status = Some(status);
            self.emit(AssistantEvent::StatusChanged(status));
        }
    }

    fn emit(&self, event: AssistantEvent) {
        self.sink.emit(event);
    }
}

async fn next_outcome(stage: &mut Option<StageFuture>) -> StageOutcome {
    match stage {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable command handle for a running [`TurnController`]
#[derive(Clone)]
pub struct AssistantHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<AssistantState>,
}

impl AssistantHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Closed)
    }

    /// Start listening
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the controller has shut down
    pub fn start(&self) -> Result<()> {
        self.send(Command::Start)
    }

    /// Cancel all work and go idle
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the controller has shut down
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Disable or enable the microphone
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the controller has shut down
    pub fn set_muted(&self, muted: bool) -> Result<()> {
        self.send(Command::SetMuted(muted))
    }

    /// Submit a typed message, preempting any active turn
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the controller has shut down
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Command::SendText(text.into()))
    }

    /// Stop and clear the committed transcript
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the controller has shut down
    pub fn reset(&self) -> Result<()> {
        self.send(Command::Reset)
    }

    /// Stop the controller loop
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the controller has already shut down
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Most recently published state
    #[must_use]
    pub fn state(&self) -> AssistantState {
        *self.state.borrow()
    }

    /// Wait until the controller reaches `target`
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the controller shuts down first
    pub async fn wait_for_state(&self, target: AssistantState) -> Result<()> {
        let mut state = self.state.clone();
        let reached = state.wait_for(|s| *s == target).await.map(|_| ());
        reached.map_err(|_| Error::Closed)
    }

    /// Current state, active turn, and committed transcript
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the controller has shut down
    pub async fn snapshot(&self) -> Result<Snapshot> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot(reply))?;
        response.await.map_err(|_| Error::Closed)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct QuietDetector;

    #[async_trait]
    impl SpeechDetector for QuietDetector {
        async fn start(&mut self, _events: DetectorEvents) -> Result<()> {
            Ok(())
        }
        fn pause(&mut self) {}
        fn resume(&mut self) {}
        fn stop(&mut self) {}
        fn set_muted(&mut self, _muted: bool) {}
        fn is_muted(&self) -> bool {
            false
        }
        fn is_listening(&self) -> bool {
            true
        }
    }

    struct Never;

    #[async_trait]
    impl SpeechToText for Never {
        async fn submit(&self, _audio: Vec<u8>, _credential: &SecretString) -> Result<String> {
            std::future::pending().await
        }
        fn cancel(&self) -> bool {
            false
        }
    }

    #[async_trait]
    impl ChatCompletion for Never {
        async fn submit(
            &self,
            _messages: Vec<ChatMessage>,
            _credential: &SecretString,
        ) -> Result<ChatMessage> {
            std::future::pending().await
        }
        fn cancel(&self) -> bool {
            false
        }
    }

    #[async_trait]
    impl TextToSpeech for Never {
        async fn submit(&self, _text: String, _credential: &SecretString) -> Result<Vec<u8>> {
            std::future::pending().await
        }
        fn cancel(&self) -> bool {
            false
        }
    }

    #[async_trait]
    impl AudioOutput for Never {
        async fn play(&self, _audio: Vec<u8>) -> Result<()> {
            std::future::pending().await
        }
        fn cancel(&self) -> bool {
            false
        }
    }

    fn controller(
        credential: Option<&str>,
    ) -> (TurnController, mpsc::UnboundedReceiver<AssistantEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let never = Arc::new(Never);
        let collaborators = Collaborators {
            detector: Box::new(QuietDetector),
            stt: never.clone(),
            chat: never.clone(),
            tts: never.clone(),
            output: never,
            sink: Arc::new(tx),
        };
        let session = Session::new(credential.map(|c| SecretString::from(c.to_string())));
        let (controller, _handle) =
            TurnController::new(session, TurnPolicy::default(), collaborators);
        (controller, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AssistantEvent>) -> Vec<AssistantEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn late_result_of_superseded_turn_is_ignored() {
        let (mut controller, mut rx) = controller(Some("key"));

        controller.send_text("first");
        controller.send_text("second");
        let current = controller.session.active().unwrap().id;
        assert_eq!(current, TurnId(2));
        drain(&mut rx);

        controller.on_stage_outcome(StageOutcome {
            turn: TurnId(1),
            stage: AssistantState::Completing,
            result: StageResult::Completed(Ok(ChatMessage::assistant("late"))),
        });

        assert!(drain(&mut rx).is_empty());
        assert_eq!(controller.state, AssistantState::Completing);
        let active = controller.session.active().unwrap();
        assert_eq!(active.id, current);
        assert!(active.reply.is_none());
    }

    #[test]
    fn result_for_a_stage_already_left_is_ignored() {
        let (mut controller, mut rx) = controller(Some("key"));
        controller.send_text("bonjour");
        drain(&mut rx);

        controller.on_stage_outcome(StageOutcome {
            turn: TurnId(1),
            stage: AssistantState::Transcribing,
            result: StageResult::Transcribed(Ok("ignored".to_string())),
        });

        assert!(drain(&mut rx).is_empty());
        assert_eq!(controller.state, AssistantState::Completing);
    }

    #[test]
    fn short_utterance_never_starts_a_turn() {
        let (mut controller, mut rx) = controller(Some("key"));
        controller.running = true;
        controller.set_state(AssistantState::Listening);
        drain(&mut rx);

        controller.on_detector_event(DetectorEvent::SpeechStart);
        controller.on_detector_event(DetectorEvent::SpeechEnd(Utterance::new(
            1,
            16_000,
            vec![0.2; 99],
        )));

        assert!(controller.stage.is_none());
        assert!(controller.session.active().is_none());
        assert_eq!(controller.state, AssistantState::Listening);
        assert!(
            drain(&mut rx)
                .iter()
                .all(|e| !matches!(e, AssistantEvent::TurnStarted { .. }))
        );
    }

    #[test]
    fn missing_credential_aborts_before_any_request() {
        let (mut controller, mut rx) = controller(None);
        controller.send_text("bonjour");

        assert!(controller.stage.is_none());
        assert!(controller.session.active().is_none());
        assert_eq!(controller.state, AssistantState::Idle);

        let events = drain(&mut rx);
        assert!(events.contains(&AssistantEvent::TurnFinished {
            turn: TurnId(1),
            outcome: TurnOutcome::Aborted,
        }));
        assert!(events.iter().any(|e| matches!(
            e,
            AssistantEvent::Info { severity: Severity::Error, text } if text.contains("API key")
        )));
    }
}
