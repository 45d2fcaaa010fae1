//! Shared test utilities: scripted collaborators for the turn controller

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::Notify;

use parley::agent::{ChatCompletion, ChatMessage};
use parley::turn::{
    AssistantEvent, AssistantHandle, Collaborators, EventSink, Session, Severity, TurnController,
    TurnPolicy, Utterance,
};
use parley::voice::{
    AudioOutput, DetectorEvent, DetectorEvents, InFlight, SpeechDetector, SpeechToText,
    TextToSpeech,
};
use parley::{DbPool, Error, Result, db};

/// How long a test waits for the controller before failing
pub const WAIT: Duration = Duration::from_secs(2);

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// Holds a scripted call open until released
#[derive(Default)]
pub struct Gate {
    held: AtomicBool,
    notify: Notify,
}

impl Gate {
    /// Make future calls wait
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    /// Let waiting and future calls through
    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn pass(&self) {
        loop {
            let notified = self.notify.notified();
            if !self.held.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

/// Scripted responses for one remote collaborator
pub struct Script<T> {
    inflight: InFlight,
    /// Gate every call passes before answering
    pub gate: Gate,
    replies: Mutex<VecDeque<Result<T>>>,
    fallback: T,
    calls: AtomicUsize,
    cancels: AtomicUsize,
}

impl<T: Clone + Send> Script<T> {
    fn new(name: &'static str, fallback: T) -> Self {
        Self {
            inflight: InFlight::new(name),
            gate: Gate::default(),
            replies: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }

    /// Queue the next answer
    pub fn reply(&self, reply: Result<T>) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Number of calls received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of cancels that settled an outstanding call
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    /// Whether a call is outstanding
    pub fn is_busy(&self) -> bool {
        self.inflight.is_busy()
    }

    async fn answer(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inflight
            .run(async {
                self.gate.pass().await;
                let queued = self.replies.lock().unwrap().pop_front();
                queued.unwrap_or_else(|| Ok(self.fallback.clone()))
            })
            .await
    }

    fn cancel(&self) -> bool {
        let canceled = self.inflight.cancel();
        if canceled {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
        canceled
    }
}

/// Transcription stand-in
pub struct ScriptedStt(pub Script<String>);

#[async_trait]
impl SpeechToText for ScriptedStt {
    async fn submit(&self, _audio: Vec<u8>, _credential: &SecretString) -> Result<String> {
        self.0.answer().await
    }

    fn cancel(&self) -> bool {
        self.0.cancel()
    }
}

/// Chat stand-in that records the messages it was sent
pub struct ScriptedChat {
    /// Scripted replies
    pub script: Script<String>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    /// Message lists received so far
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletion for ScriptedChat {
    async fn submit(
        &self,
        messages: Vec<ChatMessage>,
        _credential: &SecretString,
    ) -> Result<ChatMessage> {
        self.requests.lock().unwrap().push(messages);
        self.script.answer().await.map(ChatMessage::assistant)
    }

    fn cancel(&self) -> bool {
        self.script.cancel()
    }
}

/// Synthesis stand-in
pub struct ScriptedTts(pub Script<Vec<u8>>);

#[async_trait]
impl TextToSpeech for ScriptedTts {
    async fn submit(&self, _text: String, _credential: &SecretString) -> Result<Vec<u8>> {
        self.0.answer().await
    }

    fn cancel(&self) -> bool {
        self.0.cancel()
    }
}

/// Speaker stand-in
pub struct ScriptedOutput(pub Script<()>);

#[async_trait]
impl AudioOutput for ScriptedOutput {
    async fn play(&self, _audio: Vec<u8>) -> Result<()> {
        self.0.answer().await
    }

    fn cancel(&self) -> bool {
        self.0.cancel()
    }
}

/// Test-side view of the scripted detector
#[derive(Default)]
pub struct DetectorProbe {
    events: Mutex<Option<DetectorEvents>>,
    sequence: AtomicU64,
    starts: AtomicUsize,
    paused: AtomicBool,
    muted: AtomicBool,
    fail_start: AtomicBool,
}

impl DetectorProbe {
    /// Make the next start fail as if the microphone were unavailable
    pub fn fail_next_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    /// Emit speech start
    pub fn speech_start(&self) {
        self.send(DetectorEvent::SpeechStart);
    }

    /// Emit speech end carrying `samples` samples of audio
    pub fn speech_end(&self, samples: usize) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.send(DetectorEvent::SpeechEnd(Utterance::new(
            sequence,
            16_000,
            vec![0.1; samples],
        )));
    }

    /// Emit a full utterance
    pub fn speak(&self, samples: usize) {
        self.speech_start();
        self.speech_end(samples);
    }

    /// Number of successful starts
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Whether the controller paused the detector
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Whether the detector was told to mute
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Whether the detector holds an event channel
    pub fn is_running(&self) -> bool {
        self.events.lock().unwrap().is_some()
    }

    fn send(&self, event: DetectorEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }
}

/// Detector driven by the test through a [`DetectorProbe`]
pub struct ScriptedDetector(pub Arc<DetectorProbe>);

#[async_trait]
impl SpeechDetector for ScriptedDetector {
    async fn start(&mut self, events: DetectorEvents) -> Result<()> {
        if self.0.fail_start.swap(false, Ordering::SeqCst) {
            return Err(Error::DetectorInitFailed("no input device".to_string()));
        }
        *self.0.events.lock().unwrap() = Some(events);
        self.0.paused.store(false, Ordering::SeqCst);
        self.0.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) {
        self.0.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&mut self) {
        self.0.paused.store(false, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.0.events.lock().unwrap().take();
        self.0.paused.store(false, Ordering::SeqCst);
    }

    fn set_muted(&mut self, muted: bool) {
        self.0.muted.store(muted, Ordering::SeqCst);
    }

    fn is_muted(&self) -> bool {
        self.0.muted.load(Ordering::SeqCst)
    }

    fn is_listening(&self) -> bool {
        self.0.is_running() && !self.0.is_paused()
    }
}

/// Sink that keeps every event
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AssistantEvent>>,
}

impl RecordingSink {
    /// Events received so far
    pub fn events(&self) -> Vec<AssistantEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Info messages of the given severity
    pub fn infos(&self, severity: Severity) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                AssistantEvent::Info { text, severity: s } if s == severity => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Wait until an event matching `predicate` has been received
    pub async fn wait_for(&self, predicate: impl Fn(&AssistantEvent) -> bool) -> AssistantEvent {
        let found = tokio::time::timeout(WAIT, async {
            loop {
                if let Some(event) = self.events().into_iter().find(|e| predicate(e)) {
                    return event;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        found.expect("timed out waiting for event")
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: AssistantEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// A running controller wired to scripted collaborators
pub struct Harness {
    pub handle: AssistantHandle,
    pub detector: Arc<DetectorProbe>,
    pub stt: Arc<ScriptedStt>,
    pub chat: Arc<ScriptedChat>,
    pub tts: Arc<ScriptedTts>,
    pub output: Arc<ScriptedOutput>,
    pub sink: Arc<RecordingSink>,
}

impl Harness {
    /// Spawn a controller with a credential and the given policy
    pub fn spawn(policy: TurnPolicy) -> Self {
        Self::spawn_with(Some("gsk_test"), policy)
    }

    /// Spawn a controller with an optional credential
    pub fn spawn_with(credential: Option<&str>, policy: TurnPolicy) -> Self {
        let detector = Arc::new(DetectorProbe::default());
        let stt = Arc::new(ScriptedStt(Script::new("stt", "bonjour".to_string())));
        let chat = Arc::new(ScriptedChat {
            script: Script::new("chat", "salut".to_string()),
            requests: Mutex::new(Vec::new()),
        });
        let tts = Arc::new(ScriptedTts(Script::new("tts", vec![0u8; 16])));
        let output = Arc::new(ScriptedOutput(Script::new("playback", ())));
        let sink = Arc::new(RecordingSink::default());

        let collaborators = Collaborators {
            detector: Box::new(ScriptedDetector(Arc::clone(&detector))),
            stt: stt.clone(),
            chat: chat.clone(),
            tts: tts.clone(),
            output: output.clone(),
            sink: sink.clone(),
        };

        let session = Session::new(credential.map(|c| SecretString::from(c.to_string())));
        let (handle, _task) = TurnController::spawn(session, policy, collaborators);

        Self {
            handle,
            detector,
            stt,
            chat,
            tts,
            output,
            sink,
        }
    }

    /// Start listening and wait until the detector is running
    pub async fn start(&self) {
        self.handle.start().unwrap();
        self.wait_state(parley::turn::AssistantState::Listening).await;
    }

    /// Wait for the controller to publish `state`
    pub async fn wait_state(&self, state: parley::turn::AssistantState) {
        tokio::time::timeout(WAIT, self.handle.wait_for_state(state))
            .await
            .expect("timed out waiting for state")
            .unwrap();
    }

    /// Poll until `condition` holds
    pub async fn until(&self, condition: impl Fn() -> bool) {
        tokio::time::timeout(WAIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for condition");
    }
}
