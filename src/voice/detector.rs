//! Speech detector: continuous listening with segment events
//!
//! Wraps microphone capture and the energy VAD behind [`SpeechDetector`] so
//! the turn controller sees only speech-start, speech-end, and misfire.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::capture::{AudioCapture, CaptureTap, SAMPLE_RATE};
use super::codec::resample;
use super::vad::{Vad, VadConfig, VadEvent};
use crate::turn::Utterance;
use crate::{Error, Result};

/// How often captured audio is drained into the VAD
const PUMP_INTERVAL: Duration = Duration::from_millis(30);

/// Event emitted by a speech detector
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorEvent {
    /// The user started speaking
    SpeechStart,
    /// The user stopped speaking; carries the captured utterance
    SpeechEnd(Utterance),
    /// A detection later deemed spurious
    Misfire,
}

/// Sending half handed to a detector on start
pub type DetectorEvents = mpsc::UnboundedSender<DetectorEvent>;

/// Continuous voice-activity source
#[async_trait]
pub trait SpeechDetector: Send {
    /// Acquire the input stream (first call) and begin emitting events
    ///
    /// Calling `start` on a paused detector resumes it.
    ///
    /// # Errors
    ///
    /// Returns `DetectorInitFailed` if the microphone cannot be opened
    async fn start(&mut self, events: DetectorEvents) -> Result<()>;

    /// Stop emitting events but keep the input stream open
    fn pause(&mut self);

    /// Resume a paused detector; no-op if already listening
    fn resume(&mut self);

    /// Release the input stream entirely
    fn stop(&mut self);

    /// Disable or enable the input track
    fn set_muted(&mut self, muted: bool);

    /// Whether the input track is disabled
    fn is_muted(&self) -> bool;

    /// Whether events are currently being emitted
    fn is_listening(&self) -> bool;
}

/// Converts raw captured chunks into detector events
#[derive(Debug)]
pub struct Segmenter {
    vad: Vad,
    next_sequence: u64,
}

impl Segmenter {
    /// Create a segmenter
    #[must_use]
    pub fn new(config: VadConfig) -> Self {
        Self {
            vad: Vad::new(config),
            next_sequence: 1,
        }
    }

    /// Feed samples captured at `input_rate`
    pub fn feed(&mut self, samples: &[f32], input_rate: u32) -> Vec<DetectorEvent> {
        let samples = resample(samples, input_rate, SAMPLE_RATE);

        self.vad
            .process(&samples)
            .into_iter()
            .map(|event| match event {
                VadEvent::SpeechStart => DetectorEvent::SpeechStart,
                VadEvent::Misfire => DetectorEvent::Misfire,
                VadEvent::SpeechEnd(segment) => {
                    let sequence = self.next_sequence;
                    self.next_sequence += 1;
                    DetectorEvent::SpeechEnd(Utterance::new(sequence, SAMPLE_RATE, segment))
                }
            })
            .collect()
    }

    /// Drop any partially detected segment
    pub fn reset(&mut self) {
        self.vad.reset();
    }
}

/// Flags shared with the pump task
#[derive(Debug, Default)]
struct PumpFlags {
    paused: AtomicBool,
    muted: AtomicBool,
}

/// Microphone-backed speech detector
pub struct MicDetector {
    config: VadConfig,
    capture: Option<AudioCapture>,
    pump: Option<JoinHandle<()>>,
    flags: Arc<PumpFlags>,
}

impl MicDetector {
    /// Create a detector; the microphone is opened on [`SpeechDetector::start`]
    #[must_use]
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            capture: None,
            pump: None,
            flags: Arc::new(PumpFlags::default()),
        }
    }
}

#[async_trait]
impl SpeechDetector for MicDetector {
    async fn start(&mut self, events: DetectorEvents) -> Result<()> {
        if self.capture.is_none() {
            let capture = tokio::task::spawn_blocking(AudioCapture::open)
                .await
                .map_err(|e| Error::DetectorInitFailed(e.to_string()))?
                .map_err(|e| Error::DetectorInitFailed(e.to_string()))?;
            capture.set_muted(self.flags.muted.load(Ordering::SeqCst));
            self.capture = Some(capture);
        }

        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        let tap = self
            .capture
            .as_ref()
            .map(AudioCapture::tap)
            .ok_or_else(|| Error::DetectorInitFailed("capture unavailable".to_string()))?;

        self.flags.paused.store(false, Ordering::SeqCst);
        self.pump = Some(tokio::spawn(run_pump(
            tap,
            Segmenter::new(self.config),
            Arc::clone(&self.flags),
            events,
        )));

        tracing::info!("speech detector listening");
        Ok(())
    }

    fn pause(&mut self) {
        self.flags.paused.store(true, Ordering::SeqCst);
        tracing::debug!("speech detector paused");
    }

    fn resume(&mut self) {
        if self.flags.paused.swap(false, Ordering::SeqCst) {
            tracing::debug!("speech detector resumed");
        }
    }

    fn stop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        if let Some(mut capture) = self.capture.take() {
            capture.close();
        }
        self.flags.paused.store(false, Ordering::SeqCst);
        tracing::debug!("speech detector stopped");
    }

    fn set_muted(&mut self, muted: bool) {
        self.flags.muted.store(muted, Ordering::SeqCst);
        if let Some(capture) = &self.capture {
            capture.set_muted(muted);
        }
    }

    fn is_muted(&self) -> bool {
        self.flags.muted.load(Ordering::SeqCst)
    }

    fn is_listening(&self) -> bool {
        self.pump.is_some() && !self.flags.paused.load(Ordering::SeqCst)
    }
}

impl Drop for MicDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Drain the capture buffer into the segmenter until the receiver goes away
async fn run_pump(
    tap: CaptureTap,
    mut segmenter: Segmenter,
    flags: Arc<PumpFlags>,
    events: DetectorEvents,
) {
    let mut ticker = tokio::time::interval(PUMP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let samples = tap.take();

        if flags.paused.load(Ordering::Relaxed) || flags.muted.load(Ordering::Relaxed) {
            segmenter.reset();
            continue;
        }
        if samples.is_empty() {
            continue;
        }

        for event in segmenter.feed(&samples, tap.sample_rate()) {
            if events.send(event).is_err() {
                return;
            }
        }
    }
}
