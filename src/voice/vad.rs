//! Voice activity detection
//!
//! Splits a continuous sample stream into utterances using frame energy.
//! A segment opens on the first loud frame and closes after a run of quiet
//! frames; segments with too little voiced audio are reported as misfires.

use std::collections::VecDeque;

/// Default RMS energy above which a frame counts as speech
pub const DEFAULT_ENERGY_THRESHOLD: f32 = 0.03;

/// Samples per analysis frame (32ms at 16kHz)
pub const FRAME_SAMPLES: usize = 512;

/// Voice activity detector tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// RMS energy above which a frame counts as speech
    pub energy_threshold: f32,
    /// Samples per analysis frame
    pub frame_samples: usize,
    /// Voiced frames required for a segment to count as speech
    pub min_speech_frames: usize,
    /// Quiet frames that close a segment
    pub redemption_frames: usize,
    /// Quiet frames kept in front of a segment
    pub pre_speech_pad_frames: usize,
}

impl VadConfig {
    /// Build a config from millisecond durations at `sample_rate`
    #[must_use]
    pub fn from_millis(
        sample_rate: u32,
        energy_threshold: f32,
        min_speech_ms: u32,
        redemption_ms: u32,
    ) -> Self {
        let frame_ms = (FRAME_SAMPLES as u64 * 1000 / u64::from(sample_rate.max(1))).max(1);
        let frames = |ms: u32| usize::try_from(u64::from(ms).div_ceil(frame_ms)).unwrap_or(1);

        Self {
            energy_threshold,
            frame_samples: FRAME_SAMPLES,
            min_speech_frames: frames(min_speech_ms).max(1),
            redemption_frames: frames(redemption_ms).max(1),
            pre_speech_pad_frames: 1,
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::from_millis(16_000, DEFAULT_ENERGY_THRESHOLD, 250, 600)
    }
}

/// Segment boundary reported by [`Vad::process`]
#[derive(Debug, Clone, PartialEq)]
pub enum VadEvent {
    /// Speech began
    SpeechStart,
    /// Speech ended; carries the captured segment
    SpeechEnd(Vec<f32>),
    /// A segment opened but turned out too short to be speech
    Misfire,
}

/// Detector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// Waiting for speech
    Silent,
    /// Inside a speech segment
    Speaking,
}

/// Frame-energy voice activity detector
#[derive(Debug)]
pub struct Vad {
    config: VadConfig,
    state: VadState,
    partial: Vec<f32>,
    pre_roll: VecDeque<Vec<f32>>,
    segment: Vec<f32>,
    speech_frames: usize,
    silence_frames: usize,
}

impl Vad {
    /// Create a detector
    #[must_use]
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: VadState::Silent,
            partial: Vec::with_capacity(config.frame_samples),
            pre_roll: VecDeque::new(),
            segment: Vec::new(),
            speech_frames: 0,
            silence_frames: 0,
        }
    }

    /// Feed samples, returning any segment boundaries they complete
    pub fn process(&mut self, samples: &[f32]) -> Vec<VadEvent> {
        let mut events = Vec::new();
        let frame_len = self.config.frame_samples.max(1);

        for &sample in samples {
            self.partial.push(sample);
            if self.partial.len() == frame_len {
                let frame = std::mem::replace(&mut self.partial, Vec::with_capacity(frame_len));
                if let Some(event) = self.process_frame(frame) {
                    events.push(event);
                }
            }
        }

        events
    }

    fn process_frame(&mut self, frame: Vec<f32>) -> Option<VadEvent> {
        let energy = calculate_energy(&frame);
        let is_speech = energy > self.config.energy_threshold;

        match self.state {
            VadState::Silent => {
                if is_speech {
                    self.state = VadState::Speaking;
                    self.segment.clear();
                    for padded in self.pre_roll.drain(..) {
                        self.segment.extend_from_slice(&padded);
                    }
                    self.segment.extend_from_slice(&frame);
                    self.speech_frames = 1;
                    self.silence_frames = 0;
                    tracing::trace!(energy, "speech start");
                    return Some(VadEvent::SpeechStart);
                }

                self.pre_roll.push_back(frame);
                while self.pre_roll.len() > self.config.pre_speech_pad_frames {
                    self.pre_roll.pop_front();
                }
                None
            }
            VadState::Speaking => {
                self.segment.extend_from_slice(&frame);

                if is_speech {
                    self.speech_frames += 1;
                    self.silence_frames = 0;
                    return None;
                }

                self.silence_frames += 1;
                if self.silence_frames < self.config.redemption_frames {
                    return None;
                }

                let speech_frames = self.speech_frames;
                let segment = std::mem::take(&mut self.segment);
                self.reset();

                if speech_frames < self.config.min_speech_frames {
                    tracing::trace!(speech_frames, "misfire");
                    Some(VadEvent::Misfire)
                } else {
                    tracing::debug!(samples = segment.len(), "speech segment complete");
                    Some(VadEvent::SpeechEnd(segment))
                }
            }
        }
    }

    /// Drop any partial segment and return to silence
    pub fn reset(&mut self) {
        self.state = VadState::Silent;
        self.partial.clear();
        self.pre_roll.clear();
        self.segment.clear();
        self.speech_frames = 0;
        self.silence_frames = 0;
    }

    /// Get current state
    #[must_use]
    pub const fn state(&self) -> VadState {
        self.state
    }

}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
