//! Voice processing module
//!
//! Handles audio capture, speech detection, remote transcription and
//! synthesis, and playback. Every remote client and the speaker share the
//! single-flight cancellation contract in [`inflight`].

mod capture;
mod codec;
mod detector;
pub mod inflight;
mod playback;
mod stt;
mod tts;
mod vad;
mod wake_word;

pub use capture::{AudioCapture, CaptureTap, SAMPLE_RATE};
pub use codec::{DecodedAudio, WAV_HEADER_LEN, decode_audio, encode_wav, quantize, resample};
pub use detector::{DetectorEvent, DetectorEvents, MicDetector, Segmenter, SpeechDetector};
pub use inflight::InFlight;
pub use playback::{AudioOutput, SpeakerOutput};
pub use stt::{HttpSpeechToText, SpeechToText, SttOptions};
pub use tts::{HttpTextToSpeech, TextToSpeech, TtsOptions, TtsProvider};
pub use vad::{
    DEFAULT_ENERGY_THRESHOLD, FRAME_SAMPLES, Vad, VadConfig, VadEvent, VadState, calculate_energy,
};
pub use wake_word::{GateVerdict, PhraseGate};
