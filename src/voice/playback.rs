//! Audio playback to speakers
//!
//! One output stream at a time. Canceling pauses the stream and rewinds the
//! play head so a stale position can never be resumed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::oneshot;

use super::codec::{decode_audio, resample};
use super::inflight::InFlight;
use crate::{Error, Result};

/// How often the playback thread checks for completion
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Grace period past the nominal clip length before the thread gives up
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Plays synthesized audio
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play `audio` (WAV or MP3) and resolve when it ends naturally
    ///
    /// # Errors
    ///
    /// Returns `Canceled` if [`Self::cancel`] is called first, or
    /// `PlaybackFailed` if the audio cannot be decoded or played
    async fn play(&self, audio: Vec<u8>) -> Result<()>;

    /// Stop playback and rewind; returns whether anything was playing
    fn cancel(&self) -> bool;
}

/// Shared position of the current clip
#[derive(Debug, Default)]
struct Playhead {
    position: AtomicUsize,
    finished: AtomicBool,
    stopped: AtomicBool,
}

impl Playhead {
    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.position.store(0, Ordering::SeqCst);
    }
}

/// Stops the clip if the play future is dropped before it ends
struct StopOnDrop(Arc<Playhead>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        if !self.0.finished.load(Ordering::SeqCst) {
            self.0.stop();
        }
    }
}

/// Plays audio to the default output device
pub struct SpeakerOutput {
    inflight: InFlight,
}

impl SpeakerOutput {
    /// Create a speaker output; the device is opened per clip
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inflight: InFlight::new("playback"),
        }
    }

    async fn render(&self, audio: Vec<u8>) -> Result<()> {
        let decoded = decode_audio(&audio).map_err(|e| Error::PlaybackFailed(e.to_string()))?;
        if decoded.samples.is_empty() {
            return Ok(());
        }

        let playhead = Arc::new(Playhead::default());
        let _stop = StopOnDrop(Arc::clone(&playhead));
        let (done_tx, done_rx) = oneshot::channel();

        let thread_playhead = Arc::clone(&playhead);
        std::thread::Builder::new()
            .name("parley-playback".to_string())
            .spawn(move || {
                let result =
                    play_blocking(&thread_playhead, &decoded.samples, decoded.sample_rate);
                let _ = done_tx.send(result);
            })
            .map_err(|e| Error::PlaybackFailed(e.to_string()))?;

        done_rx
            .await
            .map_err(|_| Error::PlaybackFailed("playback thread exited".to_string()))?
    }
}

impl Default for SpeakerOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AudioOutput for SpeakerOutput {
    async fn play(&self, audio: Vec<u8>) -> Result<()> {
        self.inflight.run(self.render(audio)).await
    }

    fn cancel(&self) -> bool {
        self.inflight.cancel()
    }
}

/// Play `samples` on the calling thread until they end or the clip is stopped
#[allow(clippy::cast_precision_loss)]
fn play_blocking(playhead: &Arc<Playhead>, samples: &[f32], source_rate: u32) -> Result<()> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::PlaybackFailed("no output device available".to_string()))?;

    let config = device
        .default_output_config()
        .map_err(|e| Error::PlaybackFailed(e.to_string()))?
        .config();

    let channels = usize::from(config.channels.max(1));
    let device_rate = config.sample_rate.0;
    let samples: Arc<[f32]> = resample(samples, source_rate, device_rate).into();
    let total = samples.len();

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = device_rate,
        channels,
        samples = total,
        "playback started"
    );

    let callback_playhead = Arc::clone(playhead);
    let callback_samples = Arc::clone(&samples);
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let head = &callback_playhead;
                for frame in data.chunks_mut(channels) {
                    let pos = head.position.load(Ordering::Relaxed);
                    let stopped = head.stopped.load(Ordering::Relaxed);
                    let sample = if !stopped && pos < total {
                        head.position.store(pos + 1, Ordering::Relaxed);
                        callback_samples[pos]
                    } else {
                        if !stopped {
                            head.finished.store(true, Ordering::SeqCst);
                        }
                        0.0
                    };
                    frame.fill(sample);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::PlaybackFailed(e.to_string()))?;

    stream
        .play()
        .map_err(|e| Error::PlaybackFailed(e.to_string()))?;

    let nominal = Duration::from_secs_f64(total as f64 / f64::from(device_rate.max(1)));
    let deadline = Instant::now() + nominal + DRAIN_GRACE;

    while !playhead.finished.load(Ordering::SeqCst) && !playhead.stopped.load(Ordering::SeqCst) {
        if Instant::now() > deadline {
            tracing::warn!("playback did not drain before deadline");
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    if playhead.stopped.load(Ordering::SeqCst) {
        let _ = stream.pause();
        playhead.position.store(0, Ordering::SeqCst);
        tracing::debug!("playback stopped and rewound");
    } else {
        tracing::debug!(samples = total, "playback complete");
    }

    drop(stream);
    Ok(())
}
