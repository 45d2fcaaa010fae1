//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use super::inflight::InFlight;
use crate::error::Stage;
use crate::{Error, Result};

/// Transcribes encoded utterances to text
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe a mono 16-bit PCM WAV container
    ///
    /// # Errors
    ///
    /// Returns `Canceled` if [`Self::cancel`] is called first, `Busy` if a
    /// request is already outstanding, or `RemoteCallFailed` on transport
    /// and non-success responses
    async fn submit(&self, audio: Vec<u8>, credential: &SecretString) -> Result<String>;

    /// Cancel the outstanding request; returns whether one was canceled
    fn cancel(&self) -> bool;
}

/// Response from an OpenAI-compatible transcription endpoint
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Transcription request settings
#[derive(Debug, Clone)]
pub struct SttOptions {
    /// API base URL, e.g. `https://api.groq.com/openai/v1`
    pub base_url: String,
    /// Transcription model
    pub model: String,
    /// ISO-639-1 language hint; empty lets the service detect it
    pub language: String,
    /// Sampling temperature
    pub temperature: f32,
}

/// Whisper-style transcription client (`/audio/transcriptions`)
pub struct HttpSpeechToText {
    client: reqwest::Client,
    options: SttOptions,
    inflight: InFlight,
}

impl HttpSpeechToText {
    /// Create a transcription client
    #[must_use]
    pub fn new(options: SttOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            options,
            inflight: InFlight::new("transcription"),
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/audio/transcriptions",
            self.options.base_url.trim_end_matches('/')
        )
    }

    async fn transcribe(&self, audio: Vec<u8>, credential: &SecretString) -> Result<String> {
        tracing::debug!(
            audio_bytes = audio.len(),
            model = %self.options.model,
            "starting transcription"
        );

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")?,
            )
            .text("model", self.options.model.clone())
            .text("temperature", self.options.temperature.to_string())
            .text("response_format", "json");

        if !self.options.language.is_empty() {
            form = form.text("language", self.options.language.clone());
        }

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(credential.expose_secret())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::RemoteCallFailed {
                stage: Stage::Transcription,
                status: format!("{status}: {body}"),
            });
        }

        let result: TranscriptionResponse = response.json().await?;
        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

#[async_trait]
impl SpeechToText for HttpSpeechToText {
    async fn submit(&self, audio: Vec<u8>, credential: &SecretString) -> Result<String> {
        self.inflight
            .run(self.transcribe(audio, credential))
            .await
            .map_err(|e| e.into_stage_failure(Stage::Transcription))
    }

    fn cancel(&self) -> bool {
        self.inflight.cancel()
    }
}
