//! Chat completion client

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::Stage;
use crate::voice::InFlight;
use crate::{Error, Result};

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions prepended by the client
    System,
    /// The person talking to the assistant
    User,
    /// The assistant
    Assistant,
}

/// Role-tagged chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it
    pub role: Role,
    /// What was said
    pub content: String,
}

impl ChatMessage {
    /// User message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// System message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Produces the assistant's next message for a conversation
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Complete `messages`, oldest first, ending with the new user message
    ///
    /// # Errors
    ///
    /// Returns `Canceled` if [`Self::cancel`] is called first, `Busy` if a
    /// request is already outstanding, or `RemoteCallFailed` on transport
    /// and non-success responses
    async fn submit(
        &self,
        messages: Vec<ChatMessage>,
        credential: &SecretString,
    ) -> Result<ChatMessage>;

    /// Cancel the outstanding request; returns whether one was canceled
    fn cancel(&self) -> bool;
}

/// Chat request settings
#[derive(Debug, Clone)]
pub struct ChatOptions {
    /// API base URL, e.g. `https://api.groq.com/openai/v1`
    pub base_url: String,
    /// Completion model
    pub model: String,
    /// Optional system prompt sent ahead of the conversation
    pub system_prompt: Option<String>,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat client (`/chat/completions`)
pub struct HttpChatCompletion {
    client: reqwest::Client,
    options: ChatOptions,
    inflight: InFlight,
}

impl HttpChatCompletion {
    /// Create a chat client
    #[must_use]
    pub fn new(options: ChatOptions) -> Self {
        Self {
            client: reqwest::Client::new(),
            options,
            inflight: InFlight::new("completion"),
        }
    }

    /// Messages as sent on the wire: system prompt first, then the conversation
    fn payload(&self, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        match self.options.system_prompt.as_deref() {
            Some(prompt) if !prompt.trim().is_empty() => {
                std::iter::once(ChatMessage::system(prompt))
                    .chain(messages)
                    .collect()
            }
            _ => messages,
        }
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        credential: &SecretString,
    ) -> Result<ChatMessage> {
        let messages = self.payload(messages);
        tracing::debug!(
            messages = messages.len(),
            model = %self.options.model,
            "requesting completion"
        );

        let url = format!(
            "{}/chat/completions",
            self.options.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(credential.expose_secret())
            .json(&CompletionRequest {
                model: &self.options.model,
                messages: &messages,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::RemoteCallFailed {
                stage: Stage::Completion,
                status: format!("{status}: {body}"),
            });
        }

        let body: CompletionResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::RemoteCallFailed {
                stage: Stage::Completion,
                status: "response contained no message".to_string(),
            })?;

        tracing::info!(chars = content.len(), "completion received");
        Ok(ChatMessage::assistant(content))
    }
}

#[async_trait]
impl ChatCompletion for HttpChatCompletion {
    async fn submit(
        &self,
        messages: Vec<ChatMessage>,
        credential: &SecretString,
    ) -> Result<ChatMessage> {
        self.inflight
            .run(self.complete(messages, credential))
            .await
            .map_err(|e| e.into_stage_failure(Stage::Completion))
    }

    fn cancel(&self) -> bool {
        self.inflight.cancel()
    }
}
