//! Conversational agent: the chat completion stage of a turn

mod chat;

pub use chat::{ChatCompletion, ChatMessage, ChatOptions, HttpChatCompletion, Role};
