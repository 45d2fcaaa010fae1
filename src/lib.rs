//! Parley - interruption-aware voice assistant
//!
//! This library provides the pieces of a spoken conversation loop:
//! - Voice processing (speech detection, capture, playback, audio codecs)
//! - Remote transcription, chat completion, and speech synthesis clients
//! - The turn controller that sequences them and handles barge-in
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Front end                         │
//! │        Console  │  Typed text  │  Event sink         │
//! └────────────────────┬────────────────────────────────┘
//!                      │ AssistantHandle
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Turn controller                      │
//! │   Session  │  Phrase gate  │  Cancellation fence     │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Collaborators                        │
//! │   Detector  │  STT  │  Chat  │  TTS  │  Speaker      │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod console;
pub mod db;
pub mod error;
pub mod providers;
pub mod setup;
pub mod turn;
pub mod voice;

pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use providers::KeyStore;
pub use turn::{AssistantHandle, TurnController};
