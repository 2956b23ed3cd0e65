//! Voice Agent - spoken conversations with a hosted language model
//!
//! This library provides the pieces of a turn-based voice assistant:
//! - Conversation session (turn sequencing, bounded history, retries)
//! - Hosted STT/TTS clients and audio capture/playback
//! - OpenAI-compatible chat client
//! - Layered configuration and the command-line loop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  CLI (REPL / batch)                  │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │               ConversationSession                    │
//! │   State machine  │  History  │  Retry policy        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                Collaborators                         │
//! │   SpeechInput  │  LanguageModel  │  SpeechOutput    │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod service;
pub mod session;
pub mod setup;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use llm::ChatModel;
pub use service::{
    AudioSink, LanguageModel, ServiceError, ServiceResult, SpeechInput, SpeechOutput, VoiceConfig,
};
pub use session::{
    Collaborators, ConversationSession, HistoryLimit, RetryPolicy, Role, SessionConfig,
    SessionState, Turn,
};
