//! Contracts for the external services a conversation depends on
//!
//! Every collaborator call resolves to a [`ServiceResult`]: `Ok` on success,
//! or a [`ServiceError`] tagged as transient (worth retrying) or fatal.

use async_trait::async_trait;
use thiserror::Error;

use crate::session::{Turn, is_recoverable};

/// Outcome of a collaborator call
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Failure reported by a collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// Timeout, rate limit or temporary unavailability
    #[error("transient failure: {0}")]
    Transient(String),

    /// Auth/config error, malformed input, or unrecoverable service error
    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl ServiceError {
    /// Build a transient failure
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    /// Build a fatal failure
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    /// Whether the retry policy applies to this failure
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Failure reason without the tag
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(r) | Self::Fatal(r) => r,
        }
    }

    /// Classify a non-success HTTP response from `service`
    #[must_use]
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let reason = format!("{service} error {status}: {body}");
        if is_recoverable(status.as_u16(), body) {
            Self::Transient(reason)
        } else {
            Self::Fatal(reason)
        }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return Self::from_status("http", status, &e.to_string());
        }

        if e.is_timeout() || e.is_connect() || e.is_request() {
            Self::Transient(e.to_string())
        } else {
            Self::Fatal(e.to_string())
        }
    }
}

/// Voice selection passed to [`SpeechOutput::synthesize`]
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceConfig {
    /// Provider voice identifier (e.g. "alloy")
    pub voice: String,
    /// Speed multiplier (0.25 to 4.0)
    pub speed: f32,
    /// BCP-47 language code
    pub language_code: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: "alloy".to_string(),
            speed: 1.0,
            language_code: "en-US".to_string(),
        }
    }
}

/// Converts captured audio into text
#[async_trait]
pub trait SpeechInput: Send + Sync {
    /// Transcribe `audio` recorded at `sample_rate`
    ///
    /// Must fail fast with [`ServiceError::Fatal`] on empty audio or an
    /// unsupported format.
    async fn transcribe(&self, audio: &[u8], sample_rate: u32) -> ServiceResult<String>;
}

/// Generates a reply from the conversation so far
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate the next assistant reply for `history`
    async fn generate(&self, history: &[Turn], system_context: &str) -> ServiceResult<String>;

    /// Cheap reachability check run before the conversation starts
    async fn probe(&self) -> ServiceResult<()> {
        Ok(())
    }
}

/// Converts reply text into playable audio
#[async_trait]
pub trait SpeechOutput: Send + Sync {
    /// Synthesize `text` with `voice`
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> ServiceResult<Vec<u8>>;
}

/// Destination for synthesized audio
#[async_trait]
pub trait AudioSink: Send {
    /// Play or store encoded audio (MP3 or WAV)
    async fn play(&mut self, audio: &[u8]) -> ServiceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn rate_limit_is_transient() {
        let e = ServiceError::from_status("llm", StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(e.is_transient());
        assert!(e.reason().contains("429"));
    }

    #[test]
    fn unavailable_is_transient() {
        let e = ServiceError::from_status("tts", StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(e.is_transient());
    }

    #[test]
    fn auth_failure_is_fatal() {
        let e = ServiceError::from_status("stt", StatusCode::UNAUTHORIZED, "bad key");
        assert_eq!(e, ServiceError::Fatal("stt error 401 Unauthorized: bad key".to_string()));
    }

    #[test]
    fn display_includes_tag() {
        assert_eq!(
            ServiceError::transient("timed out").to_string(),
            "transient failure: timed out"
        );
        assert_eq!(ServiceError::fatal("nope").to_string(), "fatal failure: nope");
    }
}
