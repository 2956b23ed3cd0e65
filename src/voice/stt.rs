//! Speech-to-text (STT) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::service::{ServiceError, ServiceResult, SpeechInput};
use crate::{Error, Result};

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f64,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

impl std::str::FromStr for SttProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Transcribes speech to text
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: SttProvider,
    expected_sample_rate: u32,
}

impl SpeechToText {
    /// Create a new STT instance for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(provider: SttProvider, api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            let which = match provider {
                SttProvider::Whisper => "OpenAI API key required for Whisper",
                SttProvider::Deepgram => "Deepgram API key required",
            };
            return Err(Error::Config(which.to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: SecretString::from(api_key),
            model,
            provider,
            expected_sample_rate: super::SAMPLE_RATE,
        })
    }

    /// Accept audio at `sample_rate` instead of the 16kHz default
    #[must_use]
    pub const fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.expected_sample_rate = sample_rate;
        self
    }

    /// Reject input the service would not accept
    fn validate(&self, audio: &[u8], sample_rate: u32) -> ServiceResult<()> {
        if audio.is_empty() {
            return Err(ServiceError::fatal("audio is empty"));
        }
        if sample_rate != self.expected_sample_rate {
            return Err(ServiceError::Fatal(format!(
                "unsupported sample rate {sample_rate}Hz, expected {}Hz",
                self.expected_sample_rate
            )));
        }
        if !audio.starts_with(b"RIFF") {
            return Err(ServiceError::fatal("unsupported audio format, expected WAV"));
        }
        Ok(())
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8]) -> ServiceResult<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| ServiceError::Fatal(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(ServiceError::from_status("Whisper", status, &body));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Fatal(format!("malformed Whisper response: {e}")))?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8]) -> ServiceResult<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(ServiceError::from_status("Deepgram", status, &body));
        }

        let result: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Fatal(format!("malformed Deepgram response: {e}")))?;

        let best = result
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next());

        let (transcript, confidence) =
            best.map_or_else(|| (String::new(), 0.0), |a| (a.transcript, a.confidence));

        tracing::info!(transcript = %transcript, confidence, "transcription complete");
        Ok(transcript)
    }
}

#[async_trait]
impl SpeechInput for SpeechToText {
    async fn transcribe(&self, audio: &[u8], sample_rate: u32) -> ServiceResult<String> {
        self.validate(audio, sample_rate)?;

        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio).await,
        }
    }
}
