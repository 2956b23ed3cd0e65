//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::service::{ServiceError, ServiceResult, SpeechOutput, VoiceConfig};
use crate::{Error, Result};

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

impl TtsProvider {
    /// Model used when none is configured
    #[must_use]
    pub const fn default_model(self) -> &'static str {
        match self {
            Self::OpenAI => "tts-1",
            Self::ElevenLabs => "eleven_monolingual_v1",
        }
    }
}

impl std::str::FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: SecretString,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance for `provider`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(provider: TtsProvider, api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            let which = match provider {
                TtsProvider::OpenAI => "OpenAI API key required for TTS",
                TtsProvider::ElevenLabs => "ElevenLabs API key required for TTS",
            };
            return Err(Error::Config(which.to_string()));
        }

        let model = if model.is_empty() {
            provider.default_model().to_string()
        } else {
            model
        };

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: SecretString::from(api_key),
            model,
            provider,
        })
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str, voice: &VoiceConfig) -> ServiceResult<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &voice.voice,
            speed: voice.speed.clamp(0.25, 4.0),
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "OpenAI TTS error");
            return Err(ServiceError::from_status("OpenAI TTS", status, &body));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> ServiceResult<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{}", voice.voice);

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "ElevenLabs TTS error");
            return Err(ServiceError::from_status("ElevenLabs TTS", status, &body));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SpeechOutput for TextToSpeech {
    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> ServiceResult<Vec<u8>> {
        if text.trim().is_empty() {
            return Err(ServiceError::fatal("empty text provided for synthesis"));
        }

        tracing::debug!(chars = text.len(), voice = %voice.voice, "synthesizing speech");
        let audio = match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(text, voice).await?,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text, voice).await?,
        };

        if audio.is_empty() {
            return Err(ServiceError::fatal("synthesis returned no audio"));
        }

        tracing::info!(chars = text.len(), audio_bytes = audio.len(), "synthesis complete");
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_api_key() {
        assert!(TextToSpeech::new(TtsProvider::OpenAI, String::new(), "tts-1".to_string()).is_err());
    }

    #[test]
    fn empty_model_uses_provider_default() {
        let tts = TextToSpeech::new(TtsProvider::ElevenLabs, "k".to_string(), String::new()).unwrap();
        assert_eq!(tts.model, "eleven_monolingual_v1");
    }

    #[test]
    fn parses_provider_names() {
        assert_eq!("OpenAI".parse::<TtsProvider>().unwrap(), TtsProvider::OpenAI);
        assert_eq!("elevenlabs".parse::<TtsProvider>().unwrap(), TtsProvider::ElevenLabs);
        assert!("riva".parse::<TtsProvider>().is_err());
    }

    #[tokio::test]
    async fn blank_text_fails_fast() {
        let tts = TextToSpeech::new(TtsProvider::OpenAI, "k".to_string(), String::new()).unwrap();
        let err = tts.synthesize("   ", &VoiceConfig::default()).await.unwrap_err();
        assert_eq!(err, ServiceError::fatal("empty text provided for synthesis"));
    }
}
