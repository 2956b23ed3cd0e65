//! Configuration management for the voice agent
//!
//! Values resolve as env > TOML file > default. Only this module reads the
//! environment; the session receives a ready [`SessionConfig`].

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::service::VoiceConfig;
use crate::session::{CallTimeouts, HistoryLimit, RetryPolicy, SessionConfig};
use crate::voice::{SttProvider, TtsProvider};
use crate::{Error, Result};

use file::AgentConfigFile;

/// Default OpenAI-compatible endpoint (NVIDIA API catalog)
pub const DEFAULT_LLM_BASE_URL: &str = "https://integrate.api.nvidia.com/v1";

/// Default chat model
pub const DEFAULT_LLM_MODEL: &str = "qwen/qwen3-coder-480b-a35b-instruct";

/// Default assistant instruction, tuned for spoken replies
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful and friendly voice assistant.
You communicate clearly and concisely in spoken conversation.
Keep responses brief (1-3 sentences) for comfortable voice interaction.
Be helpful, harmless, and honest.";

/// Voice agent configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Language model configuration
    pub llm: LlmConfig,

    /// Voice configuration
    pub voice: VoiceSettings,

    /// API keys
    pub api_keys: ApiKeys,

    /// Session tuning
    pub session: SessionSettings,
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// Max tokens per reply
    pub max_tokens: u32,

    /// Sampling temperature
    pub temperature: f32,

    /// System instruction
    pub system_prompt: String,
}

/// Where synthesized replies go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    /// Default output device
    #[default]
    Speaker,
    /// Files in the output directory
    File,
    /// Discard
    None,
}

impl std::str::FromStr for PlaybackMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "speaker" => Ok(Self::Speaker),
            "file" => Ok(Self::File),
            "none" | "off" => Ok(Self::None),
            other => Err(Error::Config(format!("unknown playback mode: {other}"))),
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceSettings {
    /// STT backend
    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    /// TTS backend
    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// BCP-47 language code
    pub language_code: String,

    /// Capture and STT sample rate
    pub sample_rate: u32,

    /// Reply destination
    pub playback: PlaybackMode,

    /// Directory for saved replies
    pub output_dir: PathBuf,
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// NVIDIA API catalog key (LLM)
    pub nvidia: Option<String>,

    /// `OpenAI` API key (Whisper, TTS, or LLM)
    pub openai: Option<String>,

    /// Deepgram API key (optional STT)
    pub deepgram: Option<String>,

    /// `ElevenLabs` API key (optional TTS)
    pub elevenlabs: Option<String>,
}

impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |k: &Option<String>| k.as_ref().map(|_| "<redacted>");
        f.debug_struct("ApiKeys")
            .field("nvidia", &mask(&self.nvidia))
            .field("openai", &mask(&self.openai))
            .field("deepgram", &mask(&self.deepgram))
            .field("elevenlabs", &mask(&self.elevenlabs))
            .finish()
    }
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub max_turns: usize,
    pub max_tokens: Option<usize>,
    pub retry_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub timeouts: CallTimeouts,
    /// Microphone recording window for `listen`
    pub listen_window: Duration,
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if a provider or playback name is unknown
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Load configuration using an explicit config file path
    ///
    /// # Errors
    ///
    /// Returns error if a provider or playback name is unknown
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let fc = file::load_config_from(path);
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Merge a parsed file with an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if a provider or playback name is unknown
    pub fn resolve(fc: AgentConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |key: &str| env(key).filter(|v| !v.is_empty());

        // API keys (env > toml > None)
        let api_keys = ApiKeys {
            nvidia: env("NVIDIA_API_KEY").or(fc.api_keys.nvidia),
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
        };

        let llm = LlmConfig {
            base_url: env("VOICE_AGENT_LLM_BASE_URL")
                .or(fc.llm.base_url)
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
            model: env("VOICE_AGENT_LLM_MODEL")
                .or_else(|| env("MODEL_NAME"))
                .or(fc.llm.model)
                .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
            max_tokens: fc.llm.max_tokens.unwrap_or(1024),
            temperature: fc.llm.temperature.unwrap_or(0.7),
            system_prompt: env("VOICE_AGENT_SYSTEM_PROMPT")
                .or(fc.llm.system_prompt)
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
        };

        let stt_provider: SttProvider = env("VOICE_AGENT_STT_PROVIDER")
            .or(fc.voice.stt_provider)
            .as_deref()
            .unwrap_or("whisper")
            .parse()?;
        let tts_provider: TtsProvider = env("VOICE_AGENT_TTS_PROVIDER")
            .or(fc.voice.tts_provider)
            .as_deref()
            .unwrap_or("openai")
            .parse()?;
        let playback: PlaybackMode = fc.voice.playback.as_deref().unwrap_or("speaker").parse()?;

        let voice = VoiceSettings {
            stt_provider,
            stt_model: env("VOICE_AGENT_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| match stt_provider {
                    SttProvider::Whisper => "whisper-1".to_string(),
                    SttProvider::Deepgram => "nova-2".to_string(),
                }),
            tts_provider,
            tts_model: env("VOICE_AGENT_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| tts_provider.default_model().to_string()),
            tts_voice: env("VOICE_NAME")
                .or(fc.voice.tts_voice)
                .unwrap_or_else(|| "alloy".to_string()),
            tts_speed: fc.voice.tts_speed.unwrap_or(1.0),
            language_code: fc.voice.language_code.unwrap_or_else(|| "en-US".to_string()),
            sample_rate: fc.voice.sample_rate.unwrap_or(crate::voice::SAMPLE_RATE),
            playback,
            output_dir: env("VOICE_AGENT_OUTPUT_DIR")
                .or(fc.voice.output_dir)
                .map_or_else(|| PathBuf::from("."), PathBuf::from),
        };

        let s = fc.session;
        let session = SessionSettings {
            max_turns: s.max_turns.unwrap_or(20),
            max_tokens: s.max_tokens,
            retry_attempts: s.retry_attempts.unwrap_or(3),
            retry_base_delay: Duration::from_millis(s.retry_base_delay_ms.unwrap_or(500)),
            retry_max_delay: Duration::from_millis(s.retry_max_delay_ms.unwrap_or(8000)),
            timeouts: CallTimeouts {
                transcribe: Duration::from_secs(s.transcribe_timeout_secs.unwrap_or(30)),
                generate: Duration::from_secs(s.generate_timeout_secs.unwrap_or(60)),
                synthesize: Duration::from_secs(s.synthesize_timeout_secs.unwrap_or(30)),
                playback: Duration::from_secs(s.playback_timeout_secs.unwrap_or(120)),
            },
            listen_window: Duration::from_secs(s.listen_secs.unwrap_or(5)),
        };

        Ok(Self {
            llm,
            voice,
            api_keys,
            session,
        })
    }

    /// Whether the model endpoint is NVIDIA's hosted API
    #[must_use]
    pub fn llm_is_nvidia(&self) -> bool {
        self.llm.base_url.contains("nvidia.com")
    }

    /// Key used for the language model
    ///
    /// The NVIDIA key always wins. The `OpenAI` key is only used for
    /// endpoints other than NVIDIA's, which would reject it anyway.
    #[must_use]
    pub fn llm_api_key(&self) -> Option<&str> {
        let fallback = if self.llm_is_nvidia() {
            None
        } else {
            self.api_keys.openai.as_deref()
        };
        self.api_keys.nvidia.as_deref().or(fallback)
    }

    /// Key for the configured STT provider
    #[must_use]
    pub fn stt_api_key(&self) -> Option<&str> {
        match self.voice.stt_provider {
            SttProvider::Whisper => self.api_keys.openai.as_deref(),
            SttProvider::Deepgram => self.api_keys.deepgram.as_deref(),
        }
    }

    /// Key for the configured TTS provider
    #[must_use]
    pub fn tts_api_key(&self) -> Option<&str> {
        match self.voice.tts_provider {
            TtsProvider::OpenAI => self.api_keys.openai.as_deref(),
            TtsProvider::ElevenLabs => self.api_keys.elevenlabs.as_deref(),
        }
    }

    /// Check that every required key is present
    ///
    /// # Errors
    ///
    /// Returns a single error listing every missing setting
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();

        if self.llm_api_key().is_none() {
            missing.push(if self.llm_is_nvidia() {
                "NVIDIA_API_KEY for the language model"
            } else {
                "NVIDIA_API_KEY or OPENAI_API_KEY for the language model"
            });
        }
        if self.llm.model.is_empty() {
            missing.push("VOICE_AGENT_LLM_MODEL");
        }
        if self.stt_api_key().is_none() {
            missing.push(match self.voice.stt_provider {
                SttProvider::Whisper => "OPENAI_API_KEY for Whisper STT",
                SttProvider::Deepgram => "DEEPGRAM_API_KEY for Deepgram STT",
            });
        }
        if self.tts_api_key().is_none() {
            missing.push(match self.voice.tts_provider {
                TtsProvider::OpenAI => "OPENAI_API_KEY for OpenAI TTS",
                TtsProvider::ElevenLabs => "ELEVENLABS_API_KEY for ElevenLabs TTS",
            });
        }

        if missing.is_empty() {
            return Ok(());
        }

        missing.dedup();
        for m in &missing {
            tracing::error!(setting = m, "missing configuration");
        }
        Err(Error::Config(format!("missing: {}", missing.join(", "))))
    }

    /// Resolve the settings the conversation session runs with
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            system_context: self.llm.system_prompt.clone(),
            history: HistoryLimit {
                max_turns: self.session.max_turns,
                max_tokens: self.session.max_tokens,
            },
            retry: RetryPolicy {
                max_attempts: self.session.retry_attempts,
                base_delay: self.session.retry_base_delay,
                max_delay: self.session.retry_max_delay,
                jitter: true,
            },
            timeouts: self.session.timeouts,
            sample_rate: self.voice.sample_rate,
            voice: VoiceConfig {
                voice: self.voice.tts_voice.clone(),
                speed: self.voice.tts_speed,
                language_code: self.voice.language_code.clone(),
            },
        }
    }
}
