//! TOML configuration file loading
//!
//! Supports `~/.config/voice-agent/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AgentConfigFile {
    /// Language model configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Conversation session tuning
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LlmFileConfig {
    /// OpenAI-compatible base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// System instruction for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct VoiceFileConfig {
    /// STT provider ("whisper" or "deepgram")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_provider: Option<String>,
    /// STT model (e.g. "whisper-1")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stt_model: Option<String>,
    /// TTS provider ("openai" or "elevenlabs")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_provider: Option<String>,
    /// TTS model (e.g. "tts-1")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_model: Option<String>,
    /// TTS voice identifier (e.g. "alloy")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_voice: Option<String>,
    /// TTS speed multiplier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts_speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    /// Where replies go: "speaker", "file" or "none"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback: Option<String>,
    /// Directory for saved replies
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ApiKeysFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nvidia: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deepgram: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevenlabs: Option<String>,
}

/// Session tuning
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SessionFileConfig {
    /// History bound in turns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<usize>,
    /// History bound in estimated tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_max_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcribe_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generate_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesize_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playback_timeout_secs: Option<u64>,
    /// Microphone recording window
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_secs: Option<u64>,
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the TOML is invalid
pub fn parse_config(content: &str) -> crate::Result<AgentConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Load the TOML config file from the standard path
///
/// Returns `AgentConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> AgentConfigFile {
    config_file_path().map_or_else(AgentConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from `path`, falling back to defaults
pub fn load_config_from(path: &std::path::Path) -> AgentConfigFile {
    if !path.exists() {
        return AgentConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                AgentConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            AgentConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/voice-agent/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("voice-agent").join("config.toml"))
}
