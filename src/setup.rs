//! Interactive first-run setup wizard (`voice-agent setup`)

use std::path::{Path, PathBuf};

use dialoguer::{Input, Select};

use crate::config::file::{
    AgentConfigFile, ApiKeysFileConfig, LlmFileConfig, VoiceFileConfig, config_file_path,
    load_config_file,
};
use crate::config::{DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL};

/// Run the interactive setup wizard
///
/// # Errors
///
/// Returns error if user input fails or config cannot be written
pub fn run_setup() -> anyhow::Result<()> {
    println!("Voice Agent Setup\n");

    let existing = load_config_file();
    let config_path = config_file_path()
        .unwrap_or_else(|| PathBuf::from("~/.config/voice-agent/config.toml"));

    if config_path.exists() {
        println!("Existing config found at {}\n", config_path.display());
    }

    // 1. Language model endpoint
    let base_url: String = Input::new()
        .with_prompt("LLM base URL (OpenAI-compatible)")
        .default(
            existing
                .llm
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_LLM_BASE_URL.to_string()),
        )
        .interact_text()?;

    let model: String = Input::new()
        .with_prompt("LLM model")
        .default(
            existing
                .llm
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_LLM_MODEL.to_string()),
        )
        .interact_text()?;

    let mut api_keys = ApiKeysFileConfig {
        nvidia: existing.api_keys.nvidia.clone(),
        openai: existing.api_keys.openai.clone(),
        deepgram: existing.api_keys.deepgram.clone(),
        elevenlabs: existing.api_keys.elevenlabs.clone(),
    };

    if base_url.contains("nvidia.com") {
        api_keys.nvidia = ask_key("NVIDIA", "NVIDIA_API_KEY", api_keys.nvidia.take())?;
    }

    // 2. Speech providers
    let stt_providers = ["whisper", "deepgram"];
    let stt_idx = Select::new()
        .with_prompt("Speech-to-text provider")
        .items(&stt_providers)
        .default(position_of(&stt_providers, existing.voice.stt_provider.as_deref()))
        .interact()?;

    let tts_providers = ["openai", "elevenlabs"];
    let tts_idx = Select::new()
        .with_prompt("Text-to-speech provider")
        .items(&tts_providers)
        .default(position_of(&tts_providers, existing.voice.tts_provider.as_deref()))
        .interact()?;

    let needs_openai =
        stt_idx == 0 || tts_idx == 0 || (!base_url.contains("nvidia.com") && api_keys.nvidia.is_none());
    if needs_openai {
        api_keys.openai = ask_key("OpenAI", "OPENAI_API_KEY", api_keys.openai.take())?;
    }
    if stt_idx == 1 {
        api_keys.deepgram = ask_key("Deepgram", "DEEPGRAM_API_KEY", api_keys.deepgram.take())?;
    }
    if tts_idx == 1 {
        api_keys.elevenlabs =
            ask_key("ElevenLabs", "ELEVENLABS_API_KEY", api_keys.elevenlabs.take())?;
    }

    let tts_voice: String = Input::new()
        .with_prompt("TTS voice")
        .default(
            existing
                .voice
                .tts_voice
                .clone()
                .unwrap_or_else(|| "alloy".to_string()),
        )
        .interact_text()?;

    // 3. Playback
    let playback_modes = ["speaker", "file", "none"];
    let playback_idx = Select::new()
        .with_prompt("Where should replies be played")
        .items(&playback_modes)
        .default(position_of(&playback_modes, existing.voice.playback.as_deref()))
        .interact()?;

    let config_file = AgentConfigFile {
        llm: LlmFileConfig {
            base_url: Some(base_url),
            model: Some(model),
            ..existing.llm
        },
        voice: VoiceFileConfig {
            stt_provider: Some(stt_providers[stt_idx].to_string()),
            tts_provider: Some(tts_providers[tts_idx].to_string()),
            tts_voice: Some(tts_voice),
            playback: Some(playback_modes[playback_idx].to_string()),
            ..existing.voice
        },
        api_keys,
        session: existing.session,
    };

    write_config(&config_path, &config_file)?;
    println!("\nConfig written to {}", config_path.display());
    println!("\nSetup complete! Run `voice-agent -v` to start talking.");

    Ok(())
}

/// Prompt for an API key, keeping the current one on blank input
fn ask_key(service: &str, env_hint: &str, existing: Option<String>) -> anyhow::Result<Option<String>> {
    let prompt = existing.as_deref().map_or_else(
        || format!("{service} API key ({env_hint})"),
        |k| {
            format!(
                "{service} API key (current: {}, leave blank to keep)",
                mask_key(k)
            )
        },
    );

    let input: String = Input::new()
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text()?;

    Ok(if input.trim().is_empty() {
        existing
    } else {
        Some(input.trim().to_string())
    })
}

/// Show only the ends of a key
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}...{tail}")
    } else {
        "****".to_string()
    }
}

fn position_of(options: &[&str], current: Option<&str>) -> usize {
    current
        .and_then(|c| options.iter().position(|o| o.eq_ignore_ascii_case(c)))
        .unwrap_or(0)
}

/// Serialize and write the config file
fn write_config(path: &Path, config: &AgentConfigFile) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, toml::to_string_pretty(config)?)?;
    Ok(())
}
