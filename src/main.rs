use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use voice_agent::config::PlaybackMode;
use voice_agent::session::Collaborators;
use voice_agent::voice::{
    AudioCapture, AudioPlayback, FileSink, InputLevel, Microphone, NullSink, SAMPLE_RATE,
    SpeechToText, TextToSpeech, samples_to_wav,
};
use voice_agent::{AudioSink, ChatModel, Config, ConversationSession, LanguageModel, SpeechOutput};

/// Voice Agent - talk to a language model with your voice
#[derive(Parser)]
#[command(name = "voice-agent", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Process WAV files instead of running interactively
    #[arg(long, num_args = 1..)]
    audio: Vec<PathBuf>,

    /// Skip the language model reachability check at startup
    #[arg(long)]
    no_probe: bool,

    /// Where replies go: speaker, file or none
    #[arg(long, env = "VOICE_AGENT_PLAYBACK")]
    playback: Option<String>,

    /// Directory for saved replies (implies file playback)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Print the resolved configuration with keys redacted
    Config,
    /// Interactive first-run setup
    Setup,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,voice_agent=info",
        1 => "info,voice_agent=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&text).await,
            Command::Config => show_config(),
            Command::Setup => voice_agent::setup::run_setup(),
        };
    }

    let mut config = Config::load()?;
    if let Some(mode) = &cli.playback {
        config.voice.playback = mode.parse()?;
    }
    if let Some(dir) = cli.output_dir {
        config.voice.output_dir = dir;
        config.voice.playback = PlaybackMode::File;
    }
    tracing::debug!(?config, "loaded configuration");
    config.validate()?;

    let language_model = Arc::new(
        ChatModel::new(
            &config.llm.base_url,
            config.llm_api_key().unwrap_or_default().to_string(),
            config.llm.model.clone(),
        )?
        .with_sampling(config.llm.max_tokens, config.llm.temperature),
    );

    if cli.no_probe {
        tracing::debug!("skipping language model probe");
    } else {
        language_model
            .probe()
            .await
            .map_err(|e| anyhow::anyhow!("language model unreachable: {e}"))?;
        tracing::info!(model = %config.llm.model, "language model reachable");
    }

    let speech_input = Arc::new(
        SpeechToText::new(
            config.voice.stt_provider,
            config.stt_api_key().unwrap_or_default().to_string(),
            config.voice.stt_model.clone(),
        )?
        .with_sample_rate(config.voice.sample_rate),
    );
    let speech_output = Arc::new(TextToSpeech::new(
        config.voice.tts_provider,
        config.tts_api_key().unwrap_or_default().to_string(),
        config.voice.tts_model.clone(),
    )?);

    let sink: Box<dyn AudioSink> = match config.voice.playback {
        PlaybackMode::Speaker => Box::new(AudioPlayback::new()?),
        PlaybackMode::File => Box::new(FileSink::new(config.voice.output_dir.clone())),
        PlaybackMode::None => Box::new(NullSink),
    };

    let mut session = ConversationSession::new(
        config.session_config(),
        Collaborators {
            speech_input,
            language_model,
            speech_output,
            sink,
        },
    );

    let mut stdout = std::io::stdout();
    if !cli.audio.is_empty() {
        tracing::info!(files = cli.audio.len(), "running batch");
        voice_agent::cli::run_batch(&mut session, &cli.audio, &mut stdout).await?;
        return Ok(());
    }

    // Keyboard-only mode when there is no input device
    let mut capture = match AudioCapture::new() {
        Ok(capture) => Some(capture),
        Err(e) => {
            tracing::warn!(error = %e, "microphone unavailable, `listen` disabled");
            None
        }
    };

    tracing::info!(model = %config.llm.model, "voice agent ready");
    voice_agent::cli::run_interactive(
        &mut session,
        BufReader::new(tokio::io::stdin()),
        &mut stdout,
        capture.as_mut().map(|c| c as &mut dyn Microphone),
        config.session.listen_window,
    )
    .await
}

/// Print the resolved configuration
fn show_config() -> anyhow::Result<()> {
    let config = Config::load()?;
    println!("{config:#?}");

    if let Some(path) = voice_agent::config::file::config_file_path() {
        println!("\nConfig file: {}", path.display());
    }
    if let Err(e) = config.validate() {
        println!("\nIncomplete: {e}");
    }
    Ok(())
}

/// Show the input level once per second for `duration` seconds
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    let capture = AudioCapture::new()?;
    println!(
        "Recording from \"{}\" for {duration}s at {} Hz; say something.",
        capture.device_name(),
        SAMPLE_RATE
    );

    let mut heard = false;
    for second in 1..=duration {
        let level = InputLevel::measure(&capture.capture(Duration::from_secs(1)).await?);
        heard |= !level.is_silent();
        println!(
            "{second:>3}s  rms {:.4}  peak {:.4}  {}",
            level.rms,
            level.peak,
            level.meter(40)
        );
    }

    if heard {
        println!("Microphone OK.");
    } else {
        println!("Only silence was picked up; `listen` would send empty speech.");
    }
    Ok(())
}

/// Play a two second tone through the same path replies take
async fn test_speaker() -> anyhow::Result<()> {
    let mut speaker = AudioPlayback::new()?;

    #[allow(clippy::cast_precision_loss)]
    let tone: Vec<f32> = (0..SAMPLE_RATE * 2)
        .map(|i| (std::f32::consts::TAU * 440.0 * i as f32 / SAMPLE_RATE as f32).sin() * 0.3)
        .collect();
    let wav = samples_to_wav(&tone, SAMPLE_RATE)?;

    println!("Playing a 440 Hz tone for 2s...");
    speaker.play(&wav).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    println!("Done. If nothing was audible, replies will not be either; try --playback file.");
    Ok(())
}

/// Synthesize `text` with the configured TTS provider and play it
async fn test_tts(text: &str) -> anyhow::Result<()> {
    let config = Config::load()?;
    let tts = TextToSpeech::new(
        config.voice.tts_provider,
        config.tts_api_key().unwrap_or_default().to_string(),
        config.voice.tts_model.clone(),
    )?;
    let voice = config.session_config().voice;

    let audio = tts
        .synthesize(text, &voice)
        .await
        .map_err(|e| anyhow::anyhow!("speech output failed: {e}"))?;
    println!(
        "{:?} voice \"{}\" returned {} bytes; playing.",
        config.voice.tts_provider,
        voice.voice,
        audio.len()
    );

    AudioPlayback::new()?.play_encoded(&audio).await?;
    Ok(())
}
