//! Shared test utilities
//!
//! Scripted collaborators: each pops the next queued result per call and
//! falls back to a fixed success once the script runs out.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use voice_agent::session::{CallTimeouts, Collaborators, HistoryLimit, RetryPolicy};
use voice_agent::voice::samples_to_wav;
use voice_agent::{
    AudioSink, ConversationSession, LanguageModel, ServiceError, ServiceResult, SessionConfig,
    SpeechInput, SpeechOutput, Turn, VoiceConfig,
};

/// Queue of results handed out one per call
struct Script<T> {
    queue: Mutex<VecDeque<ServiceResult<T>>>,
    fallback: T,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl<T: Clone> Script<T> {
    fn new(fallback: T) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    async fn next(&self) -> ServiceResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let queued = self.queue.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Speech input returning scripted transcripts
pub struct ScriptedSpeechInput {
    script: Script<String>,
    rates: Mutex<Vec<u32>>,
}

impl ScriptedSpeechInput {
    pub fn new(results: impl IntoIterator<Item = ServiceResult<String>>) -> Arc<Self> {
        let script = Script::new("hello".to_string());
        script.queue.lock().unwrap().extend(results);
        Arc::new(Self {
            script,
            rates: Mutex::new(Vec::new()),
        })
    }

    /// Always transcribes to `text`
    pub fn saying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Script::new(text.to_string()),
            rates: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// Sample rates seen, in call order
    pub fn rates(&self) -> Vec<u32> {
        self.rates.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechInput for ScriptedSpeechInput {
    async fn transcribe(&self, _audio: &[u8], sample_rate: u32) -> ServiceResult<String> {
        self.rates.lock().unwrap().push(sample_rate);
        self.script.next().await
    }
}

/// Language model returning scripted replies and recording its inputs
pub struct ScriptedModel {
    script: Script<String>,
    seen: Mutex<Vec<(Vec<String>, String)>>,
}

impl ScriptedModel {
    pub fn new(results: impl IntoIterator<Item = ServiceResult<String>>) -> Arc<Self> {
        let script = Script::new("ok".to_string());
        script.queue.lock().unwrap().extend(results);
        Arc::new(Self {
            script,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Script::new(text.to_string()),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Replies only after `delay`
    pub fn slow(delay: Duration) -> Arc<Self> {
        let mut script = Script::new("eventually".to_string());
        script.delay = Some(delay);
        Arc::new(Self {
            script,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }

    /// History texts and system context passed to each call
    pub fn seen(&self) -> Vec<(Vec<String>, String)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, history: &[Turn], system_context: &str) -> ServiceResult<String> {
        let texts = history.iter().map(|t| t.text().to_string()).collect();
        self.seen
            .lock()
            .unwrap()
            .push((texts, system_context.to_string()));
        self.script.next().await
    }
}

/// Speech output returning scripted audio
pub struct ScriptedSpeechOutput {
    script: Script<Vec<u8>>,
}

impl ScriptedSpeechOutput {
    pub fn new(results: impl IntoIterator<Item = ServiceResult<Vec<u8>>>) -> Arc<Self> {
        let script = Script::new(b"ID3 audio".to_vec());
        script.queue.lock().unwrap().extend(results);
        Arc::new(Self { script })
    }

    pub fn ok() -> Arc<Self> {
        Self::new([])
    }

    /// Fails every call with `error`
    pub fn failing(error: ServiceError) -> Arc<Self> {
        Self::new(std::iter::repeat_n(Err(error), 16))
    }

    pub fn calls(&self) -> usize {
        self.script.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechOutput for ScriptedSpeechOutput {
    async fn synthesize(&self, _text: &str, _voice: &VoiceConfig) -> ServiceResult<Vec<u8>> {
        self.script.next().await
    }
}

/// Sink keeping every clip it receives
#[derive(Clone, Default)]
pub struct RecordingSink {
    played: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl RecordingSink {
    pub fn played(&self) -> Vec<Vec<u8>> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioSink for RecordingSink {
    async fn play(&mut self, audio: &[u8]) -> ServiceResult<()> {
        self.played.lock().unwrap().push(audio.to_vec());
        Ok(())
    }
}

/// Sink that never finishes playing, like a wedged output device
pub struct StalledSink;

#[async_trait]
impl AudioSink for StalledSink {
    async fn play(&mut self, _audio: &[u8]) -> ServiceResult<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

/// Session config with instant retries and short timeouts
pub fn fast_config(max_turns: usize) -> SessionConfig {
    SessionConfig {
        system_context: "You are a test assistant.".to_string(),
        history: HistoryLimit::turns(max_turns),
        retry: RetryPolicy::immediate(3),
        timeouts: CallTimeouts {
            transcribe: Duration::from_millis(200),
            generate: Duration::from_millis(200),
            synthesize: Duration::from_millis(200),
            playback: Duration::from_millis(200),
        },
        ..SessionConfig::default()
    }
}

/// Build a session from the given stubs
pub fn session_with(
    config: SessionConfig,
    stt: Arc<ScriptedSpeechInput>,
    llm: Arc<ScriptedModel>,
    tts: Arc<ScriptedSpeechOutput>,
    sink: RecordingSink,
) -> ConversationSession {
    session_with_sink(config, stt, llm, tts, Box::new(sink))
}

/// Build a session around any sink
pub fn session_with_sink(
    config: SessionConfig,
    stt: Arc<ScriptedSpeechInput>,
    llm: Arc<ScriptedModel>,
    tts: Arc<ScriptedSpeechOutput>,
    sink: Box<dyn AudioSink>,
) -> ConversationSession {
    ConversationSession::new(
        config,
        Collaborators {
            speech_input: stt,
            language_model: llm,
            speech_output: tts,
            sink,
        },
    )
}

/// Half a second of a 440Hz tone as WAV at `sample_rate`
pub fn tone_wav(sample_rate: u32) -> Vec<u8> {
    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate / 2)
        .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin() * 0.3)
        .collect();
    samples_to_wav(&samples, sample_rate).unwrap()
}
