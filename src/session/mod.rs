//! Conversation session
//!
//! Owns the history and turn sequencing for one user, and drives the three
//! collaborators strictly one call at a time:
//!
//! ```text
//! SpeechInput → session → LanguageModel → session → SpeechOutput → AudioSink
//! ```
//!
//! Transient collaborator failures are retried under [`RetryPolicy`]; a turn
//! is appended to history only after the call producing it fully succeeded.

mod history;
mod retry;
mod state;

use std::sync::Arc;
use std::time::Duration;

pub use history::{ConversationHistory, HistoryLimit, HistoryView, Role, Turn};
pub use retry::{RetryPolicy, call_with_retry, delay_for_attempt, is_recoverable};
pub use state::SessionState;

use crate::service::{
    AudioSink, LanguageModel, ServiceError, ServiceResult, SpeechInput, SpeechOutput, VoiceConfig,
};

/// Per-call ceilings for each collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallTimeouts {
    pub transcribe: Duration,
    pub generate: Duration,
    pub synthesize: Duration,
    /// Ceiling on handing one reply to the audio sink
    pub playback: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            transcribe: Duration::from_secs(30),
            generate: Duration::from_secs(60),
            synthesize: Duration::from_secs(30),
            playback: Duration::from_secs(120),
        }
    }
}

/// Resolved settings for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// System instruction sent with every generation
    pub system_context: String,
    /// History bound
    pub history: HistoryLimit,
    /// Retry policy for transient failures
    pub retry: RetryPolicy,
    /// Per-call timeouts
    pub timeouts: CallTimeouts,
    /// Sample rate the speech input expects
    pub sample_rate: u32,
    /// Voice used for synthesis
    pub voice: VoiceConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_context: String::new(),
            history: HistoryLimit::default(),
            retry: RetryPolicy::default(),
            timeouts: CallTimeouts::default(),
            sample_rate: crate::voice::SAMPLE_RATE,
            voice: VoiceConfig::default(),
        }
    }
}

/// Handles to the external services a session talks to
pub struct Collaborators {
    pub speech_input: Arc<dyn SpeechInput>,
    pub language_model: Arc<dyn LanguageModel>,
    pub speech_output: Arc<dyn SpeechOutput>,
    pub sink: Box<dyn AudioSink>,
}

/// Stateful orchestrator for one user's back-and-forth
pub struct ConversationSession {
    config: SessionConfig,
    speech_input: Arc<dyn SpeechInput>,
    language_model: Arc<dyn LanguageModel>,
    speech_output: Arc<dyn SpeechOutput>,
    sink: Box<dyn AudioSink>,
    history: ConversationHistory,
    state: SessionState,
    last_error: Option<ServiceError>,
}

impl ConversationSession {
    /// Create an idle session
    #[must_use]
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Self {
        let history = ConversationHistory::new(config.history);
        Self {
            config,
            speech_input: collaborators.speech_input,
            language_model: collaborators.language_model,
            speech_output: collaborators.speech_output,
            sink: collaborators.sink,
            history,
            state: SessionState::Idle,
            last_error: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Failure that moved the session into [`SessionState::Error`]
    #[must_use]
    pub const fn last_error(&self) -> Option<&ServiceError> {
        self.last_error.as_ref()
    }

    /// Begin the conversation with an empty history
    ///
    /// # Errors
    ///
    /// Returns a fatal failure unless the session is idle
    pub fn start(&mut self) -> ServiceResult<()> {
        self.require(SessionState::Idle, "start")?;
        self.history.clear();
        self.transition(SessionState::AwaitingInput);
        Ok(())
    }

    /// Transcribe an utterance and record it as a user turn
    ///
    /// # Errors
    ///
    /// Returns a fatal failure on empty audio, a wrong state, an empty
    /// transcript, a fatal speech-input failure, or once transient failures
    /// exhaust the retry policy. History is untouched on failure.
    pub async fn submit_utterance(&mut self, audio: &[u8], sample_rate: u32) -> ServiceResult<Turn> {
        self.require(SessionState::AwaitingInput, "submit_utterance")?;
        if audio.is_empty() {
            return Err(ServiceError::fatal("utterance audio is empty"));
        }

        self.transition(SessionState::Transcribing);
        tracing::debug!(audio_bytes = audio.len(), sample_rate, "transcribing utterance");

        let stt = Arc::clone(&self.speech_input);
        let outcome = call_with_retry(
            &self.config.retry,
            self.config.timeouts.transcribe,
            "speech input",
            || stt.transcribe(audio, sample_rate),
        )
        .await
        .and_then(|text| non_blank(text, "no speech recognized"));

        match outcome {
            Ok(text) => Ok(self.record_user(text)),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Record typed text as a user turn, skipping speech input
    ///
    /// # Errors
    ///
    /// Returns a fatal failure on blank text or a wrong state
    pub fn submit_text(&mut self, text: &str) -> ServiceResult<Turn> {
        self.require(SessionState::AwaitingInput, "submit_text")?;
        let text = non_blank(text.to_string(), "utterance text is empty")?;
        Ok(self.record_user(text))
    }

    /// Ask the language model for a reply to the current history
    ///
    /// On failure the session enters [`SessionState::Error`] without
    /// recording anything; [`Self::recover`] resumes with history intact.
    ///
    /// # Errors
    ///
    /// Returns a fatal failure outside [`SessionState::Generating`], on an
    /// empty reply, a fatal model failure, or exhausted retries
    pub async fn generate_reply(&mut self) -> ServiceResult<Turn> {
        self.require(SessionState::Generating, "generate_reply")?;

        let llm = Arc::clone(&self.language_model);
        let system_context = self.config.system_context.as_str();
        let retry = &self.config.retry;
        let timeout = self.config.timeouts.generate;
        let turns = self.history.as_slice();
        tracing::debug!(turns = turns.len(), "generating reply");

        let outcome = call_with_retry(retry, timeout, "language model", || {
            llm.generate(turns, system_context)
        })
        .await
        .and_then(|text| non_blank(text, "language model returned an empty reply"));

        match outcome {
            Ok(text) => {
                let turn = Turn::assistant(text);
                self.history.push(turn.clone());
                self.transition(SessionState::Synthesizing);
                tracing::info!(reply_chars = turn.text().len(), "assistant turn recorded");
                Ok(turn)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Synthesize an assistant turn and hand the audio to the sink
    ///
    /// Playback failures are reported but never break the conversation:
    /// once the state check passes, the session returns to
    /// [`SessionState::AwaitingInput`] whatever the outcome. A sink that
    /// does not finish within the playback timeout counts as a failure.
    ///
    /// # Errors
    ///
    /// Returns a fatal failure outside [`SessionState::Synthesizing`] or for
    /// a non-assistant or blank turn, and any synthesis or sink failure
    pub async fn synthesize_and_play(&mut self, turn: &Turn) -> ServiceResult<()> {
        self.require(SessionState::Synthesizing, "synthesize_and_play")?;

        let outcome = self.speak(turn).await;

        self.transition(SessionState::AwaitingInput);
        if let Err(e) = &outcome {
            tracing::warn!(error = %e, "playback failed; conversation continues");
        }
        outcome
    }

    async fn speak(&mut self, turn: &Turn) -> ServiceResult<()> {
        if turn.role() != Role::Assistant {
            return Err(ServiceError::fatal("only assistant turns can be spoken"));
        }
        if turn.text().trim().is_empty() {
            return Err(ServiceError::fatal("cannot speak an empty turn"));
        }

        let tts = Arc::clone(&self.speech_output);
        let voice = &self.config.voice;
        let audio = call_with_retry(
            &self.config.retry,
            self.config.timeouts.synthesize,
            "speech output",
            || tts.synthesize(turn.text(), voice),
        )
        .await?;

        let limit = self.config.timeouts.playback;
        match tokio::time::timeout(limit, self.sink.play(&audio)).await {
            Ok(played) => played,
            Err(_) => Err(ServiceError::transient(format!(
                "audio sink timed out after {}ms",
                limit.as_millis()
            ))),
        }
    }

    /// Clear history and wait for input, from any state except terminated
    pub fn reset(&mut self) {
        if self.state == SessionState::Terminated {
            tracing::debug!("reset ignored, session terminated");
            return;
        }

        self.history.clear();
        self.last_error = None;
        self.transition(SessionState::AwaitingInput);
        tracing::info!("conversation history cleared");
    }

    /// Leave the error state keeping history
    ///
    /// # Errors
    ///
    /// Returns a fatal failure unless the session is in the error state
    pub fn recover(&mut self) -> ServiceResult<()> {
        self.require(SessionState::Error, "recover")?;
        self.last_error = None;
        self.transition(SessionState::AwaitingInput);
        Ok(())
    }

    /// Abandon the in-flight step after its future was dropped
    ///
    /// Partial results are never recorded, so history is left as is.
    /// Returns whether a step was actually abandoned.
    pub fn cancel(&mut self) -> bool {
        if !self.state.is_busy() {
            return false;
        }

        tracing::info!(state = %self.state, "cancelled in-flight step");
        self.transition(SessionState::AwaitingInput);
        true
    }

    /// End the session; terminal
    pub fn quit(&mut self) {
        self.transition(SessionState::Terminated);
    }

    /// Snapshot of the history, oldest first
    #[must_use]
    pub fn history_view(&self) -> HistoryView {
        self.history.view()
    }

    /// Completed user/assistant pairs currently held
    #[must_use]
    pub fn exchange_count(&self) -> usize {
        self.history
            .view()
            .iter()
            .filter(|t| t.role() == Role::Assistant)
            .count()
    }

    fn record_user(&mut self, text: String) -> Turn {
        let turn = Turn::user(text);
        self.history.push(turn.clone());
        self.transition(SessionState::Generating);
        tracing::info!(transcript = %turn.text(), "user turn recorded");
        turn
    }

    fn require(&self, expected: SessionState, op: &str) -> ServiceResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ServiceError::Fatal(format!(
                "{op} requires state {expected}, session is {}",
                self.state
            )))
        }
    }

    fn fail(&mut self, error: ServiceError) -> ServiceError {
        tracing::error!(state = %self.state, error = %error, "collaborator call failed");
        self.last_error = Some(error.clone());
        self.transition(SessionState::Error);
        error
    }

    fn transition(&mut self, next: SessionState) {
        if self.state == SessionState::Terminated || self.state == next {
            return;
        }
        tracing::trace!(from = %self.state, to = %next, "session transition");
        self.state = next;
    }
}

fn non_blank(text: String, reason: &str) -> ServiceResult<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(ServiceError::fatal(reason))
    } else if trimmed.len() == text.len() {
        Ok(text)
    } else {
        Ok(trimmed.to_string())
    }
}
