//! Command-line conversation loop
//!
//! Drives a [`ConversationSession`] from typed lines, microphone windows, or
//! a list of WAV files. The transcript goes to the writer passed in; logs go
//! through `tracing` to stderr.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::service::ServiceError;
use crate::session::{ConversationSession, SessionState};
use crate::voice::{Microphone, inspect_wav};

const HELP: &str = "Commands:
  history   show the conversation so far
  reset     clear the conversation
  listen    record from the microphone and send it
  help      show this message
  quit      leave (also: exit, bye)
Anything else is sent to the assistant.";

/// One parsed line of REPL input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    History,
    Reset,
    Quit,
    Help,
    Listen,
    /// Free text to send as an utterance
    Say(String),
    /// Blank line
    Empty,
}

impl Command {
    /// Parse one input line; command words are case-insensitive
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed.to_lowercase().as_str() {
            "" => Self::Empty,
            "history" => Self::History,
            "reset" => Self::Reset,
            "quit" | "exit" | "bye" => Self::Quit,
            "help" | "?" => Self::Help,
            "listen" => Self::Listen,
            _ => Self::Say(trimmed.to_string()),
        }
    }
}

/// What the user contributed to an exchange
#[derive(Debug, Clone, Copy)]
pub enum UserInput<'a> {
    Text(&'a str),
    Audio { wav: &'a [u8], sample_rate: u32 },
}

/// How an exchange ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// A reply was recorded; `spoken` is false when synthesis or playback failed
    Completed { spoken: bool },
    /// Transcription or generation failed; the session was recovered
    Failed(ServiceError),
    /// Interrupted by the user
    Cancelled,
}

impl ExchangeOutcome {
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Totals from a batch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub successful: usize,
    pub failed: usize,
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} successful, {} failed", self.successful, self.failed)
    }
}

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Record one microphone window unless `cancel` resolves first
///
/// Returns `None` when cancelled; the partial recording is dropped.
pub async fn record_or_cancel(
    mic: &mut dyn Microphone,
    window: Duration,
    cancel: impl Future<Output = ()>,
) -> Option<crate::Result<Vec<u8>>> {
    tokio::select! {
        r = mic.record(window) => Some(r),
        () = cancel => None,
    }
}

/// Run one user → assistant exchange
///
/// Failures before a reply exists are printed and the session recovered so
/// the next input can proceed with history intact.
///
/// # Errors
///
/// Returns error only if writing the transcript fails
pub async fn run_exchange<W: Write>(
    session: &mut ConversationSession,
    out: &mut W,
    input: UserInput<'_>,
) -> anyhow::Result<ExchangeOutcome> {
    let submitted = match input {
        UserInput::Text(text) => Some(session.submit_text(text)),
        UserInput::Audio { wav, sample_rate } => tokio::select! {
            r = session.submit_utterance(wav, sample_rate) => Some(r),
            () = interrupted() => None,
        },
    };
    let user_turn = match submitted {
        None => return cancelled(session, out),
        Some(Err(e)) => return failed(session, out, e),
        Some(Ok(turn)) => turn,
    };
    if matches!(input, UserInput::Audio { .. }) {
        writeln!(out, "You: {}", user_turn.text())?;
    }

    let generated = tokio::select! {
        r = session.generate_reply() => Some(r),
        () = interrupted() => None,
    };
    let reply = match generated {
        None => return cancelled(session, out),
        Some(Err(e)) => return failed(session, out, e),
        Some(Ok(turn)) => turn,
    };
    writeln!(out, "Assistant: {}", reply.text())?;

    let played = tokio::select! {
        r = session.synthesize_and_play(&reply) => Some(r),
        () = interrupted() => None,
    };
    match played {
        None => {
            session.cancel();
            writeln!(out, "(playback interrupted)")?;
            Ok(ExchangeOutcome::Completed { spoken: false })
        }
        Some(Err(e)) => {
            writeln!(out, "(could not play reply: {e})")?;
            Ok(ExchangeOutcome::Completed { spoken: false })
        }
        Some(Ok(())) => Ok(ExchangeOutcome::Completed { spoken: true }),
    }
}

fn cancelled<W: Write>(
    session: &mut ConversationSession,
    out: &mut W,
) -> anyhow::Result<ExchangeOutcome> {
    session.cancel();
    writeln!(out, "(cancelled)")?;
    Ok(ExchangeOutcome::Cancelled)
}

fn failed<W: Write>(
    session: &mut ConversationSession,
    out: &mut W,
    error: ServiceError,
) -> anyhow::Result<ExchangeOutcome> {
    writeln!(out, "Error: {}", error.reason())?;
    // Precondition failures leave the state untouched
    if session.state() == SessionState::Error {
        session.recover()?;
    }
    Ok(ExchangeOutcome::Failed(error))
}

/// Interactive loop over lines from `input`
///
/// Returns once the user quits, input ends, or Ctrl-C arrives at the prompt.
///
/// # Errors
///
/// Returns error if reading input or writing the transcript fails
#[allow(clippy::future_not_send)]
pub async fn run_interactive<R, W>(
    session: &mut ConversationSession,
    input: R,
    out: &mut W,
    mut mic: Option<&mut dyn Microphone>,
    listen_window: Duration,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    if session.state() == SessionState::Idle {
        session.start()?;
    }
    writeln!(out, "Type a message, or `help` for commands.")?;

    let mut lines = input.lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            () = interrupted() => None,
        };
        let Some(line) = line else {
            writeln!(out)?;
            break;
        };

        match Command::parse(&line) {
            Command::Empty => {}
            Command::Help => writeln!(out, "{HELP}")?,
            Command::History => writeln!(out, "{}", session.history_view())?,
            Command::Reset => {
                session.reset();
                writeln!(out, "Conversation cleared.")?;
            }
            Command::Quit => break,
            Command::Listen => {
                let Some(mic) = mic.as_deref_mut() else {
                    writeln!(out, "No microphone available.")?;
                    continue;
                };
                writeln!(out, "Listening for {}s...", listen_window.as_secs())?;
                match record_or_cancel(mic, listen_window, interrupted()).await {
                    Some(Ok(wav)) => {
                        let sample_rate = mic.sample_rate();
                        run_exchange(session, out, UserInput::Audio { wav: &wav, sample_rate })
                            .await?;
                    }
                    Some(Err(e)) => writeln!(out, "Error: recording failed: {e}")?,
                    None => writeln!(out, "(cancelled)")?,
                }
            }
            Command::Say(text) => {
                run_exchange(session, out, UserInput::Text(&text)).await?;
            }
        }
    }

    session.quit();
    writeln!(out, "Goodbye!")?;
    tracing::info!(exchanges = session.exchange_count(), "conversation ended");
    Ok(())
}

/// Read a WAV file and forward it at its real sample rate
async fn exchange_file<W: Write>(
    session: &mut ConversationSession,
    out: &mut W,
    path: &Path,
) -> anyhow::Result<ExchangeOutcome> {
    let wav = match tokio::fs::read(path).await {
        Ok(wav) => wav,
        Err(e) => {
            let error = ServiceError::Fatal(format!("cannot read {}: {e}", path.display()));
            writeln!(out, "Error: {}", error.reason())?;
            return Ok(ExchangeOutcome::Failed(error));
        }
    };

    let info = match inspect_wav(&wav) {
        Ok(info) => info,
        Err(e) => {
            let error = ServiceError::Fatal(format!("{} is not a usable WAV file: {e}", path.display()));
            writeln!(out, "Error: {}", error.reason())?;
            return Ok(ExchangeOutcome::Failed(error));
        }
    };
    tracing::debug!(
        path = %path.display(),
        sample_rate = info.sample_rate,
        channels = info.channels,
        seconds = info.duration().as_secs_f32(),
        "processing audio file"
    );

    run_exchange(
        session,
        out,
        UserInput::Audio {
            wav: &wav,
            sample_rate: info.sample_rate,
        },
    )
    .await
}

/// Run one exchange per audio file, then print a summary
///
/// A Ctrl-C stops the batch; files not yet processed are not counted.
///
/// # Errors
///
/// Returns error if writing the transcript fails
pub async fn run_batch<W: Write>(
    session: &mut ConversationSession,
    files: &[PathBuf],
    out: &mut W,
) -> anyhow::Result<BatchSummary> {
    if session.state() == SessionState::Idle {
        session.start()?;
    }

    let mut summary = BatchSummary::default();
    for (i, path) in files.iter().enumerate() {
        writeln!(out, "[{}/{}] {}", i + 1, files.len(), path.display())?;

        match exchange_file(session, out, path).await? {
            ExchangeOutcome::Completed { .. } => summary.successful += 1,
            ExchangeOutcome::Failed(_) => summary.failed += 1,
            ExchangeOutcome::Cancelled => break,
        }
    }

    session.quit();
    writeln!(out, "{summary}")?;
    Ok(summary)
}
