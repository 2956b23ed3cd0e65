//! Session lifecycle states

use std::fmt;

/// State of a conversation session
///
/// ```text
/// Idle ─start→ AwaitingInput ─submit→ Transcribing → Generating → Synthesizing ─┐
///                    ↑                                                          │
///                    └──────────────────────────────────────────────────────────┘
/// any step ─failure→ Error ─recover/reset→ AwaitingInput
/// any state ─quit→ Terminated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not started
    Idle,
    /// Waiting for the next utterance
    AwaitingInput,
    /// Speech input call in flight
    Transcribing,
    /// User turn recorded, reply pending
    Generating,
    /// Assistant turn recorded, audio pending
    Synthesizing,
    /// A collaborator failed; waiting for recover or reset
    Error,
    /// Quit; absorbing
    Terminated,
}

impl SessionState {
    /// Whether a collaborator call may currently be in flight
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Transcribing | Self::Generating | Self::Synthesizing)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingInput => "awaiting_input",
            Self::Transcribing => "transcribing",
            Self::Generating => "generating",
            Self::Synthesizing => "synthesizing",
            Self::Error => "error",
            Self::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
