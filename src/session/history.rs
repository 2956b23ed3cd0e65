//! Bounded, append-only conversation history

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person talking to the assistant
    User,
    /// The assistant
    Assistant,
}

impl Role {
    /// Wire name used by chat-completions APIs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One utterance or reply in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    role: Role,
    text: String,
    timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a turn stamped with the current time
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create a user turn
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create an assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Rough token estimate (4 chars per token)
    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        self.text.len() / 4
    }
}

/// Bound applied to the history after every append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimit {
    /// Maximum number of turns kept
    pub max_turns: usize,
    /// Optional estimated token budget across all kept turns
    pub max_tokens: Option<usize>,
}

impl Default for HistoryLimit {
    fn default() -> Self {
        Self {
            max_turns: 20,
            max_tokens: None,
        }
    }
}

impl HistoryLimit {
    /// Limit by turn count only
    #[must_use]
    pub const fn turns(max_turns: usize) -> Self {
        Self {
            max_turns,
            max_tokens: None,
        }
    }
}

/// Chronological turns, evicted oldest-first when over the limit
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: VecDeque<Turn>,
    limit: HistoryLimit,
    estimated_tokens: usize,
}

impl ConversationHistory {
    #[must_use]
    pub fn new(limit: HistoryLimit) -> Self {
        Self {
            turns: VecDeque::new(),
            limit,
            estimated_tokens: 0,
        }
    }

    /// Append a turn and evict from the front until within the limit
    ///
    /// The newest turn is never evicted, even when it alone exceeds the
    /// token budget. Returns the number of evicted turns.
    pub fn push(&mut self, turn: Turn) -> usize {
        self.estimated_tokens += turn.estimated_tokens();
        self.turns.push_back(turn);

        let mut evicted = 0;
        while self.turns.len() > 1 && self.over_limit() {
            if let Some(old) = self.turns.pop_front() {
                self.estimated_tokens -= old.estimated_tokens();
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::debug!(
                evicted,
                kept = self.turns.len(),
                tokens = self.estimated_tokens,
                "trimmed conversation history"
            );
        }
        evicted
    }

    fn over_limit(&self) -> bool {
        self.turns.len() > self.limit.max_turns.max(1)
            || self
                .limit
                .max_tokens
                .is_some_and(|budget| self.estimated_tokens > budget)
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.estimated_tokens = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    #[must_use]
    pub const fn limit(&self) -> HistoryLimit {
        self.limit
    }

    /// Estimated tokens across the kept turns
    #[must_use]
    pub const fn estimated_tokens(&self) -> usize {
        self.estimated_tokens
    }

    /// Turns as one contiguous slice, oldest first
    pub fn as_slice(&mut self) -> &[Turn] {
        self.turns.make_contiguous()
    }

    /// Detached snapshot of the current turns
    #[must_use]
    pub fn view(&self) -> HistoryView {
        HistoryView {
            turns: self.turns.iter().cloned().collect(),
        }
    }
}

/// Read-only snapshot of the history
///
/// Iterating does not consume the view, so it can be walked any number of
/// times. Later changes to the session are not reflected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryView {
    turns: Vec<Turn>,
}

impl HistoryView {
    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Texts in order, mostly useful for assertions and logs
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.turns.iter().map(Turn::text)
    }
}

impl<'a> IntoIterator for &'a HistoryView {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}

impl fmt::Display for HistoryView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.turns.is_empty() {
            return f.write_str("(empty)");
        }

        for (i, turn) in self.turns.iter().enumerate() {
            if i > 0 {
                f.write_str("\n\n")?;
            }
            write!(f, "{}: {}", turn.role.as_str().to_uppercase(), turn.text)?;
        }
        Ok(())
    }
}
