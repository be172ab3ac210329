//! Structured turns reconstructed from the backend's token stream.
//!
//! A [`Turn`] is either spoken dialogue or a code block requested for
//! execution. The `Display` impls produce the history exchange format:
//!
//! ~~~text
//! Alice [cheerful]: Good morning!
//! Bob: Morning.
//! ```python
//! print("hi")
//! ```
//! ~~~
//!
//! Other components re-parse or display history relying on this exact
//! punctuation, so it must stay stable.

pub mod parser;

pub use parser::TurnParser;

use std::fmt;

/// A line spoken by a named participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueTurn {
    /// Speaker name (one or two whitespace-free tokens).
    pub speaker: String,
    /// Optional emotional mood tag, without brackets.
    pub mood: Option<String>,
    /// Spoken text.
    pub text: String,
}

impl DialogueTurn {
    /// Create a dialogue turn without a mood.
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            mood: None,
            text: text.into(),
        }
    }

    /// Attach a mood tag.
    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }
}

impl fmt::Display for DialogueTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mood {
            Some(mood) => write!(f, "{} [{}]: {}", self.speaker, mood, self.text),
            None => write!(f, "{}: {}", self.speaker, self.text),
        }
    }
}

/// A fenced code block requested to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeTurn {
    /// Language tag from the fence opener, if any.
    pub language: Option<String>,
    /// Code body without the fences.
    pub code: String,
}

impl CodeTurn {
    /// Create a code turn without a language tag.
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            language: None,
            code: code.into(),
        }
    }

    /// Attach a language tag.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }
}

impl fmt::Display for CodeTurn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let language = self.language.as_deref().unwrap_or("");
        write!(f, "```{language}\n{}\n```", self.code)
    }
}

/// One structured unit of conversation output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    /// Spoken dialogue.
    Dialogue(DialogueTurn),
    /// Code requested for execution.
    Code(CodeTurn),
}

impl Turn {
    /// The variant tag, for logging and events.
    pub fn kind(&self) -> TurnKind {
        match self {
            Self::Dialogue(_) => TurnKind::Dialogue,
            Self::Code(_) => TurnKind::Code,
        }
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dialogue(turn) => turn.fmt(f),
            Self::Code(turn) => turn.fmt(f),
        }
    }
}

impl From<DialogueTurn> for Turn {
    fn from(turn: DialogueTurn) -> Self {
        Self::Dialogue(turn)
    }
}

impl From<CodeTurn> for Turn {
    fn from(turn: CodeTurn) -> Self {
        Self::Code(turn)
    }
}

/// Which kind of turn was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnKind {
    /// A [`DialogueTurn`].
    Dialogue,
    /// A [`CodeTurn`].
    Code,
}
