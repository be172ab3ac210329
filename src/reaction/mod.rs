//! Reactions invoked by the coordinator for each parsed turn.
//!
//! The coordinator never calls two reactions concurrently for the same
//! conversation, so implementations need not guard against re-entrancy.

pub mod shell;
pub mod speech;

pub use shell::ShellRunner;
pub use speech::{PronunciationSpeaker, SpeechOutcome, SpeechSink};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::turn::{CodeTurn, DialogueTurn};

/// Reaction to a dialogue turn.
#[async_trait]
pub trait Speaker: Send + Sync {
    /// Present `turn` to the user.
    ///
    /// Returns the turn to record in history, possibly edited (for example
    /// truncated to what was actually heard), or `None` to veto it.
    ///
    /// # Errors
    ///
    /// Returning [`ConversationError::Cancelled`](crate::ConversationError::Cancelled)
    /// stops the round; any other error aborts the submission.
    async fn speak(&self, turn: DialogueTurn, cancel: CancellationToken)
    -> Result<Option<DialogueTurn>>;
}

/// Reaction to a code turn.
#[async_trait]
pub trait CodeRunner: Send + Sync {
    /// Execute `turn` and return its textual output.
    ///
    /// # Errors
    ///
    /// [`ConversationError::Execution`](crate::ConversationError::Execution) is
    /// recorded in history as a fault; `Cancelled` stops the round; anything
    /// else aborts the submission.
    async fn run_code(&self, turn: &CodeTurn, cancel: CancellationToken) -> Result<String>;
}
