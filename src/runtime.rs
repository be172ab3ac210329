//! Runtime events emitted by the conversation coordinator for UI and observability.
//!
//! Events are lightweight and sent on a broadcast channel; a slow or absent
//! subscriber never blocks a generation round.

use crate::turn::TurnKind;

/// Events that describe what the coordinator is doing "right now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// A backend stream was opened for a round.
    RoundStarted {
        /// Round number within the current submission, starting at 1.
        round: u32,
        /// Attempt number for this round, starting at 1.
        attempt: u32,
    },
    /// A parsed turn was handed to its reaction.
    TurnDispatched { round: u32, kind: TurnKind },
    /// The speaker declined to commit a dialogue turn to history.
    DialogueVetoed { round: u32 },
    /// A code turn finished executing.
    CodeExecuted { round: u32, success: bool },
    /// A round's output was malformed; its history entries were rolled back.
    RoundDiscarded {
        round: u32,
        attempt: u32,
        reason: String,
    },
    /// A round consumed its whole stream.
    RoundFinished {
        round: u32,
        /// Turns dispatched during the round.
        turns: usize,
        /// Whether a code turn requested another round.
        needs_followup: bool,
    },
    /// A round stopped because newer input superseded it.
    RoundCancelled { round: u32 },
    /// Whether the assistant is currently generating.
    Generating { active: bool },
}
