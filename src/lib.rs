//! Colloquy: a streaming conversational core.
//!
//! A backend streams raw text; the turn parser reassembles it into dialogue
//! and code turns as fragments arrive; the coordinator dispatches each turn
//! to its reaction and keeps the conversation history consistent:
//! User input → Backend → Turn parser → Speaker / Code runner → History
//!
//! # Architecture
//!
//! - **Index map**: rewrites text for pronunciation and maps positions back
//! - **Turn parser**: incremental parser for `speaker [mood]: text` and fenced code
//! - **Coordinator**: owns history, runs rounds, handles pre-emption and retries
//! - **Backend**: OpenAI-compatible streaming chat completions over SSE
//! - **Reactions**: speech sinks and a shell code runner

pub mod backend;
pub mod config;
pub mod error;
pub mod index_map;
pub mod pipeline;
pub mod reaction;
pub mod runtime;
pub mod turn;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::ColloquyConfig;
pub use error::{ConversationError, Result};
pub use pipeline::coordinator::{ConversationCoordinator, ConversationState};
pub use pipeline::messages::{Message, Role};
pub use runtime::ConversationEvent;
pub use turn::{CodeTurn, DialogueTurn, Turn, TurnParser};
