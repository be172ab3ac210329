//! Generation backends.
//!
//! A [`Backend`] turns a history snapshot into a live stream of text
//! fragments. Fragment boundaries carry no meaning; the turn parser
//! reassembles structure from the concatenated text.

pub mod openai;
pub mod sse;

pub use openai::OpenAiBackend;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::pipeline::messages::Message;

/// A boxed stream of text fragments. An `Err` item ends the round.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Capability that produces streamed completions for a conversation.
///
/// Implementations must stop producing promptly once `cancel` fires and must
/// not block if the consumer drops the stream early.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short backend name for logs (e.g. `"openai"`).
    fn name(&self) -> &str;

    /// Start generating a reply to `history`.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationError::Backend`](crate::ConversationError::Backend)
    /// if the request cannot be started.
    async fn generate(&self, history: &[Message], cancel: CancellationToken)
    -> Result<FragmentStream>;
}
