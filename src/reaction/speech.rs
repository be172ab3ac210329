//! Pronunciation-rewriting speaker.
//!
//! Dialogue text is rewritten for the speech engine ("Dr." → "Doctor"), but
//! history must record what the model wrote. When speech is interrupted part
//! way, the engine reports a position in the *rewritten* text; the
//! [`IndexMap`](crate::index_map::IndexMap) translates it back so the history
//! entry holds exactly the original text the user heard.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Speaker;
use crate::config::SpeechConfig;
use crate::error::Result;
use crate::index_map::{CompiledMapping, PatternMapping};
use crate::turn::DialogueTurn;

/// How a [`SpeechSink`] finished presenting text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutcome {
    /// All text was presented.
    Completed,
    /// Presentation stopped after this many chars of the text passed in.
    Interrupted { spoken_chars: usize },
}

/// The speech engine boundary (TTS, terminal printer, ...).
#[async_trait]
pub trait SpeechSink: Send + Sync {
    /// Present `text`, the rewritten form of `turn.text`.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationError::Speech`](crate::ConversationError::Speech)
    /// when the engine fails.
    async fn say(
        &self,
        turn: &DialogueTurn,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<SpeechOutcome>;
}

/// [`Speaker`] that rewrites text before speaking and truncates interrupted turns.
pub struct PronunciationSpeaker<S> {
    sink: S,
    mapping: CompiledMapping,
}

impl<S: SpeechSink> PronunciationSpeaker<S> {
    /// Wrap `sink` with the rewrites in `mapping`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping fails to compile.
    pub fn new(sink: S, mapping: &PatternMapping) -> Result<Self> {
        Ok(Self {
            sink,
            mapping: mapping.compile()?,
        })
    }

    /// Wrap `sink` with the pronunciations from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured rules fail to compile.
    pub fn from_config(sink: S, config: &SpeechConfig) -> Result<Self> {
        Self::new(sink, &config.pattern_mapping())
    }

    /// The wrapped sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[async_trait]
impl<S: SpeechSink> Speaker for PronunciationSpeaker<S> {
    async fn speak(
        &self,
        mut turn: DialogueTurn,
        cancel: CancellationToken,
    ) -> Result<Option<DialogueTurn>> {
        let (spoken, map) = self.mapping.replace(&turn.text);

        match self.sink.say(&turn, &spoken, cancel).await? {
            SpeechOutcome::Completed => Ok(Some(turn)),
            SpeechOutcome::Interrupted { spoken_chars } => {
                let heard = map
                    .map_output_index(spoken_chars)
                    .min(turn.text.chars().count());
                debug!(spoken_chars, heard, "speech interrupted");
                if heard == 0 {
                    return Ok(None);
                }
                turn.text = turn.text.chars().take(heard).collect();
                Ok(Some(turn))
            }
        }
    }
}
