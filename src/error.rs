//! Error types for the conversation core.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) accessible
//! via [`ConversationError::code()`]. Codes are part of the public contract;
//! match on them rather than on Display output.

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// The token stream ended without a valid turn, or began with an unrecognized marker.
    pub const MALFORMED_INPUT: &str = "MALFORMED_INPUT";

    /// The operation was superseded by newer input.
    pub const CANCELLED: &str = "CANCELLED";

    /// A code turn failed to execute.
    pub const EXECUTION_FAILED: &str = "EXECUTION_FAILED";

    /// The generation backend failed (transport or inference).
    pub const BACKEND_FAILED: &str = "BACKEND_FAILED";

    /// The speech reaction failed.
    pub const SPEECH_FAILED: &str = "SPEECH_FAILED";

    /// Invalid or missing configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Filesystem or process I/O failure.
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Top-level error type for the conversation core.
#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    /// The parser could not produce a turn from the remaining input.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The generation round was cancelled by newer input.
    #[error("cancelled")]
    Cancelled,

    /// Code execution failed.
    #[error("execution error: {0}")]
    Execution(String),

    /// Backend transport or inference error.
    #[error("backend error: {0}")]
    Backend(String),

    /// Speech synthesis error.
    #[error("speech error: {0}")]
    Speech(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversationError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedInput(_) => error_codes::MALFORMED_INPUT,
            Self::Cancelled => error_codes::CANCELLED,
            Self::Execution(_) => error_codes::EXECUTION_FAILED,
            Self::Backend(_) => error_codes::BACKEND_FAILED,
            Self::Speech(_) => error_codes::SPEECH_FAILED,
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Io(_) => error_codes::IO_ERROR,
        }
    }

    /// Whether this error is the cancellation control-flow signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the orchestrator recovers from this error without surfacing it.
    ///
    /// Malformed input is retried; execution failures are written into history.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedInput(_) | Self::Execution(_))
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ConversationError>;
