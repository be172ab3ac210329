//! Server-Sent Events (SSE) parser for streaming chat responses.
//!
//! Converts a byte stream into [`SseEvent`]s. Handles multi-line `data:`
//! fields, event types, comment lines, and the `[DONE]` sentinel.
//!
//! ~~~text
//! event: message
//! data: {"key": "value"}
//!
//! data: [DONE]
//! ~~~

/// A parsed Server-Sent Event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The event type (from `event:`). `None` if not specified.
    pub event_type: Option<String>,
    /// The data payload. Multiple `data:` lines are joined with `\n`.
    pub data: String,
}

impl SseEvent {
    /// Whether this event is the `[DONE]` sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }
}

#[derive(Debug, Default)]
struct EventBuilder {
    event_type: Option<String>,
    data_lines: Vec<String>,
}

impl EventBuilder {
    fn has_data(&self) -> bool {
        !self.data_lines.is_empty()
    }

    fn build(&mut self) -> SseEvent {
        let event = SseEvent {
            event_type: self.event_type.take(),
            data: self.data_lines.join("\n"),
        };
        self.data_lines.clear();
        event
    }

    /// Returns an event when an empty line closes one that carries data.
    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.has_data().then(|| self.build());
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some((field, value)) = parse_field(line) {
            match field {
                "data" => self.data_lines.push(value.to_owned()),
                "event" => self.event_type = Some(value.to_owned()),
                _ => {}
            }
        }
        None
    }
}

/// Split `field: value`, stripping one leading space from the value.
fn parse_field(line: &str) -> Option<(&str, &str)> {
    let (field, value) = line.split_once(':')?;
    Some((field, value.strip_prefix(' ').unwrap_or(value)))
}

/// Incremental SSE parser.
///
/// Bytes are buffered until a full line is available, so multi-byte UTF-8
/// sequences split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct SseLineParser {
    pending: Vec<u8>,
    builder: EventBuilder,
}

impl SseLineParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk of bytes, returning every event it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&raw[..newline]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.builder.process_line(line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn flush(&mut self) -> Option<SseEvent> {
        if !self.pending.is_empty() {
            let raw = std::mem::take(&mut self.pending);
            let line = String::from_utf8_lossy(&raw);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            self.builder.process_line(line);
        }
        self.builder.has_data().then(|| self.builder.build())
    }
}
