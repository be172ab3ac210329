//! Incremental turn parser.
//!
//! Fragments from the backend are appended to a growing buffer. After each
//! append the parser tries to recognise complete turns at the front of the
//! buffer; recognised input is drained and everything else stays buffered
//! until more text arrives or the stream ends.
//!
//! Grammar (case-sensitive):
//!
//! ~~~text
//! dialogue := speaker (" " speaker)? (" "? "[" mood "]")? ":" text newline*
//! code     := "```" lang? newline body "```"? newline*
//!           | "[code]" body "[/code]"? newline*
//! ~~~
//!
//! Dialogue text ends at a code marker, a blank line, a line that opens the
//! next turn, or the end of the stream. A turn is only yielded once one of
//! those boundaries is in the buffer; a closing fence counts as a boundary.

use tracing::debug;

use super::{CodeTurn, DialogueTurn, Turn};
use crate::error::{ConversationError, Result};

const FENCE: &str = "```";
const BRACKET_OPEN: &str = "[code]";
const BRACKET_CLOSE: &str = "[/code]";

/// Maximum number of characters of unparseable input quoted in errors.
const SNIPPET_CHARS: usize = 32;

/// Streaming parser that turns text fragments into [`Turn`]s.
///
/// ```
/// use colloquy::turn::{Turn, TurnParser};
///
/// let mut parser = TurnParser::new();
/// assert_eq!(parser.feed("Alice [calm]: Hel").count(), 0);
/// assert_eq!(parser.feed("lo.\nBob: Hi").count(), 1);
/// let rest: Vec<Turn> = parser.finish().collect::<Result<_, _>>().unwrap();
/// assert_eq!(rest.len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct TurnParser {
    buffer: String,
    consumed: usize,
    stalled: bool,
    /// What the pending turn needs to progress, and how much of the buffer
    /// has already been searched for it.
    waiting: Option<(Wait, usize)>,
    /// Full parse attempts, for tests that bound re-scanning.
    #[cfg(test)]
    passes: usize,
}

impl TurnParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and iterate over the turns it completes.
    ///
    /// The iterator is lazy: turns not pulled stay buffered and are yielded
    /// by the next `feed` or by [`finish`](Self::finish).
    pub fn feed(&mut self, fragment: &str) -> Turns<'_> {
        self.buffer.push_str(fragment);
        Turns { parser: self }
    }

    /// Parse the rest of the buffer as the stream has ended.
    ///
    /// Yields the remaining turns, then a [`ConversationError::MalformedInput`]
    /// if any non-whitespace input could not be parsed.
    pub fn finish(&mut self) -> FinishedTurns<'_> {
        FinishedTurns {
            parser: self,
            done: false,
        }
    }

    /// Input received but not yet consumed by a turn.
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    /// Total bytes consumed so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Whether the front of the buffer can never become a valid turn.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Discard all state.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.consumed = 0;
        self.stalled = false;
        self.waiting = None;
    }

    fn step(&mut self, at_eof: bool) -> Step {
        let skip = leading_whitespace_len(&self.buffer);
        if skip > 0 {
            self.drain(skip);
        }
        if self.buffer.is_empty() {
            return Step::Exhausted;
        }

        // Text that cannot complete the pending turn is not re-parsed.
        if !at_eof
            && let Some((wait, searched)) = self.waiting
            && !wait.is_met(&self.buffer, searched)
        {
            self.waiting = Some((wait, self.buffer.len()));
            return Step::Pending;
        }

        #[cfg(test)]
        {
            self.passes += 1;
        }
        match parse_turn(&self.buffer, at_eof) {
            Parsed::Turn(turn, len) => {
                self.drain(len);
                Step::Turn(turn)
            }
            Parsed::Pending(wait) => {
                self.waiting = Some((wait, self.buffer.len()));
                Step::Pending
            }
            Parsed::Invalid => Step::Malformed(format!(
                "unrecognized turn start {:?}",
                snippet(&self.buffer)
            )),
        }
    }

    fn drain(&mut self, len: usize) {
        self.buffer.drain(..len);
        self.consumed += len;
        self.waiting = None;
    }
}

/// Turns completed by a [`TurnParser::feed`] call.
#[derive(Debug)]
pub struct Turns<'a> {
    parser: &'a mut TurnParser,
}

impl Iterator for Turns<'_> {
    type Item = Turn;

    fn next(&mut self) -> Option<Turn> {
        if self.parser.stalled {
            return None;
        }
        match self.parser.step(false) {
            Step::Turn(turn) => Some(turn),
            Step::Malformed(reason) => {
                debug!(%reason, "turn parser stalled");
                self.parser.stalled = true;
                None
            }
            Step::Pending | Step::Exhausted => None,
        }
    }
}

/// Turns produced by [`TurnParser::finish`].
#[derive(Debug)]
pub struct FinishedTurns<'a> {
    parser: &'a mut TurnParser,
    done: bool,
}

impl Iterator for FinishedTurns<'_> {
    type Item = Result<Turn>;

    fn next(&mut self) -> Option<Result<Turn>> {
        if self.done {
            return None;
        }
        match self.parser.step(true) {
            Step::Turn(turn) => Some(Ok(turn)),
            Step::Malformed(reason) => {
                self.done = true;
                Some(Err(ConversationError::MalformedInput(reason)))
            }
            Step::Pending | Step::Exhausted => {
                self.done = true;
                None
            }
        }
    }
}

enum Step {
    Turn(Turn),
    Pending,
    Malformed(String),
    Exhausted,
}

/// Outcome of recognising a construct at the front of some input.
enum Scan<T> {
    Match(T),
    NeedMore,
    NoMatch,
}

fn need_more<T>(at_eof: bool) -> Scan<T> {
    if at_eof { Scan::NoMatch } else { Scan::NeedMore }
}

/// Outcome of parsing one turn at the front of the buffer.
enum Parsed {
    /// A turn and the bytes it spans.
    Turn(Turn, usize),
    Pending(Wait),
    Invalid,
}

/// Input a pending turn needs before parsing it again can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wait {
    /// Anything may change the outcome.
    Any,
    /// Dialogue on an unterminated line: a newline or a code marker.
    LineEnd,
    /// Code body: the closing marker.
    Closer(&'static str),
}

impl Wait {
    /// Whether `buffer` beyond the first `searched` bytes holds the input
    /// this wait is for. Markers split across fragments are caught by
    /// re-reading a marker's length minus one before `searched`.
    fn is_met(self, buffer: &str, searched: usize) -> bool {
        match self {
            Self::Any => true,
            Self::LineEnd => {
                let fresh = tail_from(buffer, searched, BRACKET_OPEN.len() - 1);
                fresh.contains('\n') || find_code_marker(fresh).is_some()
            }
            Self::Closer(closer) => tail_from(buffer, searched, closer.len() - 1).contains(closer),
        }
    }
}

/// `s` from `overlap` bytes before `from`, widened to a char boundary.
fn tail_from(s: &str, from: usize, overlap: usize) -> &str {
    let mut start = from.min(s.len()).saturating_sub(overlap);
    while !s.is_char_boundary(start) {
        start -= 1;
    }
    &s[start..]
}

fn parse_turn(input: &str, at_eof: bool) -> Parsed {
    match scan_header(input, at_eof) {
        Scan::Match(header) => return parse_dialogue(input, header, at_eof),
        Scan::NeedMore => return Parsed::Pending(Wait::Any),
        Scan::NoMatch => {}
    }

    match scan_code_opener(input, at_eof) {
        Scan::Match(Opener::Fence) => parse_fenced(input, at_eof),
        Scan::Match(Opener::Bracket) => parse_bracketed(input, at_eof),
        Scan::NeedMore => Parsed::Pending(Wait::Any),
        Scan::NoMatch => Parsed::Invalid,
    }
}

// ── Dialogue ────────────────────────────────────────────────────────────

struct Header {
    speaker: String,
    mood: Option<String>,
    /// Bytes up to and including the colon.
    len: usize,
}

fn is_speaker_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, ':' | '[' | ']' | '`')
}

fn is_inline_space(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn scan_header(input: &str, at_eof: bool) -> Scan<Header> {
    let mut tokens: Vec<&str> = Vec::with_capacity(2);
    let mut chars = input.char_indices().peekable();

    loop {
        let start = match chars.peek() {
            Some(&(i, c)) if is_speaker_char(c) => i,
            Some(_) => return Scan::NoMatch,
            None => return need_more(at_eof),
        };
        let mut end = start;
        while let Some(&(i, c)) = chars.peek() {
            if !is_speaker_char(c) {
                break;
            }
            end = i + c.len_utf8();
            chars.next();
        }
        tokens.push(&input[start..end]);

        let mut spaced = false;
        while let Some(&(_, c)) = chars.peek() {
            if !is_inline_space(c) {
                break;
            }
            spaced = true;
            chars.next();
        }

        match chars.peek().copied() {
            None => return need_more(at_eof),
            Some((i, ':')) => return finish_header(input, &tokens, None, i, at_eof),
            Some((i, '[')) => return scan_mood(input, &tokens, i, at_eof),
            Some((_, c)) if spaced && tokens.len() < 2 && is_speaker_char(c) => {}
            Some(_) => return Scan::NoMatch,
        }
    }
}

fn scan_mood(input: &str, tokens: &[&str], open: usize, at_eof: bool) -> Scan<Header> {
    let rest = &input[open + 1..];
    let Some(close) = rest.find([']', '[', '\n']) else {
        return need_more(at_eof);
    };
    if !rest[close..].starts_with(']') {
        return Scan::NoMatch;
    }
    let mood = rest[..close].trim();

    let after = open + 1 + close + 1;
    let trimmed = input[after..].trim_start_matches(is_inline_space);
    let colon = input.len() - trimmed.len();
    match trimmed.chars().next() {
        None => need_more(at_eof),
        Some(':') => finish_header(input, tokens, Some(mood), colon, at_eof),
        Some(_) => Scan::NoMatch,
    }
}

fn finish_header(
    input: &str,
    tokens: &[&str],
    mood: Option<&str>,
    colon: usize,
    at_eof: bool,
) -> Scan<Header> {
    let len = colon + 1;
    // "http://..." is text, not a speaker called "http".
    match input[len..].chars().next() {
        None if !at_eof => return Scan::NeedMore,
        Some(c) if !c.is_whitespace() => return Scan::NoMatch,
        _ => {}
    }
    Scan::Match(Header {
        speaker: tokens.join(" "),
        mood: mood.filter(|m| !m.is_empty()).map(str::to_owned),
        len,
    })
}

enum Following {
    Continuation,
    BlankLine,
    NewTurn,
    End,
    NeedMore,
}

fn parse_dialogue(input: &str, header: Header, at_eof: bool) -> Parsed {
    let mut lines: Vec<&str> = Vec::new();
    let mut pos = header.len;

    loop {
        let rest = &input[pos..];
        let newline = rest.find('\n');
        let line = &rest[..newline.unwrap_or(rest.len())];

        if let Some(marker) = find_code_marker(line) {
            lines.push(&line[..marker]);
            return Parsed::Turn(dialogue(header, &lines), pos + marker);
        }

        let Some(newline) = newline else {
            if !at_eof {
                return Parsed::Pending(Wait::LineEnd);
            }
            lines.push(line);
            return Parsed::Turn(dialogue(header, &lines), input.len());
        };
        lines.push(line);

        let next = pos + newline + 1;
        match classify_following(&input[next..], at_eof) {
            Following::Continuation => pos = next,
            Following::BlankLine => {
                let end = next + leading_whitespace_len(&input[next..]);
                return Parsed::Turn(dialogue(header, &lines), end);
            }
            Following::NewTurn => return Parsed::Turn(dialogue(header, &lines), next),
            Following::End => return Parsed::Turn(dialogue(header, &lines), input.len()),
            Following::NeedMore => return Parsed::Pending(Wait::Any),
        }
    }
}

/// Decide whether the line starting at `rest` continues the current dialogue.
fn classify_following(rest: &str, at_eof: bool) -> Following {
    if rest.is_empty() {
        return if at_eof {
            Following::End
        } else {
            Following::NeedMore
        };
    }

    let line_end = rest.find('\n');
    let line = &rest[..line_end.unwrap_or(rest.len())];
    if line.trim().is_empty() {
        return match line_end {
            Some(_) => Following::BlankLine,
            None if at_eof => Following::End,
            None => Following::NeedMore,
        };
    }

    let content = rest.trim_start_matches(is_inline_space);
    if content.starts_with(FENCE) || content.starts_with(BRACKET_OPEN) {
        return Following::NewTurn;
    }
    if !at_eof && (FENCE.starts_with(content) || BRACKET_OPEN.starts_with(content)) {
        return Following::NeedMore;
    }

    match scan_header(content, at_eof) {
        Scan::Match(_) => Following::NewTurn,
        Scan::NeedMore => Following::NeedMore,
        Scan::NoMatch => Following::Continuation,
    }
}

fn dialogue(header: Header, lines: &[&str]) -> Turn {
    let text = lines
        .iter()
        .map(|line| line.trim_end_matches('\r'))
        .collect::<Vec<_>>()
        .join("\n");
    Turn::Dialogue(DialogueTurn {
        speaker: header.speaker,
        mood: header.mood,
        text: text.trim().to_owned(),
    })
}

fn find_code_marker(line: &str) -> Option<usize> {
    match (line.find(FENCE), line.find(BRACKET_OPEN)) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

// ── Code ────────────────────────────────────────────────────────────────

enum Opener {
    Fence,
    Bracket,
}

fn scan_code_opener(input: &str, at_eof: bool) -> Scan<Opener> {
    if input.starts_with(FENCE) {
        Scan::Match(Opener::Fence)
    } else if input.starts_with(BRACKET_OPEN) {
        Scan::Match(Opener::Bracket)
    } else if FENCE.starts_with(input) || BRACKET_OPEN.starts_with(input) {
        need_more(at_eof)
    } else {
        Scan::NoMatch
    }
}

fn parse_fenced(input: &str, at_eof: bool) -> Parsed {
    let open = FENCE.len();
    let rest = &input[open..];

    let Some(newline) = rest.find('\n') else {
        // Opener line still growing: either ```inline``` or a bare tag.
        if let Some(close) = rest.find(FENCE) {
            let end = open + close + FENCE.len();
            let turn = CodeTurn::new(rest[..close].trim());
            return Parsed::Turn(turn.into(), end + leading_whitespace_len(&input[end..]));
        }
        if !at_eof {
            return Parsed::Pending(Wait::Any);
        }
        let tail = rest.trim();
        let turn = if tail.is_empty() || tail.contains(char::is_whitespace) {
            CodeTurn::new(tail)
        } else {
            CodeTurn::new("").with_language(tail)
        };
        return Parsed::Turn(turn.into(), input.len());
    };

    let opener_line = &rest[..newline];
    if let Some(close) = opener_line.find(FENCE) {
        let end = open + close + FENCE.len();
        let turn = CodeTurn::new(opener_line[..close].trim());
        return Parsed::Turn(turn.into(), end + leading_whitespace_len(&input[end..]));
    }

    let tag = opener_line.trim();
    let (language, body_start) = if tag.is_empty() {
        (None, open + newline + 1)
    } else if !tag.contains(char::is_whitespace) {
        (Some(tag.to_owned()), open + newline + 1)
    } else {
        // No tag: the opener line is already code.
        let indent = opener_line.len() - opener_line.trim_start().len();
        (None, open + indent)
    };

    code_body(input, body_start, FENCE, language, at_eof)
}

fn parse_bracketed(input: &str, at_eof: bool) -> Parsed {
    code_body(input, BRACKET_OPEN.len(), BRACKET_CLOSE, None, at_eof)
}

fn code_body(
    input: &str,
    body_start: usize,
    closer: &'static str,
    language: Option<String>,
    at_eof: bool,
) -> Parsed {
    let body = &input[body_start..];
    let (code, end) = match body.find(closer) {
        Some(close) => {
            let end = body_start + close + closer.len();
            (&body[..close], end + leading_whitespace_len(&input[end..]))
        }
        None if at_eof => (body, input.len()),
        None => return Parsed::Pending(Wait::Closer(closer)),
    };

    let turn = CodeTurn {
        language,
        code: code.trim_matches(['\n', '\r']).to_owned(),
    };
    Parsed::Turn(turn.into(), end)
}

// ── Helpers ─────────────────────────────────────────────────────────────

fn leading_whitespace_len(s: &str) -> usize {
    s.len() - s.trim_start().len()
}

fn snippet(s: &str) -> String {
    s.chars().take(SNIPPET_CHARS).collect()
}
