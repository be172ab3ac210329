//! Literal pattern rewriting with a reversible index map.
//!
//! Text handed to a speech engine is often rewritten first (`"Dr."` becomes
//! `"Doctor"`, `"&"` becomes `"and"`). When the engine later reports how far
//! it got, that position is in rewritten coordinates. [`IndexMap`] translates
//! it back to the original text so the spoken prefix can be recorded
//! character-accurately.
//!
//! All indices are in `char`s, not bytes.
//!
//! # Examples
//!
//! ```
//! use colloquy::index_map::{Comparer, PatternMapping};
//!
//! let mapping = PatternMapping::new(Comparer::Ordinal)
//!     .with_rule("b", "xxx")
//!     .with_rule("efg", "y");
//! let (rewritten, map) = mapping.compile().unwrap().replace("abcdefgh");
//! assert_eq!(rewritten, "axxxcdyh");
//! assert_eq!(map.map_output_index(2), 1);
//! ```

use std::ops::Range;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{ConversationError, Result};

/// String comparison rule attached to a [`PatternMapping`].
///
/// Case sensitivity is inferred from the comparer. Culture-aware comparers
/// fold case with Unicode simple case folding; [`Comparer::Custom`] carries no
/// case information, so matching falls back to case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparer {
    /// Exact code-point comparison.
    #[default]
    Ordinal,
    /// Code-point comparison ignoring case.
    OrdinalIgnoreCase,
    /// Culture-aware comparison.
    Culture,
    /// Culture-aware comparison ignoring case.
    CultureIgnoreCase,
    /// Invariant-culture comparison.
    InvariantCulture,
    /// Invariant-culture comparison ignoring case.
    InvariantCultureIgnoreCase,
    /// A comparer whose case behaviour is unknown.
    Custom,
}

impl Comparer {
    /// Whether this comparer ignores case, or `None` when that cannot be inferred.
    pub fn ignores_case(self) -> Option<bool> {
        match self {
            Self::Ordinal | Self::Culture | Self::InvariantCulture => Some(false),
            Self::OrdinalIgnoreCase | Self::CultureIgnoreCase | Self::InvariantCultureIgnoreCase => {
                Some(true)
            }
            Self::Custom => None,
        }
    }
}

/// An ordered set of literal `pattern -> replacement` rules.
///
/// Rule order is precedence order: when two patterns could match at the
/// same position, the earlier rule wins regardless of length.
#[derive(Debug, Clone, Default)]
pub struct PatternMapping {
    rules: Vec<(String, String)>,
    comparer: Comparer,
}

impl PatternMapping {
    /// Create an empty mapping using `comparer` for matching.
    pub fn new(comparer: Comparer) -> Self {
        Self {
            rules: Vec::new(),
            comparer,
        }
    }

    /// Build a mapping from `(pattern, replacement)` pairs.
    pub fn from_pairs<I, P, R>(comparer: Comparer, pairs: I) -> Self
    where
        I: IntoIterator<Item = (P, R)>,
        P: Into<String>,
        R: Into<String>,
    {
        let mut mapping = Self::new(comparer);
        for (pattern, replacement) in pairs {
            mapping.push(pattern, replacement);
        }
        mapping
    }

    /// Append a rule (builder style).
    pub fn with_rule(mut self, pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        self.push(pattern, replacement);
        self
    }

    /// Append a rule.
    pub fn push(&mut self, pattern: impl Into<String>, replacement: impl Into<String>) {
        self.rules.push((pattern.into(), replacement.into()));
    }

    /// The comparer this mapping matches with.
    pub fn comparer(&self) -> Comparer {
        self.comparer
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the mapping has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Compile every rule into a single alternation.
    ///
    /// Empty patterns are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ConversationError::Config`] if the alternation exceeds the
    /// regex engine's size limits.
    pub fn compile(&self) -> Result<CompiledMapping> {
        let rules: Vec<&(String, String)> =
            self.rules.iter().filter(|(p, _)| !p.is_empty()).collect();

        if rules.is_empty() {
            return Ok(CompiledMapping {
                regex: None,
                replacements: Vec::new(),
            });
        }

        let alternation = rules
            .iter()
            .map(|(pattern, _)| format!("({})", regex::escape(pattern)))
            .collect::<Vec<_>>()
            .join("|");

        let case_insensitive = self.comparer.ignores_case().unwrap_or(false);
        let regex = RegexBuilder::new(&alternation)
            .case_insensitive(case_insensitive)
            .build()
            .map_err(|e| ConversationError::Config(format!("invalid pattern mapping: {e}")))?;

        Ok(CompiledMapping {
            regex: Some(regex),
            replacements: rules.into_iter().map(|(_, r)| r.clone()).collect(),
        })
    }
}

/// A [`PatternMapping`] compiled once for repeated use.
#[derive(Debug, Clone)]
pub struct CompiledMapping {
    regex: Option<Regex>,
    /// Replacement for capture group `i + 1`.
    replacements: Vec<String>,
}

impl CompiledMapping {
    /// Rewrite `text`, returning the rewritten string and its index map.
    pub fn replace(&self, text: &str) -> (String, IndexMap) {
        let Some(regex) = &self.regex else {
            return (text.to_owned(), IndexMap::default());
        };

        let mut out = String::with_capacity(text.len());
        let mut ranges = Vec::new();
        let mut last_byte = 0;
        let mut original_chars = 0;
        let mut rewritten_chars = 0;

        for caps in regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let Some(group) = (1..caps.len()).find(|&i| caps.get(i).is_some()) else {
                continue;
            };
            let Some(replacement) = self.replacements.get(group - 1) else {
                continue;
            };

            let gap = &text[last_byte..whole.start()];
            let gap_chars = gap.chars().count();
            out.push_str(gap);
            original_chars += gap_chars;
            rewritten_chars += gap_chars;

            let matched_chars = whole.as_str().chars().count();
            let replacement_chars = replacement.chars().count();
            if matched_chars != replacement_chars {
                ranges.push(RangeMapping {
                    original: original_chars..original_chars + matched_chars,
                    rewritten: rewritten_chars..rewritten_chars + replacement_chars,
                });
            }

            out.push_str(replacement);
            original_chars += matched_chars;
            rewritten_chars += replacement_chars;
            last_byte = whole.end();
        }

        out.push_str(&text[last_byte..]);
        (out, IndexMap { ranges })
    }
}

/// Rewrite `text` with `mapping` in one call.
///
/// # Errors
///
/// Returns an error if the mapping fails to compile.
pub fn replace(text: &str, mapping: &PatternMapping) -> Result<(String, IndexMap)> {
    Ok(mapping.compile()?.replace(text))
}

/// One length-changing rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeMapping {
    /// Span in the original text.
    pub original: Range<usize>,
    /// Span in the rewritten text.
    pub rewritten: Range<usize>,
}

/// Translates positions in rewritten text back to the original.
///
/// Only rewrites that changed length are recorded; ranges are non-overlapping
/// and sorted by rewritten start.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMap {
    ranges: Vec<RangeMapping>,
}

impl IndexMap {
    /// The recorded length-changing ranges.
    pub fn ranges(&self) -> &[RangeMapping] {
        &self.ranges
    }

    /// Whether every index maps to itself.
    pub fn is_identity(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Map a char index in the rewritten text to the original text.
    ///
    /// An index at the start of a replacement maps to the start of the
    /// replaced span. Indices inside a replacement collapse towards the end
    /// of the replaced span, never before its start. Outside replacements the
    /// cumulative length delta of the preceding range is applied.
    pub fn map_output_index(&self, index: usize) -> usize {
        let pos = self.ranges.partition_point(|r| r.rewritten.end <= index);

        if let Some(range) = self.ranges.get(pos)
            && range.rewritten.start <= index
        {
            if index == range.rewritten.start {
                return range.original.start;
            }
            let from_end = range.rewritten.end - index;
            return range
                .original
                .end
                .saturating_sub(from_end)
                .max(range.original.start);
        }

        match pos.checked_sub(1).and_then(|i| self.ranges.get(i)) {
            Some(prev) => prev.original.end + (index - prev.rewritten.end),
            None => index,
        }
    }
}
