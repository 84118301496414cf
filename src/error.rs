use crate::token::{Token, TokenKind};
use std::fmt;

#[derive(Debug)]
pub enum MusikaError {
    Syntax(SyntaxError),
    Context(ContextError),
    Serial(SerialError),
    Wav(WavError),
}

/// Lexical/grammatical mismatch: carries the offending token (kind and
/// literal content), its line, and the full expected-token set.
#[derive(Debug)]
pub struct SyntaxError {
    pub found: Token,
    pub expected: Vec<TokenKind>,
}

impl SyntaxError {
    pub fn new(found: Token, expected: Vec<TokenKind>) -> Self {
        SyntaxError { found, expected }
    }

    /// Format the expected set deterministically: one item is named
    /// bare, two as "A or B", three or more as an oxford-comma list
    /// ending "or X".
    fn expected_list(&self) -> String {
        let names: Vec<&str> = self.expected.iter().map(|k| k.display_name()).collect();
        match names.len() {
            0 => "nothing".to_string(),
            1 => names[0].to_string(),
            2 => format!("{} or {}", names[0], names[1]),
            n => {
                let head = names[..n - 1].join(", ");
                format!("{}, or {}", head, names[n - 1])
            }
        }
    }
}

/// Semantically invalid-but-grammatical input. Each variant carries a
/// fixed human-readable description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    DuplicateName(String),
    UnresolvedReference(String),
    NegativeOctave,
    NegativeRepeat,
    NothingToRepeat,
    SelfReference(String),
    CrossReference(String),
    UninitializedTime,
    ZeroTime,
    InvalidFilename(String),
}

/// Failures while decoding a serialized NoteSheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerialError {
    BadMagic,
    UnsupportedVersion(u16),
    Truncated,
    InvalidUtf8,
}

/// Failures while constructing the output waveform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WavError {
    /// Every voice in the composition is silent.
    SilentSong,
}

impl fmt::Display for MusikaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MusikaError::Syntax(e) => write!(f, "Syntax error: {e}"),
            MusikaError::Context(e) => write!(f, "Context error: {e}"),
            MusikaError::Serial(e) => write!(f, "Serialization error: {e}"),
            MusikaError::Wav(e) => write!(f, "WAV construction error: {e}"),
        }
    }
}

impl std::error::Error for MusikaError {}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line {}: expected {}, found {} (\"{}\")",
            self.found.line,
            self.expected_list(),
            self.found.kind.display_name(),
            self.found.content
        )
    }
}

impl std::error::Error for SyntaxError {}

impl fmt::Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextError::DuplicateName(name) => {
                write!(f, "the name \"{name}\" is already defined in this sheet")
            }
            ContextError::UnresolvedReference(name) => {
                write!(f, "\"{name}\" does not refer to anything usable here")
            }
            ContextError::NegativeOctave => {
                write!(f, "the octave may not be adjusted below zero")
            }
            ContextError::NegativeRepeat => {
                write!(f, "a repeat count may not be negative")
            }
            ContextError::NothingToRepeat => {
                write!(f, "there is no preceding note or chord to repeat")
            }
            ContextError::SelfReference(name) => {
                write!(f, "\"{name}\" may not accompany itself")
            }
            ContextError::CrossReference(name) => {
                write!(f, "\"{name}\" is already being compiled (cyclic accompaniment)")
            }
            ContextError::UninitializedTime => {
                write!(f, "the time signature must be set before it can be adjusted")
            }
            ContextError::ZeroTime => {
                write!(f, "time and tempo values must be nonzero")
            }
            ContextError::InvalidFilename(name) => {
                write!(f, "\"{name}\" is not a readable file")
            }
        }
    }
}

impl std::error::Error for ContextError {}

impl fmt::Display for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialError::BadMagic => write!(f, "not a compiled Musika sheet"),
            SerialError::UnsupportedVersion(v) => write!(f, "unsupported format version {v}"),
            SerialError::Truncated => write!(f, "unexpected end of data"),
            SerialError::InvalidUtf8 => write!(f, "string field is not valid UTF-8"),
        }
    }
}

impl std::error::Error for SerialError {}

impl fmt::Display for WavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WavError::SilentSong => {
                write!(f, "the composition contains no audible frequencies")
            }
        }
    }
}

impl std::error::Error for WavError {}

impl From<SyntaxError> for MusikaError {
    fn from(e: SyntaxError) -> Self {
        MusikaError::Syntax(e)
    }
}

impl From<ContextError> for MusikaError {
    fn from(e: ContextError) -> Self {
        MusikaError::Context(e)
    }
}

impl From<SerialError> for MusikaError {
    fn from(e: SerialError) -> Self {
        MusikaError::Serial(e)
    }
}

impl From<WavError> for MusikaError {
    fn from(e: WavError) -> Self {
        MusikaError::Wav(e)
    }
}
