use serde::{Deserialize, Serialize};

/// Every token kind the Musika lexer can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenKind {
    // Literals
    Number,
    StringLit,
    Id,
    /// Key signature name (e.g. `Cmaj`, `F#min`).
    Sign,
    /// Note name (e.g. `A`, `C#`, `B$$`, `_` for a rest).
    Note,

    // Keywords
    Accompany,
    Name,
    Title,
    Author,
    Coauthors,
    Key,
    Time,
    Tempo,
    Octave,
    Pattern,
    Chord,
    Is,
    Common,
    Cut,
    Repeat,
    Layer,

    // Punctuation
    LBracket,   // [
    RBracket,   // ]
    LBrace,     // {
    RBrace,     // }
    LParen,     // (
    RParen,     // )
    Colon,      // :
    Semicolon,  // ;
    Dot,        // .
    Comma,      // ,
    Apostrophe, // '
    Caret,      // ^
    Bang,       // !
    Greater,    // >
    Slash,      // /
    Equals,     // =
    Plus,       // +

    // Structural
    Newline,
    /// Section separator: newline, three dashes, newline.
    Break,
    /// A lexeme the lexer could not classify. The parser turns these
    /// into syntax errors with line context.
    Unknown,
    Eof,
}

impl TokenKind {
    /// Human-readable name used in syntax error messages.
    pub fn display_name(&self) -> &'static str {
        match self {
            TokenKind::Number => "a number",
            TokenKind::StringLit => "a string",
            TokenKind::Id => "an identifier",
            TokenKind::Sign => "a key signature",
            TokenKind::Note => "a note",
            TokenKind::Accompany => "\"accompany\"",
            TokenKind::Name => "\"name\"",
            TokenKind::Title => "\"title\"",
            TokenKind::Author => "\"author\"",
            TokenKind::Coauthors => "\"coauthors\"",
            TokenKind::Key => "\"key\"",
            TokenKind::Time => "\"time\"",
            TokenKind::Tempo => "\"tempo\"",
            TokenKind::Octave => "\"octave\"",
            TokenKind::Pattern => "\"pattern\"",
            TokenKind::Chord => "\"chord\"",
            TokenKind::Is => "\"is\"",
            TokenKind::Common => "\"common\"",
            TokenKind::Cut => "\"cut\"",
            TokenKind::Repeat => "\"repeat\"",
            TokenKind::Layer => "\"layer\"",
            TokenKind::LBracket => "\"[\"",
            TokenKind::RBracket => "\"]\"",
            TokenKind::LBrace => "\"{\"",
            TokenKind::RBrace => "\"}\"",
            TokenKind::LParen => "\"(\"",
            TokenKind::RParen => "\")\"",
            TokenKind::Colon => "\":\"",
            TokenKind::Semicolon => "\";\"",
            TokenKind::Dot => "\".\"",
            TokenKind::Comma => "\",\"",
            TokenKind::Apostrophe => "\"'\"",
            TokenKind::Caret => "\"^\"",
            TokenKind::Bang => "\"!\"",
            TokenKind::Greater => "\">\"",
            TokenKind::Slash => "\"/\"",
            TokenKind::Equals => "\"=\"",
            TokenKind::Plus => "\"+\"",
            TokenKind::Newline => "a newline",
            TokenKind::Break => "a section break",
            TokenKind::Unknown => "an unknown token",
            TokenKind::Eof => "end of file",
        }
    }
}

/// An immutable (content, kind, line) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub content: String,
    pub kind: TokenKind,
    pub line: usize,
}

impl Token {
    pub fn new(content: impl Into<String>, kind: TokenKind, line: usize) -> Self {
        Token {
            content: content.into(),
            kind,
            line,
        }
    }
}
