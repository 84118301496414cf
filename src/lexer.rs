//! Pull-based lexer over a Musika character stream.
//!
//! Tokens are produced on demand through `get_token` and can be pushed
//! back with `put_token` (a LIFO stack, so the most recently put token
//! is read first). The lexer never fails: malformed lexemes come out as
//! `Unknown` tokens for the parser to reject with line context.

use std::collections::HashMap;

use crate::input::{InputBuffer, EOF_CHAR};
use crate::token::{Token, TokenKind};

/// Look up a keyword, or `None` if the word is an ordinary identifier.
fn keyword_kind(word: &str) -> Option<TokenKind> {
    let kind = match word {
        "accompany" => TokenKind::Accompany,
        "name" => TokenKind::Name,
        "title" => TokenKind::Title,
        "author" => TokenKind::Author,
        "coauthors" => TokenKind::Coauthors,
        "key" => TokenKind::Key,
        "time" => TokenKind::Time,
        "tempo" => TokenKind::Tempo,
        "octave" => TokenKind::Octave,
        "pattern" => TokenKind::Pattern,
        "chord" => TokenKind::Chord,
        "is" => TokenKind::Is,
        "common" => TokenKind::Common,
        "cut" => TokenKind::Cut,
        "repeat" => TokenKind::Repeat,
        "layer" => TokenKind::Layer,
        _ => return None,
    };
    Some(kind)
}

/// Key signature table: name to signed count of sharps (positive) or
/// flats (negative).
pub fn sign_offset(name: &str) -> Option<i32> {
    let offset = match name {
        "Cmaj" | "Amin" => 0,
        "Gmaj" | "Emin" => 1,
        "Dmaj" | "Bmin" => 2,
        "Amaj" | "F#min" => 3,
        "Emaj" | "C#min" => 4,
        "Bmaj" | "G#min" => 5,
        "F#maj" | "D#min" => 6,
        "C#maj" | "A#min" => 7,
        "Fmaj" | "Dmin" => -1,
        "B$maj" | "Gmin" => -2,
        "E$maj" | "Cmin" => -3,
        "A$maj" | "Fmin" => -4,
        "D$maj" | "B$min" => -5,
        "G$maj" | "E$min" => -6,
        "C$maj" | "A$min" => -7,
        _ => return None,
    };
    Some(offset)
}

/// True for note names: a letter A-G plus an optional accidental suffix
/// (`#` sharp, `$` flat, `*` double sharp, `$$` double flat), or the
/// rest symbol `_`.
pub fn is_note_name(word: &str) -> bool {
    if word == "_" {
        return true;
    }
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if ('A'..='G').contains(&c) => {}
        _ => return false,
    }
    matches!(chars.as_str(), "" | "#" | "$" | "*" | "$$")
}

fn is_word_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '$' | '#' | '*')
}

pub struct Lexer {
    input: InputBuffer,
    pushback: Vec<Token>,
    /// Side tables recording comment text by start offset. Telemetry
    /// only; nothing in the grammar consumes these.
    pub line_comments: HashMap<usize, String>,
    pub block_comments: HashMap<usize, String>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            input: InputBuffer::new(source),
            pushback: Vec::new(),
            line_comments: HashMap::new(),
            block_comments: HashMap::new(),
        }
    }

    /// Pop a pushed-back token if any, else scan the next one from the
    /// character stream.
    pub fn get_token(&mut self) -> Token {
        if let Some(tok) = self.pushback.pop() {
            return tok;
        }
        self.scan()
    }

    /// Push a token back for later re-reading.
    pub fn put_token(&mut self, token: Token) {
        self.pushback.push(token);
    }

    /// Read the next token without consuming it.
    pub fn peek_token(&mut self) -> Token {
        let tok = self.get_token();
        self.put_token(tok.clone());
        tok
    }

    // ── Scanning ─────────────────────────────────────────────

    fn scan(&mut self) -> Token {
        loop {
            self.skip_blanks();
            let line = self.input.line();
            let ch = self.input.get_char();
            match ch {
                EOF_CHAR => return Token::new("", TokenKind::Eof, line),
                '&' => {
                    self.consume_line_comment();
                    continue;
                }
                '=' => {
                    let next = self.input.get_char();
                    if next == '>' {
                        self.consume_block_comment();
                        continue;
                    }
                    self.input.put_char(next);
                    return Token::new("=", TokenKind::Equals, line);
                }
                '\n' => return self.scan_break(line),
                '"' => return self.scan_string(line),
                '-' => return self.scan_number(ch, line),
                c if c.is_ascii_digit() => return self.scan_number(ch, line),
                c if is_word_char(c) => return self.scan_word(c, line),
                _ => {
                    if let Some(kind) = single_char_kind(ch) {
                        return Token::new(ch.to_string(), kind, line);
                    }
                    return Token::new(ch.to_string(), TokenKind::Unknown, line);
                }
            }
        }
    }

    /// Skip spaces and tabs (newlines are significant).
    fn skip_blanks(&mut self) {
        loop {
            let ch = self.input.get_char();
            if ch == ' ' || ch == '\t' {
                continue;
            }
            self.input.put_char(ch);
            break;
        }
    }

    /// `&` comment: runs to the end of the line or EOF.
    fn consume_line_comment(&mut self) {
        let start = self.input.pos();
        let mut text = String::new();
        loop {
            let ch = self.input.get_char();
            if ch == '\n' {
                self.input.put_char(ch);
                break;
            }
            if ch == EOF_CHAR {
                break;
            }
            text.push(ch);
        }
        self.line_comments.insert(start, text);
    }

    /// `=>` comment: runs to the matching `<=` or EOF.
    fn consume_block_comment(&mut self) {
        let start = self.input.pos();
        let mut text = String::new();
        loop {
            let ch = self.input.get_char();
            if ch == EOF_CHAR {
                break;
            }
            if ch == '<' {
                let next = self.input.get_char();
                if next == '=' {
                    break;
                }
                self.input.put_char(next);
            }
            text.push(ch);
        }
        self.block_comments.insert(start, text);
    }

    /// Decide between a plain NEWLINE and a section-separator BREAK.
    ///
    /// A BREAK is a newline, exactly three dashes, and a closing
    /// newline (comments may sit between the dashes and the closing
    /// newline). The closing newline is pushed back so that stacked
    /// `---` lines chain into consecutive BREAK tokens. Fewer than
    /// three dashes roll back via pushback and yield a NEWLINE; three
    /// dashes not closed by a newline are one UNKNOWN token.
    fn scan_break(&mut self, line: usize) -> Token {
        let mut dashes = 0;
        while dashes < 3 {
            let ch = self.input.get_char();
            if ch == '-' {
                dashes += 1;
            } else {
                self.input.put_char(ch);
                break;
            }
        }
        if dashes == 0 {
            return Token::new("\n", TokenKind::Newline, line);
        }
        if dashes < 3 {
            for _ in 0..dashes {
                self.input.put_char('-');
            }
            return Token::new("\n", TokenKind::Newline, line);
        }
        // Three dashes: skip blanks and comments up to the closing newline.
        loop {
            self.skip_blanks();
            let ch = self.input.get_char();
            match ch {
                '&' => self.consume_line_comment(),
                '=' => {
                    let next = self.input.get_char();
                    if next == '>' {
                        self.consume_block_comment();
                    } else {
                        self.input.put_char(next);
                        self.input.put_char(ch);
                        return Token::new("---", TokenKind::Unknown, line);
                    }
                }
                '\n' => {
                    self.input.put_char(ch);
                    return Token::new("---", TokenKind::Break, line);
                }
                EOF_CHAR => return Token::new("---", TokenKind::Break, line),
                _ => {
                    self.input.put_char(ch);
                    return Token::new("---", TokenKind::Unknown, line);
                }
            }
        }
    }

    /// Quoted string: runs to the closing quote; hitting the end of the
    /// line first makes the whole lexeme UNKNOWN.
    fn scan_string(&mut self, line: usize) -> Token {
        let mut text = String::new();
        loop {
            let ch = self.input.get_char();
            match ch {
                '"' => return Token::new(text, TokenKind::StringLit, line),
                '\n' | EOF_CHAR => {
                    self.input.put_char(ch);
                    return Token::new(text, TokenKind::Unknown, line);
                }
                _ => text.push(ch),
            }
        }
    }

    /// Number: optional leading `-`, then digits. A failing integer
    /// parse of the accumulated text is UNKNOWN (this covers a bare
    /// `-` with no digits after it).
    fn scan_number(&mut self, first: char, line: usize) -> Token {
        let mut text = String::new();
        text.push(first);
        loop {
            let ch = self.input.get_char();
            if ch.is_ascii_digit() {
                text.push(ch);
            } else {
                self.input.put_char(ch);
                break;
            }
        }
        if text.parse::<i64>().is_ok() {
            Token::new(text, TokenKind::Number, line)
        } else {
            Token::new(text, TokenKind::Unknown, line)
        }
    }

    /// Identifier/keyword/sign/note: accumulate word characters, then
    /// classify by exact match against the fixed tables. Leftovers are
    /// IDs unless they contain an accidental character.
    fn scan_word(&mut self, first: char, line: usize) -> Token {
        let mut text = String::new();
        text.push(first);
        loop {
            let ch = self.input.get_char();
            if is_word_char(ch) {
                text.push(ch);
            } else {
                self.input.put_char(ch);
                break;
            }
        }
        let kind = if let Some(kw) = keyword_kind(&text) {
            kw
        } else if sign_offset(&text).is_some() {
            TokenKind::Sign
        } else if is_note_name(&text) {
            TokenKind::Note
        } else if text.contains('#') || text.contains('*') {
            // Bare identifiers must not look like accidentals.
            TokenKind::Unknown
        } else {
            TokenKind::Id
        };
        Token::new(text, kind, line)
    }
}

fn single_char_kind(ch: char) -> Option<TokenKind> {
    let kind = match ch {
        '[' => TokenKind::LBracket,
        ']' => TokenKind::RBracket,
        '{' => TokenKind::LBrace,
        '}' => TokenKind::RBrace,
        '(' => TokenKind::LParen,
        ')' => TokenKind::RParen,
        ':' => TokenKind::Colon,
        ';' => TokenKind::Semicolon,
        '.' => TokenKind::Dot,
        ',' => TokenKind::Comma,
        '\'' => TokenKind::Apostrophe,
        '^' => TokenKind::Caret,
        '!' => TokenKind::Bang,
        '>' => TokenKind::Greater,
        '/' => TokenKind::Slash,
        '+' => TokenKind::Plus,
        _ => return None,
    };
    Some(kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(input: &str) -> Vec<Token> {
        let mut lexer = Lexer::new(input);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.get_token();
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                break;
            }
        }
        tokens
    }

    fn kinds(input: &str) -> Vec<TokenKind> {
        lex_all(input).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn classifies_keywords_signs_notes_and_ids() {
        assert_eq!(
            kinds("pattern Cmaj A# riff_1"),
            vec![
                TokenKind::Pattern,
                TokenKind::Sign,
                TokenKind::Note,
                TokenKind::Id,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn accidental_lookalike_ids_are_unknown() {
        assert_eq!(kinds("riff#"), vec![TokenKind::Unknown, TokenKind::Eof]);
        assert_eq!(kinds("x*y"), vec![TokenKind::Unknown, TokenKind::Eof]);
        // `$` is allowed in ordinary identifiers.
        assert_eq!(kinds("ca$h"), vec![TokenKind::Id, TokenKind::Eof]);
    }

    #[test]
    fn rest_symbol_is_a_note() {
        assert_eq!(kinds("_"), vec![TokenKind::Note, TokenKind::Eof]);
    }

    #[test]
    fn lone_newline_is_newline() {
        assert_eq!(
            kinds("A\nB"),
            vec![TokenKind::Note, TokenKind::Newline, TokenKind::Note, TokenKind::Eof]
        );
    }

    #[test]
    fn three_dashes_make_a_break() {
        let tokens = lex_all("A\n---\nB");
        assert_eq!(
            tokens.iter().map(|t| t.kind).collect::<Vec<_>>(),
            vec![
                TokenKind::Note,
                TokenKind::Break,
                TokenKind::Newline,
                TokenKind::Note,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn stacked_breaks_chain() {
        assert_eq!(
            kinds("A\n---\n---\nB"),
            vec![
                TokenKind::Note,
                TokenKind::Break,
                TokenKind::Break,
                TokenKind::Newline,
                TokenKind::Note,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn short_dash_run_rolls_back_to_newline() {
        // Two dashes: the newline is delivered, then the dashes re-lex
        // on their own (as failed number scans).
        let tokens = lex_all("A\n--x");
        assert_eq!(tokens[0].kind, TokenKind::Note);
        assert_eq!(tokens[1].kind, TokenKind::Newline);
        assert_eq!(tokens[2].kind, TokenKind::Unknown);
        assert_eq!(tokens[2].content, "-");
    }

    #[test]
    fn unclosed_dash_run_is_unknown() {
        let tokens = lex_all("\n--- junk\n");
        assert_eq!(tokens[0].kind, TokenKind::Unknown);
        assert_eq!(tokens[0].content, "---");
    }

    #[test]
    fn break_allows_comments_before_closing_newline() {
        assert_eq!(
            kinds("\n--- & section over\nA"),
            vec![TokenKind::Break, TokenKind::Newline, TokenKind::Note, TokenKind::Eof]
        );
    }

    #[test]
    fn comments_are_skipped_and_recorded() {
        let mut lexer = Lexer::new("& hello\nA => block <= B");
        let mut kinds = Vec::new();
        loop {
            let tok = lexer.get_token();
            let done = tok.kind == TokenKind::Eof;
            kinds.push(tok.kind);
            if done {
                break;
            }
        }
        assert_eq!(
            kinds,
            vec![TokenKind::Newline, TokenKind::Note, TokenKind::Note, TokenKind::Eof]
        );
        assert_eq!(lexer.line_comments.len(), 1);
        assert_eq!(lexer.block_comments.len(), 1);
        assert!(lexer.line_comments.values().any(|t| t.contains("hello")));
        assert!(lexer.block_comments.values().any(|t| t.contains("block")));
    }

    #[test]
    fn strings_and_unterminated_strings() {
        let tokens = lex_all("\"Test\"");
        assert_eq!(tokens[0].kind, TokenKind::StringLit);
        assert_eq!(tokens[0].content, "Test");

        let tokens = lex_all("\"oops\nA");
        assert_eq!(tokens[0].kind, TokenKind::Unknown);
    }

    #[test]
    fn numbers_including_negative() {
        let tokens = lex_all("4 -12");
        assert_eq!(tokens[0].kind, TokenKind::Number);
        assert_eq!(tokens[0].content, "4");
        assert_eq!(tokens[1].kind, TokenKind::Number);
        assert_eq!(tokens[1].content, "-12");
    }

    #[test]
    fn peek_is_idempotent() {
        let mut lexer = Lexer::new("tempo: 4");
        let peeked = lexer.peek_token();
        let gotten = lexer.get_token();
        assert_eq!(peeked, gotten);
        assert_eq!(lexer.get_token().kind, TokenKind::Colon);
    }

    #[test]
    fn put_token_is_a_stack() {
        let mut lexer = Lexer::new("");
        lexer.put_token(Token::new("a", TokenKind::Id, 1));
        lexer.put_token(Token::new("b", TokenKind::Id, 1));
        assert_eq!(lexer.get_token().content, "b");
        assert_eq!(lexer.get_token().content, "a");
        assert_eq!(lexer.get_token().kind, TokenKind::Eof);
    }

    #[test]
    fn token_lines_track_source_lines() {
        let tokens = lex_all("A\nB\nC");
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[2].line, 2);
        assert_eq!(tokens[4].line, 3);
    }
}
