//! Character-level cursor over Musika source text.
//!
//! The buffer owns the full program text with a NUL sentinel appended,
//! and supports pushback of any number of already-consumed characters.
//! Line numbers move symmetrically on consumption and pushback.

/// Sentinel returned once the input is exhausted.
pub const EOF_CHAR: char = '\0';

pub struct InputBuffer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl InputBuffer {
    /// Build a buffer over `source`, normalizing `\r\n` and lone `\r`
    /// to `\n` and appending the end sentinel.
    pub fn new(source: &str) -> Self {
        let mut chars: Vec<char> = Vec::with_capacity(source.len() + 1);
        let mut iter = source.chars().peekable();
        while let Some(ch) = iter.next() {
            if ch == '\r' {
                if iter.peek() == Some(&'\n') {
                    iter.next();
                }
                chars.push('\n');
            } else {
                chars.push(ch);
            }
        }
        chars.push(EOF_CHAR);
        InputBuffer {
            chars,
            pos: 0,
            line: 1,
        }
    }

    /// Absolute character position of the cursor.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Current line number (1-based).
    pub fn line(&self) -> usize {
        self.line
    }

    /// Return and consume the next character, or the sentinel if the
    /// input is exhausted. Total: never fails.
    pub fn get_char(&mut self) -> char {
        let ch = self.chars[self.pos];
        if ch == EOF_CHAR {
            return EOF_CHAR;
        }
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
        }
        ch
    }

    /// Push the most recently consumed character back onto the stream.
    /// Position and line bookkeeping move symmetrically with `get_char`.
    pub fn put_char(&mut self, ch: char) {
        if ch == EOF_CHAR || self.pos == 0 {
            return;
        }
        self.pos -= 1;
        if self.chars[self.pos] == '\n' {
            self.line -= 1;
        }
    }
}
