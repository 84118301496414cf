//! Recursive-descent parser over the Musika grammar.
//!
//! Parsing is predictive with one token of lookahead (peek/pushback
//! through the lexer). Syntax checking, context validation, and
//! NoteSheet synthesis happen in a single pass: tempo/key/time
//! arithmetic, pattern/chord/accompaniment resolution, and layer
//! position tracking are all semantic actions fused with the grammar
//! productions. The first error aborts the parse.
//!
//! Accompaniment inclusion recursively instantiates a fresh Parser per
//! included file, threading a do-not-compile set down the recursion to
//! forbid self- and cross-reference cycles.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::binary;
use crate::error::{ContextError, MusikaError, SyntaxError};
use crate::lexer::{sign_offset, Lexer};
use crate::pitch::{formatted_note, EqualTemperament, FrequencyLookup, REST};
use crate::sheet::{Note, NoteSet, NoteSheet, Sheet, TimeSignature};
use crate::token::{Token, TokenKind};

/// A parsed run of music: the chord slots it contributes plus layer
/// registrations positioned relative to the start of the run. Blocks
/// compose, which is what lets layer positions re-anchor through
/// nested patterns, repeats, and accompaniment splices.
#[derive(Debug, Default)]
struct MusicBlock {
    sheet: Sheet,
    layers: Vec<(usize, Sheet)>,
}

/// What one riff element contributes, consumed by an exhaustive match
/// in the music loop.
enum RiffElement {
    /// A single note or duration-stamped chord copy.
    NoteSlot(NoteSet),
    /// A spliced pattern or accompaniment sheet with its layers.
    Splice(Sheet, Vec<(usize, Sheet)>),
    /// `^ N`: the preceding note/chord occurs N times total.
    RepeatCount(i64),
}

pub struct Parser {
    source: String,
    /// Logical name of this file (no extension), used for cycle checks.
    filename: String,
    /// Directory accompaniment references resolve against.
    base_dir: PathBuf,
    /// Files on the current inclusion chain; referencing any of them
    /// again is a cycle.
    do_not_compile: HashSet<String>,
    lookup: Rc<dyn FrequencyLookup>,
    lexer: Lexer,
    sheet: NoteSheet,
    time_initialized: bool,
}

impl Parser {
    pub fn new(source: &str, filename: &str) -> Self {
        Parser::with_context(
            source,
            filename,
            PathBuf::from("."),
            HashSet::new(),
            Rc::new(EqualTemperament::default()),
        )
    }

    /// Read a `.ka` file and prepare a parser whose accompaniment
    /// references resolve relative to the file's directory.
    pub fn from_file(path: &Path) -> Result<Self, MusikaError> {
        let source = fs::read_to_string(path)
            .map_err(|_| ContextError::InvalidFilename(path.display().to_string()))?;
        let filename = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Ok(Parser::with_context(
            &source,
            &filename,
            base_dir,
            HashSet::new(),
            Rc::new(EqualTemperament::default()),
        ))
    }

    /// Swap in a different frequency table.
    pub fn with_lookup(mut self, lookup: Rc<dyn FrequencyLookup>) -> Self {
        self.lookup = lookup;
        self
    }

    fn with_context(
        source: &str,
        filename: &str,
        base_dir: PathBuf,
        do_not_compile: HashSet<String>,
        lookup: Rc<dyn FrequencyLookup>,
    ) -> Self {
        Parser {
            source: source.to_string(),
            filename: filename.to_string(),
            base_dir,
            do_not_compile,
            lookup,
            lexer: Lexer::new(source),
            sheet: NoteSheet::new(),
            time_initialized: false,
        }
    }

    /// Parse the source into a NoteSheet. Resets all state first, so
    /// repeated calls on the same parser yield equal sheets.
    pub fn parse(&mut self) -> Result<NoteSheet, MusikaError> {
        self.lexer = Lexer::new(&self.source);
        self.sheet = NoteSheet::new();
        self.time_initialized = false;
        self.parse_score()?;
        Ok(self.sheet.clone())
    }

    // ── Token helpers ────────────────────────────────────────

    fn next(&mut self) -> Token {
        self.lexer.get_token()
    }

    fn peek(&mut self) -> Token {
        self.lexer.peek_token()
    }

    fn put_back(&mut self, token: Token) {
        self.lexer.put_token(token);
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, MusikaError> {
        let tok = self.lexer.get_token();
        if tok.kind == kind {
            Ok(tok)
        } else {
            Err(SyntaxError::new(tok, vec![kind]).into())
        }
    }

    fn unexpected<T>(&self, found: Token, expected: Vec<TokenKind>) -> Result<T, MusikaError> {
        Err(SyntaxError::new(found, expected).into())
    }

    fn expect_number(&mut self) -> Result<i64, MusikaError> {
        let tok = self.expect(TokenKind::Number)?;
        match tok.content.parse::<i64>() {
            Ok(n) => Ok(n),
            Err(_) => self.unexpected(tok, vec![TokenKind::Number]),
        }
    }

    /// Parse the content of a number token already in hand.
    fn number_value(&self, tok: Token) -> Result<i64, MusikaError> {
        match tok.content.parse::<i64>() {
            Ok(n) => Ok(n),
            Err(_) => self.unexpected(tok, vec![TokenKind::Number]),
        }
    }

    fn skip_newlines(&mut self) {
        while self.peek().kind == TokenKind::Newline {
            self.next();
        }
    }

    fn resolve_accompaniment(&self, name: &str) -> Result<&NoteSheet, MusikaError> {
        match self.sheet.accompaniments.get(name) {
            Some(acc) => Ok(acc),
            None => Err(ContextError::UnresolvedReference(name.to_string()).into()),
        }
    }

    // ── score ────────────────────────────────────────────────

    fn parse_score(&mut self) -> Result<(), MusikaError> {
        self.skip_newlines();
        if self.peek().kind == TokenKind::Accompany {
            self.parse_accompaniment_section()?;
        }
        self.parse_sheet_sections()?;
        self.skip_newlines();
        let tok = self.next();
        if tok.kind != TokenKind::Eof {
            return self.unexpected(tok, vec![TokenKind::Eof]);
        }
        Ok(())
    }

    // ── accompaniment ────────────────────────────────────────

    fn parse_accompaniment_section(&mut self) -> Result<(), MusikaError> {
        loop {
            self.parse_accompany_statement()?;
            self.skip_newlines();
            if self.peek().kind != TokenKind::Accompany {
                break;
            }
        }
        self.expect(TokenKind::Break)?;
        Ok(())
    }

    fn parse_accompany_statement(&mut self) -> Result<(), MusikaError> {
        self.expect(TokenKind::Accompany)?;
        self.expect(TokenKind::LBracket)?;
        let file_tok = self.expect(TokenKind::Id)?;
        self.expect(TokenKind::RBracket)?;
        self.expect(TokenKind::Name)?;
        let alias = self.expect(TokenKind::Id)?.content;
        if self.sheet.has_name(&alias) {
            return Err(ContextError::DuplicateName(alias).into());
        }
        let compiled = self.include_accompaniment(&file_tok.content)?;
        self.sheet.accompaniments.insert(alias, compiled);
        Ok(())
    }

    fn include_accompaniment(&mut self, reference: &str) -> Result<NoteSheet, MusikaError> {
        // A name wrapped in double underscores loads a precompiled
        // standard-library sheet instead of source.
        if reference.len() > 4 && reference.starts_with("__") && reference.ends_with("__") {
            let name = &reference[2..reference.len() - 2];
            let path = self.base_dir.join(format!("{name}.mkc"));
            return binary::decode_file(&path);
        }
        if reference == self.filename {
            return Err(ContextError::SelfReference(reference.to_string()).into());
        }
        if self.do_not_compile.contains(reference) {
            return Err(ContextError::CrossReference(reference.to_string()).into());
        }
        let path = self.base_dir.join(format!("{reference}.ka"));
        let source = fs::read_to_string(&path)
            .map_err(|_| ContextError::InvalidFilename(path.display().to_string()))?;
        let mut excluded = self.do_not_compile.clone();
        excluded.insert(self.filename.clone());
        let mut sub = Parser::with_context(
            &source,
            reference,
            self.base_dir.clone(),
            excluded,
            Rc::clone(&self.lookup),
        );
        sub.parse()
    }

    // ── sheet = info BREAK patterns BREAK music BREAK ────────

    fn parse_sheet_sections(&mut self) -> Result<(), MusikaError> {
        self.parse_info()?;
        self.expect(TokenKind::Break)?;
        self.parse_patterns_section()?;
        self.expect(TokenKind::Break)?;
        self.skip_newlines();
        let block = self.parse_music()?;
        self.sheet.sheet = block.sheet;
        for (pos, layered) in block.layers {
            self.sheet.add_layer(pos, layered);
        }
        self.expect(TokenKind::Break)?;
        Ok(())
    }

    // ── info ─────────────────────────────────────────────────

    fn parse_info(&mut self) -> Result<(), MusikaError> {
        self.skip_newlines();
        self.expect(TokenKind::Title)?;
        self.expect(TokenKind::Colon)?;
        let title = self.parse_text_value(|acc| acc.title.get().cloned())?;
        self.sheet.title.set(title);
        self.skip_newlines();

        if self.peek().kind == TokenKind::Author {
            self.next();
            self.expect(TokenKind::Colon)?;
            let author = self.parse_text_value(|acc| acc.author.get().cloned())?;
            self.sheet.author.set(author);
            self.skip_newlines();
        }
        if self.peek().kind == TokenKind::Coauthors {
            self.next();
            self.expect(TokenKind::Colon)?;
            let tok = self.next();
            let coauthors = match tok.kind {
                TokenKind::StringLit => tok
                    .content
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                TokenKind::Id => match self.resolve_accompaniment(&tok.content)?.coauthors.get() {
                    Some(list) => list.clone(),
                    None => {
                        return Err(ContextError::UnresolvedReference(tok.content).into());
                    }
                },
                _ => {
                    return self.unexpected(tok, vec![TokenKind::StringLit, TokenKind::Id]);
                }
            };
            self.sheet.coauthors.set(coauthors);
            self.skip_newlines();
        }

        self.expect(TokenKind::Key)?;
        self.parse_key_directive()?;
        self.skip_newlines();
        self.expect(TokenKind::Time)?;
        self.parse_time_directive()?;
        self.skip_newlines();
        self.expect(TokenKind::Tempo)?;
        self.parse_tempo_directive()?;
        self.skip_newlines();
        self.expect(TokenKind::Octave)?;
        self.parse_octave_directive()?;
        Ok(())
    }

    /// A string literal, or an ID pulling the field from a previously
    /// included accompaniment.
    fn parse_text_value(
        &mut self,
        field: impl Fn(&NoteSheet) -> Option<String>,
    ) -> Result<String, MusikaError> {
        let tok = self.next();
        match tok.kind {
            TokenKind::StringLit => Ok(tok.content),
            TokenKind::Id => match field(self.resolve_accompaniment(&tok.content)?) {
                Some(value) => Ok(value),
                None => Err(ContextError::UnresolvedReference(tok.content).into()),
            },
            _ => self.unexpected(tok, vec![TokenKind::StringLit, TokenKind::Id]),
        }
    }

    // ── music-state directives (shared by info and `!...!`) ──

    fn parse_key_directive(&mut self) -> Result<(), MusikaError> {
        self.expect(TokenKind::Colon)?;
        let tok = self.next();
        match tok.kind {
            TokenKind::Sign => {
                self.sheet.key = sign_offset(&tok.content).unwrap_or(0);
                Ok(())
            }
            TokenKind::Id => {
                self.sheet.key = self.resolve_accompaniment(&tok.content)?.key;
                Ok(())
            }
            _ => self.unexpected(tok, vec![TokenKind::Sign, TokenKind::Id]),
        }
    }

    fn parse_time_directive(&mut self) -> Result<(), MusikaError> {
        self.expect(TokenKind::Colon)?;
        let tok = self.next();
        match tok.kind {
            TokenKind::Common => {
                self.sheet.time = TimeSignature { base_note: 4, beats_per_measure: 4.0 };
            }
            TokenKind::Cut => {
                self.sheet.time = TimeSignature { base_note: 2, beats_per_measure: 2.0 };
            }
            TokenKind::Number => {
                let n = self.number_value(tok)?;
                let after = self.next();
                if after.kind == TokenKind::Slash {
                    let d = self.expect_number()?;
                    if n <= 0 || d <= 0 {
                        return Err(ContextError::ZeroTime.into());
                    }
                    self.sheet.time = TimeSignature {
                        base_note: d,
                        beats_per_measure: n as f64,
                    };
                } else {
                    // Bare N rescales the signature, preserving its
                    // real-time meaning: 4/4 then `8` becomes 8/8.
                    self.put_back(after);
                    if !self.time_initialized {
                        return Err(ContextError::UninitializedTime.into());
                    }
                    if n <= 0 {
                        return Err(ContextError::ZeroTime.into());
                    }
                    let old = self.sheet.time;
                    self.sheet.time = TimeSignature {
                        base_note: n,
                        beats_per_measure: old.beats_per_measure * n as f64
                            / old.base_note as f64,
                    };
                }
            }
            TokenKind::Id => {
                self.sheet.time = self.resolve_accompaniment(&tok.content)?.time;
            }
            _ => {
                return self.unexpected(
                    tok,
                    vec![TokenKind::Number, TokenKind::Common, TokenKind::Cut, TokenKind::Id],
                );
            }
        }
        self.time_initialized = true;
        Ok(())
    }

    fn parse_tempo_directive(&mut self) -> Result<(), MusikaError> {
        self.expect(TokenKind::Colon)?;
        let tok = self.next();
        match tok.kind {
            TokenKind::Number => {
                let n = self.number_value(tok)?;
                let after = self.next();
                if after.kind == TokenKind::Equals {
                    // N=M: M beats per minute on the N-th note,
                    // converted to seconds per base-note beat.
                    let m = self.expect_number()?;
                    if !self.time_initialized {
                        return Err(ContextError::UninitializedTime.into());
                    }
                    if n <= 0 || m <= 0 {
                        return Err(ContextError::ZeroTime.into());
                    }
                    self.sheet.tempo =
                        (60.0 / m as f64) * (n as f64 / self.sheet.time.base_note as f64);
                } else {
                    // Bare N scales the current tempo: positive is
                    // N times faster, negative |N| times slower.
                    self.put_back(after);
                    if n == 0 {
                        return Err(ContextError::ZeroTime.into());
                    }
                    if n > 0 {
                        self.sheet.tempo /= n as f64;
                    } else {
                        self.sheet.tempo *= (-n) as f64;
                    }
                }
                Ok(())
            }
            TokenKind::Id => {
                self.sheet.tempo = self.resolve_accompaniment(&tok.content)?.tempo;
                Ok(())
            }
            _ => self.unexpected(tok, vec![TokenKind::Number, TokenKind::Id]),
        }
    }

    fn parse_octave_directive(&mut self) -> Result<(), MusikaError> {
        self.expect(TokenKind::Colon)?;
        let tok = self.next();
        match tok.kind {
            TokenKind::Plus => {
                let n = self.expect_number()?;
                self.adjust_octave(n)
            }
            TokenKind::Number => {
                let n = self.number_value(tok)?;
                if n < 0 {
                    self.adjust_octave(n)
                } else {
                    self.sheet.octave = n;
                    Ok(())
                }
            }
            TokenKind::Id => {
                self.sheet.octave = self.resolve_accompaniment(&tok.content)?.octave;
                Ok(())
            }
            _ => self.unexpected(tok, vec![TokenKind::Number, TokenKind::Plus, TokenKind::Id]),
        }
    }

    fn adjust_octave(&mut self, delta: i64) -> Result<(), MusikaError> {
        let next = self.sheet.octave + delta;
        if next < 0 {
            return Err(ContextError::NegativeOctave.into());
        }
        self.sheet.octave = next;
        Ok(())
    }

    // ── patterns section ─────────────────────────────────────

    fn parse_patterns_section(&mut self) -> Result<(), MusikaError> {
        loop {
            self.skip_newlines();
            match self.peek().kind {
                TokenKind::Pattern => self.parse_pattern_definition()?,
                TokenKind::Chord => self.parse_chord_definition()?,
                _ => break,
            }
        }
        Ok(())
    }

    fn parse_pattern_definition(&mut self) -> Result<(), MusikaError> {
        self.expect(TokenKind::Pattern)?;
        self.expect(TokenKind::LBracket)?;
        let name = self.expect(TokenKind::Id)?.content;
        self.expect(TokenKind::RBracket)?;
        self.expect(TokenKind::Colon)?;
        if self.sheet.has_name(&name) {
            return Err(ContextError::DuplicateName(name).into());
        }
        let block = self.parse_music()?;
        self.sheet.patterns.insert(name.clone(), block.sheet);
        if !block.layers.is_empty() {
            self.sheet.relative_layer_positions.insert(name, block.layers);
        }
        Ok(())
    }

    fn parse_chord_definition(&mut self) -> Result<(), MusikaError> {
        self.expect(TokenKind::Chord)?;
        let name = self.expect(TokenKind::Id)?.content;
        if self.sheet.has_name(&name) {
            return Err(ContextError::DuplicateName(name).into());
        }
        self.expect(TokenKind::Is)?;
        let mut set: NoteSet = Vec::new();
        loop {
            let tok = self.expect(TokenKind::Note)?;
            let shift = self.parse_octave_change();
            // Frequency is resolved now; duration stays 0.0 until the
            // chord is used.
            set.push(self.resolve_note(&tok.content, self.sheet.octave + shift, 0.0));
            if self.peek().kind == TokenKind::Semicolon {
                self.next();
            } else {
                break;
            }
        }
        self.sheet.chords.insert(name, set);
        Ok(())
    }

    // ── music ────────────────────────────────────────────────

    fn parse_music(&mut self) -> Result<MusicBlock, MusikaError> {
        let mut block = MusicBlock::default();
        let mut last_set: Option<NoteSet> = None;
        loop {
            self.skip_newlines();
            match self.peek().kind {
                TokenKind::Repeat => self.parse_repeat(&mut block)?,
                TokenKind::Layer => self.parse_layer(&mut block)?,
                TokenKind::Bang => self.parse_bang_directive()?,
                TokenKind::Note | TokenKind::Id | TokenKind::Caret => {
                    match self.parse_riff_element()? {
                        RiffElement::NoteSlot(set) => {
                            last_set = Some(set.clone());
                            block.sheet.push(set);
                        }
                        RiffElement::Splice(spliced, layers) => {
                            let base = block.sheet.len();
                            for (rel, layered) in layers {
                                block.layers.push((base + rel, layered));
                            }
                            // A following `^ N` repeats the splice's
                            // final slot.
                            if let Some(last) = spliced.last() {
                                last_set = Some(last.clone());
                            }
                            block.sheet.extend(spliced);
                        }
                        RiffElement::RepeatCount(n) => {
                            let set = match &last_set {
                                Some(set) => set.clone(),
                                None => return Err(ContextError::NothingToRepeat.into()),
                            };
                            if n < 1 {
                                return Err(ContextError::NegativeRepeat.into());
                            }
                            for _ in 1..n {
                                block.sheet.push(set.clone());
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        Ok(block)
    }

    fn parse_repeat(&mut self, block: &mut MusicBlock) -> Result<(), MusikaError> {
        self.expect(TokenKind::Repeat)?;
        self.expect(TokenKind::LParen)?;
        let n = self.expect_number()?;
        self.expect(TokenKind::RParen)?;
        self.skip_newlines();
        self.expect(TokenKind::LBrace)?;
        let body = self.parse_music()?;
        self.expect(TokenKind::RBrace)?;
        if n < 0 {
            return Err(ContextError::NegativeRepeat.into());
        }
        // Splice the body N times; every layer registered inside the
        // body re-anchors once per iteration. N = 0 elides the block.
        for _ in 0..n {
            let base = block.sheet.len();
            for (rel, layered) in &body.layers {
                block.layers.push((base + rel, layered.clone()));
            }
            block.sheet.extend(body.sheet.iter().cloned());
        }
        Ok(())
    }

    fn parse_layer(&mut self, block: &mut MusicBlock) -> Result<(), MusikaError> {
        self.expect(TokenKind::Layer)?;
        self.expect(TokenKind::LParen)?;
        let first = self.expect(TokenKind::Id)?.content;
        let member = self.parse_callback_member()?;
        self.expect(TokenKind::RParen)?;
        let target: Sheet = match member {
            None => {
                if let Some(pattern) = self.sheet.patterns.get(&first) {
                    pattern.clone()
                } else if let Some(acc) = self.sheet.accompaniments.get(&first) {
                    acc.sheet.clone()
                } else {
                    // Chords and unknown names cannot be layered.
                    return Err(ContextError::UnresolvedReference(first).into());
                }
            }
            Some(member) => {
                let acc = self.resolve_accompaniment(&first)?;
                match acc.patterns.get(&member) {
                    Some(pattern) => pattern.clone(),
                    None => {
                        return Err(
                            ContextError::UnresolvedReference(format!("{first}>{member}")).into()
                        );
                    }
                }
            }
        };
        block.layers.push((block.sheet.len(), target));
        Ok(())
    }

    fn parse_bang_directive(&mut self) -> Result<(), MusikaError> {
        self.expect(TokenKind::Bang)?;
        let tok = self.next();
        match tok.kind {
            TokenKind::Key => self.parse_key_directive()?,
            TokenKind::Time => self.parse_time_directive()?,
            TokenKind::Tempo => self.parse_tempo_directive()?,
            TokenKind::Octave => self.parse_octave_directive()?,
            _ => {
                return self.unexpected(
                    tok,
                    vec![TokenKind::Key, TokenKind::Time, TokenKind::Tempo, TokenKind::Octave],
                );
            }
        }
        self.expect(TokenKind::Bang)?;
        Ok(())
    }

    // ── riff elements ────────────────────────────────────────

    fn parse_riff_element(&mut self) -> Result<RiffElement, MusikaError> {
        let tok = self.next();
        match tok.kind {
            TokenKind::Note => {
                let shift = self.parse_octave_change();
                let dots = self.parse_dot_set().max(1);
                let length = self.sheet.tempo * dots as f64;
                let note = self.resolve_note(&tok.content, self.sheet.octave + shift, length);
                Ok(RiffElement::NoteSlot(vec![note]))
            }
            TokenKind::Caret => {
                let n = self.expect_number()?;
                Ok(RiffElement::RepeatCount(n))
            }
            TokenKind::Id => self.parse_callback_element(tok.content),
            _ => self.unexpected(
                tok,
                vec![TokenKind::Note, TokenKind::Id, TokenKind::Caret],
            ),
        }
    }

    /// `name` or `name > member`, already past the first ID.
    fn parse_callback_member(&mut self) -> Result<Option<String>, MusikaError> {
        if self.peek().kind == TokenKind::Greater {
            self.next();
            Ok(Some(self.expect(TokenKind::Id)?.content))
        } else {
            Ok(None)
        }
    }

    /// Resolve a riff callback in priority order: local pattern, local
    /// chord, accompaniment sheet; or a named member of a specific
    /// accompaniment with the `acc > member` form.
    fn parse_callback_element(&mut self, first: String) -> Result<RiffElement, MusikaError> {
        let member = self.parse_callback_member()?;
        let dots = self.parse_dot_set();
        match member {
            None => {
                if let Some(pattern) = self.sheet.patterns.get(&first) {
                    let spliced = pattern.clone();
                    let layers = self
                        .sheet
                        .relative_layer_positions
                        .get(&first)
                        .cloned()
                        .unwrap_or_default();
                    Ok(RiffElement::Splice(spliced, layers))
                } else if let Some(chord) = self.sheet.chords.get(&first) {
                    let stamped = self.stamp_chord(chord.clone(), dots);
                    Ok(RiffElement::NoteSlot(stamped))
                } else if let Some(acc) = self.sheet.accompaniments.get(&first) {
                    let layers = flatten_layers(&acc.layers);
                    Ok(RiffElement::Splice(acc.sheet.clone(), layers))
                } else {
                    Err(ContextError::UnresolvedReference(first).into())
                }
            }
            Some(member) => {
                let acc = self.resolve_accompaniment(&first)?;
                if let Some(pattern) = acc.patterns.get(&member) {
                    let layers = acc
                        .relative_layer_positions
                        .get(&member)
                        .cloned()
                        .unwrap_or_default();
                    Ok(RiffElement::Splice(pattern.clone(), layers))
                } else if let Some(chord) = acc.chords.get(&member) {
                    let stamped = self.stamp_chord(chord.clone(), dots);
                    Ok(RiffElement::NoteSlot(stamped))
                } else {
                    Err(ContextError::UnresolvedReference(format!("{first}>{member}")).into())
                }
            }
        }
    }

    /// Fill in a chord's deferred duration at its use site.
    fn stamp_chord(&self, mut set: NoteSet, dots: usize) -> NoteSet {
        let length = self.sheet.tempo * dots.max(1) as f64;
        for note in &mut set {
            note.length = length;
        }
        set
    }

    /// Run of `,` (octave down) and `'` (octave up) tokens; order
    /// independent, the net sum applies.
    fn parse_octave_change(&mut self) -> i64 {
        let mut shift = 0;
        loop {
            match self.peek().kind {
                TokenKind::Comma => {
                    self.next();
                    shift -= 1;
                }
                TokenKind::Apostrophe => {
                    self.next();
                    shift += 1;
                }
                _ => break,
            }
        }
        shift
    }

    /// Run of `.` tokens. Zero means the element carried no dot-set.
    fn parse_dot_set(&mut self) -> usize {
        let mut dots = 0;
        while self.peek().kind == TokenKind::Dot {
            self.next();
            dots += 1;
        }
        dots
    }

    fn resolve_note(&self, name: &str, octave: i64, length: f64) -> Note {
        let formatted = formatted_note(name, self.sheet.key);
        let frequency = self.lookup.frequency(&formatted, octave);
        let display = if formatted == REST {
            formatted
        } else {
            format!("{formatted}{octave}")
        };
        Note {
            name: display,
            frequency,
            length,
        }
    }
}

/// Flatten an absolute layer map into sorted (position, sheet) pairs
/// for re-anchoring at a splice site.
fn flatten_layers(layers: &HashMap<usize, Vec<Sheet>>) -> Vec<(usize, Sheet)> {
    let mut flat: Vec<(usize, Sheet)> = layers
        .iter()
        .flat_map(|(&pos, sheets)| sheets.iter().map(move |s| (pos, s.clone())))
        .collect();
    flat.sort_by_key(|(pos, _)| *pos);
    flat
}
