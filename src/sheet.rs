//! The NoteSheet intermediate representation.
//!
//! A NoteSheet is created empty at parse time, mutated monotonically
//! through one parse pass (metadata write-once, music state
//! read-modify-write, collections append-only), then treated as
//! immutable input to serialization and waveform synthesis.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single resolved note: display name, frequency in Hz (0.0 for a
/// rest), and duration in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub name: String,
    pub frequency: f64,
    pub length: f64,
}

/// One chord slot: one or more simultaneous notes sharing a duration.
pub type NoteSet = Vec<Note>;

/// An ordered sequence of chord slots.
pub type Sheet = Vec<NoteSet>;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeSignature {
    pub base_note: i64,
    pub beats_per_measure: f64,
}

/// A field that accepts its first assignment and silently ignores
/// every later one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOnce<T> {
    value: Option<T>,
}

impl<T> WriteOnce<T> {
    pub fn set(&mut self, value: T) {
        if self.value.is_none() {
            self.value = Some(value);
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }
}

impl<T> Default for WriteOnce<T> {
    fn default() -> Self {
        WriteOnce { value: None }
    }
}

/// The compiled document.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NoteSheet {
    // Scalar metadata, write-once (first writer wins).
    pub title: WriteOnce<String>,
    pub author: WriteOnce<String>,
    pub coauthors: WriteOnce<Vec<String>>,

    // Music state.
    /// Signed count of sharps (positive) or flats (negative).
    pub key: i32,
    pub time: TimeSignature,
    /// Seconds per base-note beat.
    pub tempo: f64,
    pub octave: i64,

    /// The primary sheet.
    pub sheet: Sheet,
    /// Named reusable note sequences.
    pub patterns: HashMap<String, Sheet>,
    /// Named chords; member durations stay 0.0 until each use site.
    pub chords: HashMap<String, NoteSet>,
    /// Fully compiled sub-documents, included read-only.
    pub accompaniments: HashMap<String, NoteSheet>,
    /// Note-position of the primary sheet at which each layered sheet
    /// starts playing.
    pub layers: HashMap<usize, Vec<Sheet>>,
    /// Per-pattern layer registrations, positioned relative to the
    /// pattern start so later invocations can re-anchor them.
    pub relative_layer_positions: HashMap<String, Vec<(usize, Sheet)>>,
}

impl NoteSheet {
    pub fn new() -> Self {
        NoteSheet::default()
    }

    /// True if `name` already names a pattern, chord, or accompaniment.
    /// Names are unique across all three collections within one sheet.
    pub fn has_name(&self, name: &str) -> bool {
        self.patterns.contains_key(name)
            || self.chords.contains_key(name)
            || self.accompaniments.contains_key(name)
    }

    /// Register a layered sheet starting at the given note position.
    pub fn add_layer(&mut self, position: usize, sheet: Sheet) {
        self.layers.entry(position).or_default().push(sheet);
    }

    /// Serialize to JSON, the interchange format for tooling.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<NoteSheet, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_once_first_writer_wins() {
        let mut title: WriteOnce<String> = WriteOnce::default();
        assert!(!title.is_set());
        title.set("First".to_string());
        title.set("Second".to_string());
        assert_eq!(title.get().map(String::as_str), Some("First"));
    }

    #[test]
    fn has_name_spans_all_collections() {
        let mut sheet = NoteSheet::new();
        sheet.patterns.insert("intro".into(), Vec::new());
        sheet.chords.insert("Cmajor".into(), Vec::new());
        sheet.accompaniments.insert("backing".into(), NoteSheet::new());
        assert!(sheet.has_name("intro"));
        assert!(sheet.has_name("Cmajor"));
        assert!(sheet.has_name("backing"));
        assert!(!sheet.has_name("outro"));
    }

    #[test]
    fn json_round_trip() {
        let mut sheet = NoteSheet::new();
        sheet.title.set("Song".to_string());
        sheet.key = -2;
        sheet.tempo = 0.5;
        sheet.sheet.push(vec![Note {
            name: "A4".to_string(),
            frequency: 440.0,
            length: 0.5,
        }]);
        let decoded = NoteSheet::from_json(&sheet.to_json().unwrap()).unwrap();
        assert_eq!(sheet, decoded);
    }

    #[test]
    fn layers_accumulate_at_one_position() {
        let mut sheet = NoteSheet::new();
        sheet.add_layer(3, Vec::new());
        sheet.add_layer(3, Vec::new());
        assert_eq!(sheet.layers[&3].len(), 2);
    }
}
