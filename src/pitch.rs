//! Frequency lookup service and key-signature note formatting.
//!
//! The parser consumes this through the `FrequencyLookup` trait so the
//! table can be swapped out; the shipped implementation computes equal
//! temperament around A4 = 440 Hz for octaves 0 through 8. A rest or an
//! out-of-range octave maps to 0.0 ("silent").

/// The rest symbol: a note that contributes silence.
pub const REST: &str = "_";

/// Sharp application order for key signatures.
pub const SHARP_ORDER: [char; 7] = ['F', 'C', 'G', 'D', 'A', 'E', 'B'];

/// Flat application order for key signatures.
pub const FLAT_ORDER: [char; 7] = ['B', 'E', 'A', 'D', 'G', 'C', 'F'];

/// Apply a key signature to a note name.
///
/// A natural letter inside the first `|key|` entries of the sharp order
/// (key > 0) or flat order (key < 0) gains `#`/`$`. An explicit
/// accidental in the source always wins over the key signature.
pub fn formatted_note(name: &str, key: i32) -> String {
    if name == REST || name.len() != 1 {
        return name.to_string();
    }
    let letter = match name.chars().next() {
        Some(c) => c,
        None => return name.to_string(),
    };
    if key > 0 && SHARP_ORDER[..(key as usize).min(7)].contains(&letter) {
        format!("{letter}#")
    } else if key < 0 && FLAT_ORDER[..((-key) as usize).min(7)].contains(&letter) {
        format!("{letter}$")
    } else {
        name.to_string()
    }
}

/// Semitone of a formatted note name within its octave, relative to C.
/// `None` for the rest symbol and anything unparseable.
fn semitone_of(note: &str) -> Option<i32> {
    let mut chars = note.chars();
    let base = match chars.next()? {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let adjust = match chars.as_str() {
        "" => 0,
        "#" => 1,
        "$" => -1,
        "*" => 2,
        "$$" => -2,
        _ => return None,
    };
    Some(base + adjust)
}

/// Maps (formatted note name, octave) to a frequency in Hz, with 0.0
/// meaning silent or out of table range.
pub trait FrequencyLookup {
    fn frequency(&self, formatted_note: &str, octave: i64) -> f64;
}

/// Twelve-tone equal temperament around a reference A4.
#[derive(Debug, Clone)]
pub struct EqualTemperament {
    pub a4: f64,
}

impl Default for EqualTemperament {
    fn default() -> Self {
        EqualTemperament { a4: 440.0 }
    }
}

impl FrequencyLookup for EqualTemperament {
    fn frequency(&self, formatted_note: &str, octave: i64) -> f64 {
        if formatted_note == REST || !(0..=8).contains(&octave) {
            return 0.0;
        }
        let semitone = match semitone_of(formatted_note) {
            Some(s) => s,
            None => return 0.0,
        };
        // MIDI numbering: C4 = 60, A4 = 69.
        let midi = (octave + 1) * 12 + semitone as i64;
        self.a4 * 2.0_f64.powf((midi - 69) as f64 / 12.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_440() {
        let lookup = EqualTemperament::default();
        assert!((lookup.frequency("A", 4) - 440.0).abs() < 1e-9);
    }

    #[test]
    fn c4_is_middle_c() {
        let lookup = EqualTemperament::default();
        assert!((lookup.frequency("C", 4) - 261.6256).abs() < 0.001);
    }

    #[test]
    fn accidentals_shift_by_semitones() {
        let lookup = EqualTemperament::default();
        let a = lookup.frequency("A", 4);
        let a_sharp = lookup.frequency("A#", 4);
        let a_flat = lookup.frequency("A$", 4);
        let a_double_sharp = lookup.frequency("A*", 4);
        let ratio = 2.0_f64.powf(1.0 / 12.0);
        assert!((a_sharp / a - ratio).abs() < 1e-9);
        assert!((a / a_flat - ratio).abs() < 1e-9);
        assert!((a_double_sharp / a - ratio * ratio).abs() < 1e-9);
    }

    #[test]
    fn rest_and_out_of_range_are_silent() {
        let lookup = EqualTemperament::default();
        assert_eq!(lookup.frequency(REST, 4), 0.0);
        assert_eq!(lookup.frequency("A", -1), 0.0);
        assert_eq!(lookup.frequency("A", 9), 0.0);
    }

    #[test]
    fn sharp_keys_follow_sharp_order() {
        // G major (1 sharp): only F is raised.
        assert_eq!(formatted_note("F", 1), "F#");
        assert_eq!(formatted_note("C", 1), "C");
        // E major (4 sharps): F, C, G, D raised.
        for letter in ["F", "C", "G", "D"] {
            assert_eq!(formatted_note(letter, 4), format!("{letter}#"));
        }
        assert_eq!(formatted_note("A", 4), "A");
    }

    #[test]
    fn flat_keys_follow_flat_order() {
        // F major (1 flat): only B is lowered.
        assert_eq!(formatted_note("B", -1), "B$");
        assert_eq!(formatted_note("E", -1), "E");
        // A-flat major (4 flats): B, E, A, D lowered.
        for letter in ["B", "E", "A", "D"] {
            assert_eq!(formatted_note(letter, -4), format!("{letter}$"));
        }
        assert_eq!(formatted_note("G", -4), "G");
    }

    #[test]
    fn explicit_accidentals_win_over_key() {
        assert_eq!(formatted_note("F#", -7), "F#");
        assert_eq!(formatted_note("B$", 7), "B$");
    }

    #[test]
    fn c_major_changes_nothing() {
        for letter in ["A", "B", "C", "D", "E", "F", "G"] {
            assert_eq!(formatted_note(letter, 0), letter);
        }
    }
}
