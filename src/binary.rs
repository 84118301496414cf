//! Versioned binary serialization for compiled sheets (`.mkc` files).
//!
//! The layout is explicit and self-contained: a 4-byte magic, a
//! little-endian u16 format version, then every NoteSheet field in a
//! fixed order. Strings are u32-length-prefixed UTF-8, optional fields
//! carry a presence byte, numbers are little-endian, and maps are
//! written sorted by key so that equal sheets always encode to
//! identical bytes. Accompaniments nest recursively without repeating
//! the magic/version header.

use std::fs;
use std::path::Path;

use crate::error::{ContextError, MusikaError, SerialError};
use crate::sheet::{Note, NoteSet, NoteSheet, Sheet, TimeSignature};

const MAGIC: &[u8; 4] = b"MKC1";
const VERSION: u16 = 1;

/// Serialize a compiled sheet. Infallible; every sheet has exactly one
/// encoding.
pub fn encode(sheet: &NoteSheet) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    write_notesheet(&mut out, sheet);
    out
}

/// Deserialize a sheet previously produced by `encode`.
pub fn decode(data: &[u8]) -> Result<NoteSheet, SerialError> {
    let mut reader = Reader::new(data);
    if reader.take(4)? != MAGIC {
        return Err(SerialError::BadMagic);
    }
    let version = reader.read_u16()?;
    if version != VERSION {
        return Err(SerialError::UnsupportedVersion(version));
    }
    reader.read_notesheet()
}

/// Read and decode a `.mkc` file.
pub fn decode_file(path: &Path) -> Result<NoteSheet, MusikaError> {
    let data = fs::read(path)
        .map_err(|_| ContextError::InvalidFilename(path.display().to_string()))?;
    Ok(decode(&data)?)
}

// ── Encoding ─────────────────────────────────────────────────

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    write_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

fn write_optional_string(out: &mut Vec<u8>, value: Option<&String>) {
    match value {
        None => out.push(0),
        Some(s) => {
            out.push(1);
            write_string(out, s);
        }
    }
}

fn write_note(out: &mut Vec<u8>, note: &Note) {
    write_string(out, &note.name);
    out.extend_from_slice(&note.frequency.to_le_bytes());
    out.extend_from_slice(&note.length.to_le_bytes());
}

fn write_note_set(out: &mut Vec<u8>, set: &NoteSet) {
    write_u32(out, set.len() as u32);
    for note in set {
        write_note(out, note);
    }
}

fn write_sheet(out: &mut Vec<u8>, sheet: &Sheet) {
    write_u32(out, sheet.len() as u32);
    for set in sheet {
        write_note_set(out, set);
    }
}

fn sorted_keys<V>(map: &std::collections::HashMap<String, V>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys
}

fn write_notesheet(out: &mut Vec<u8>, sheet: &NoteSheet) {
    write_optional_string(out, sheet.title.get());
    write_optional_string(out, sheet.author.get());
    match sheet.coauthors.get() {
        None => out.push(0),
        Some(list) => {
            out.push(1);
            write_u32(out, list.len() as u32);
            for name in list {
                write_string(out, name);
            }
        }
    }

    out.extend_from_slice(&sheet.key.to_le_bytes());
    out.extend_from_slice(&sheet.time.base_note.to_le_bytes());
    out.extend_from_slice(&sheet.time.beats_per_measure.to_le_bytes());
    out.extend_from_slice(&sheet.tempo.to_le_bytes());
    out.extend_from_slice(&sheet.octave.to_le_bytes());

    write_sheet(out, &sheet.sheet);

    write_u32(out, sheet.patterns.len() as u32);
    for name in sorted_keys(&sheet.patterns) {
        write_string(out, name);
        write_sheet(out, &sheet.patterns[name]);
    }

    write_u32(out, sheet.chords.len() as u32);
    for name in sorted_keys(&sheet.chords) {
        write_string(out, name);
        write_note_set(out, &sheet.chords[name]);
    }

    write_u32(out, sheet.accompaniments.len() as u32);
    for name in sorted_keys(&sheet.accompaniments) {
        write_string(out, name);
        write_notesheet(out, &sheet.accompaniments[name]);
    }

    let mut positions: Vec<usize> = sheet.layers.keys().copied().collect();
    positions.sort_unstable();
    write_u32(out, positions.len() as u32);
    for pos in positions {
        out.extend_from_slice(&(pos as u64).to_le_bytes());
        let sheets = &sheet.layers[&pos];
        write_u32(out, sheets.len() as u32);
        for layered in sheets {
            write_sheet(out, layered);
        }
    }

    write_u32(out, sheet.relative_layer_positions.len() as u32);
    for name in sorted_keys(&sheet.relative_layer_positions) {
        write_string(out, name);
        let entries = &sheet.relative_layer_positions[name];
        write_u32(out, entries.len() as u32);
        for (pos, layered) in entries {
            out.extend_from_slice(&(*pos as u64).to_le_bytes());
            write_sheet(out, layered);
        }
    }
}

// ── Decoding ─────────────────────────────────────────────────

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SerialError> {
        if self.data.len() - self.pos < n {
            return Err(SerialError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], SerialError> {
        let slice = self.take(N)?;
        let mut buf = [0u8; N];
        buf.copy_from_slice(slice);
        Ok(buf)
    }

    fn read_u8(&mut self) -> Result<u8, SerialError> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, SerialError> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    fn read_u32(&mut self) -> Result<u32, SerialError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_u64(&mut self) -> Result<u64, SerialError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    fn read_i32(&mut self) -> Result<i32, SerialError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64, SerialError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn read_f64(&mut self) -> Result<f64, SerialError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    fn read_string(&mut self) -> Result<String, SerialError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| SerialError::InvalidUtf8)
    }

    fn read_optional_string(&mut self) -> Result<Option<String>, SerialError> {
        if self.read_u8()? == 0 {
            Ok(None)
        } else {
            Ok(Some(self.read_string()?))
        }
    }

    fn read_note(&mut self) -> Result<Note, SerialError> {
        Ok(Note {
            name: self.read_string()?,
            frequency: self.read_f64()?,
            length: self.read_f64()?,
        })
    }

    fn read_note_set(&mut self) -> Result<NoteSet, SerialError> {
        let count = self.read_u32()? as usize;
        let mut set = Vec::with_capacity(count.min(self.data.len()));
        for _ in 0..count {
            set.push(self.read_note()?);
        }
        Ok(set)
    }

    fn read_sheet(&mut self) -> Result<Sheet, SerialError> {
        let count = self.read_u32()? as usize;
        let mut sheet = Vec::with_capacity(count.min(self.data.len()));
        for _ in 0..count {
            sheet.push(self.read_note_set()?);
        }
        Ok(sheet)
    }

    fn read_notesheet(&mut self) -> Result<NoteSheet, SerialError> {
        let mut sheet = NoteSheet::new();
        if let Some(title) = self.read_optional_string()? {
            sheet.title.set(title);
        }
        if let Some(author) = self.read_optional_string()? {
            sheet.author.set(author);
        }
        if self.read_u8()? != 0 {
            let count = self.read_u32()? as usize;
            let mut list = Vec::with_capacity(count.min(self.data.len()));
            for _ in 0..count {
                list.push(self.read_string()?);
            }
            sheet.coauthors.set(list);
        }

        sheet.key = self.read_i32()?;
        sheet.time = TimeSignature {
            base_note: self.read_i64()?,
            beats_per_measure: self.read_f64()?,
        };
        sheet.tempo = self.read_f64()?;
        sheet.octave = self.read_i64()?;

        sheet.sheet = self.read_sheet()?;

        let patterns = self.read_u32()?;
        for _ in 0..patterns {
            let name = self.read_string()?;
            let pattern = self.read_sheet()?;
            sheet.patterns.insert(name, pattern);
        }

        let chords = self.read_u32()?;
        for _ in 0..chords {
            let name = self.read_string()?;
            let chord = self.read_note_set()?;
            sheet.chords.insert(name, chord);
        }

        let accompaniments = self.read_u32()?;
        for _ in 0..accompaniments {
            let name = self.read_string()?;
            let acc = self.read_notesheet()?;
            sheet.accompaniments.insert(name, acc);
        }

        let layers = self.read_u32()?;
        for _ in 0..layers {
            let pos = self.read_u64()? as usize;
            let count = self.read_u32()? as usize;
            let mut sheets = Vec::with_capacity(count.min(self.data.len()));
            for _ in 0..count {
                sheets.push(self.read_sheet()?);
            }
            sheet.layers.insert(pos, sheets);
        }

        let relative = self.read_u32()?;
        for _ in 0..relative {
            let name = self.read_string()?;
            let count = self.read_u32()? as usize;
            let mut entries = Vec::with_capacity(count.min(self.data.len()));
            for _ in 0..count {
                let pos = self.read_u64()? as usize;
                entries.push((pos, self.read_sheet()?));
            }
            sheet.relative_layer_positions.insert(name, entries);
        }

        Ok(sheet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn rich_sheet() -> NoteSheet {
        let src = "title: \"Codec\"\nauthor: \"A\"\ncoauthors: \"B, C\"\nkey: Gmaj\ntime: 6/8\ntempo: 8=90\noctave: 3\n---\npattern [x]:\n    C D\nchord Gm is G; B; D\npattern [p]:\n    E layer(x) F\n---\np Gm. A\n---\n";
        Parser::new(src, "codec").parse().unwrap()
    }

    #[test]
    fn round_trip_preserves_everything() {
        let original = rich_sheet();
        let decoded = decode(&encode(&original)).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn encoding_is_byte_stable() {
        let sheet = rich_sheet();
        let first = encode(&sheet);
        let second = encode(&sheet);
        assert_eq!(first, second);
        let reencoded = encode(&decode(&first).unwrap());
        assert_eq!(first, reencoded);
    }

    #[test]
    fn empty_sheet_round_trips() {
        let sheet = NoteSheet::new();
        assert_eq!(decode(&encode(&sheet)).unwrap(), sheet);
    }

    #[test]
    fn bad_magic_is_rejected() {
        assert_eq!(decode(b"WAVE\x01\x00"), Err(SerialError::BadMagic));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let mut data = encode(&NoteSheet::new());
        data[4] = 9;
        assert_eq!(decode(&data), Err(SerialError::UnsupportedVersion(9)));
    }

    #[test]
    fn truncated_data_is_rejected() {
        let data = encode(&rich_sheet());
        assert_eq!(decode(&data[..data.len() - 3]), Err(SerialError::Truncated));
        assert_eq!(decode(&data[..5]), Err(SerialError::Truncated));
    }

    #[test]
    fn invalid_utf8_in_a_string_is_rejected() {
        let mut sheet = NoteSheet::new();
        sheet.title.set("ab".to_string());
        let mut data = encode(&sheet);
        // The title bytes sit right after magic, version, presence
        // byte, and length prefix.
        data[11] = 0xFF;
        data[12] = 0xFE;
        assert_eq!(decode(&data), Err(SerialError::InvalidUtf8));
    }

    #[test]
    fn missing_file_is_invalid_filename() {
        let result = decode_file(Path::new("/no/such/file.mkc"));
        match result {
            Err(MusikaError::Context(ContextError::InvalidFilename(name))) => {
                assert!(name.contains("file.mkc"));
            }
            other => panic!("expected InvalidFilename, got {other:?}"),
        }
    }
}
