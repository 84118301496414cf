pub mod binary;
pub mod dsp;
pub mod error;
pub mod input;
pub mod lexer;
pub mod parser;
pub mod pitch;
pub mod sheet;
pub mod token;

use std::path::Path;

use crate::error::MusikaError;
use crate::parser::Parser;
use crate::sheet::NoteSheet;
use wasm_bindgen::prelude::*;

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the musika-core version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

/// Compile Musika source into a `NoteSheet`. `filename` is the logical
/// name of the source (no extension), used for accompaniment cycle
/// detection.
pub fn compile(source: &str, filename: &str) -> Result<NoteSheet, MusikaError> {
    Parser::new(source, filename).parse()
}

/// Compile a `.ka` file; accompaniment references resolve relative to
/// the file's directory.
pub fn compile_file(path: &Path) -> Result<NoteSheet, MusikaError> {
    Parser::from_file(path)?.parse()
}

/// Compile and render a compiled sheet to a WAV byte buffer.
pub fn render_wav(sheet: &NoteSheet) -> Result<Vec<u8>, MusikaError> {
    dsp::renderer::render_wav(sheet)
}

/// WASM-exposed: compile Musika source into a JSON note sheet.
#[wasm_bindgen]
pub fn compile_song(source: &str) -> Result<JsValue, JsValue> {
    let sheet = compile(source, "song").map_err(|e| JsValue::from_str(&format!("{e}")))?;
    serde_wasm_bindgen::to_value(&sheet).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: compile and render Musika source to a WAV byte array.
#[wasm_bindgen]
pub fn render_song_wav(source: &str) -> Result<Vec<u8>, JsValue> {
    let sheet = compile(source, "song").map_err(|e| JsValue::from_str(&format!("{e}")))?;
    render_wav(&sheet).map_err(|e| JsValue::from_str(&format!("{e}")))
}

/// WASM-exposed: compile Musika source to its binary `.mkc` encoding.
#[wasm_bindgen]
pub fn compile_song_binary(source: &str) -> Result<Vec<u8>, JsValue> {
    let sheet = compile(source, "song").map_err(|e| JsValue::from_str(&format!("{e}")))?;
    Ok(binary::encode(&sheet))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_and_render_via_the_public_api() {
        let source = "title: \"T\"\nkey: Cmaj\ntime: common\ntempo: 4=120\noctave: 4\n---\n---\nC E G\n---\n";
        let sheet = compile(source, "api").unwrap();
        assert_eq!(sheet.sheet.len(), 3);
        let wav = render_wav(&sheet).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
    }
}
