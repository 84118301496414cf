//! WAV renderer — renders a compiled sheet to a WAV byte buffer.

use crate::error::MusikaError;
use crate::sheet::NoteSheet;

use super::synth::{synthesize, SAMPLE_RATE};

/// Render a compiled sheet to a WAV file as bytes (16-bit mono PCM).
pub fn render_wav(sheet: &NoteSheet) -> Result<Vec<u8>, MusikaError> {
    let pcm = synthesize(sheet)?;
    Ok(encode_wav(&pcm, SAMPLE_RATE, 1))
}

/// Encode i16 PCM samples to a WAV byte buffer.
fn encode_wav(samples: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bits_per_sample: u16 = 16;
    let byte_rate = sample_rate * channels as u32 * (bits_per_sample as u32 / 8);
    let block_align = channels * (bits_per_sample / 8);
    let data_size = (samples.len() * 2) as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WavError;
    use crate::parser::Parser;

    const SOURCE: &str = "title: \"Test\"\nauthor: \"A\"\nkey: Cmaj\ntime: common\ntempo: 4=120\noctave: 4\n---\n---\nA B\n---\n";

    fn compile(source: &str) -> NoteSheet {
        Parser::new(source, "renderer").parse().unwrap()
    }

    #[test]
    fn wav_header_valid() {
        let wav = render_wav(&compile(SOURCE)).unwrap();

        // Check RIFF header
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        // Check sample rate
        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 44100);

        // Check channels
        let ch = u16::from_le_bytes([wav[22], wav[23]]);
        assert_eq!(ch, 1);
    }

    #[test]
    fn wav_size_correct() {
        let wav = render_wav(&compile(SOURCE)).unwrap();

        // Two notes at 0.5 s each = 44100 samples * 2 bytes.
        let data_size = u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]);
        assert_eq!(data_size, 88200);
        assert_eq!(wav.len(), 44 + 88200);

        let file_size = u32::from_le_bytes([wav[4], wav[5], wav[6], wav[7]]);
        assert_eq!(file_size, 36 + data_size);
    }

    #[test]
    fn full_pipeline_parse_compile_render() {
        let source = "title: \"Pipeline\"\nkey: Gmaj\ntime: 4/4\ntempo: 4=120\noctave: 4\n---\nchord G5 is G; B; D'\n---\nG5 F A ^ 2\n---\n";
        let wav = render_wav(&compile(source)).unwrap();

        // Should produce a valid WAV
        assert_eq!(&wav[0..4], b"RIFF");
        assert!(wav.len() > 44, "WAV should have audio data");

        // Verify it's not all silence
        let data_start = 44;
        let mut has_nonzero = false;
        for i in (data_start..wav.len()).step_by(2) {
            if i + 1 < wav.len() {
                let sample = i16::from_le_bytes([wav[i], wav[i + 1]]);
                if sample != 0 {
                    has_nonzero = true;
                    break;
                }
            }
        }
        assert!(has_nonzero, "Rendered WAV should contain non-silent audio");
    }

    #[test]
    fn silent_song_is_an_error() {
        let source = "title: \"T\"\nkey: Cmaj\ntime: common\ntempo: 4=120\noctave: 4\n---\n---\n_ _\n---\n";
        match render_wav(&compile(source)) {
            Err(MusikaError::Wav(WavError::SilentSong)) => {}
            other => panic!("expected SilentSong, got {other:?}"),
        }
    }
}
