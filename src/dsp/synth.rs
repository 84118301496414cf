//! Additive sine synthesis of a compiled sheet.
//!
//! Every chord slot becomes a run of samples summing one sine per
//! member note; rests contribute zeros. The primary sheet is one
//! voice; every layered sheet is another voice, offset in real time by
//! the primary durations that precede its start position. Voices are
//! mixed into one buffer with wrapping 16-bit addition.

use crate::error::WavError;
use crate::sheet::{NoteSheet, Sheet};

pub const SAMPLE_RATE: u32 = 44100;

/// Fraction of each note that actually sounds; the tail is zeroed so
/// consecutive notes stay audibly separate.
const CUTOFF_RATIO: f64 = 0.9995;

/// One independently-rendered line of music: chord slots plus the
/// real-time offset at which the line enters the mix.
struct Voice {
    /// Per slot: member frequencies in Hz and the slot duration in
    /// seconds.
    slots: Vec<(Vec<f64>, f64)>,
    offset_secs: f64,
}

fn slot_duration(set: &[crate::sheet::Note]) -> f64 {
    set.first().map(|n| n.length).unwrap_or(0.0)
}

fn voice_from_sheet(sheet: &Sheet, offset_secs: f64) -> Voice {
    let slots = sheet
        .iter()
        .map(|set| {
            let freqs: Vec<f64> = set.iter().map(|n| n.frequency).collect();
            (freqs, slot_duration(set))
        })
        .collect();
    Voice { slots, offset_secs }
}

/// The primary sheet first, then every layer in position order. A
/// layer's offset is the summed duration of the primary slots before
/// its start position.
fn collect_voices(sheet: &NoteSheet) -> Vec<Voice> {
    let mut voices = vec![voice_from_sheet(&sheet.sheet, 0.0)];
    let mut positions: Vec<usize> = sheet.layers.keys().copied().collect();
    positions.sort_unstable();
    for pos in positions {
        let offset: f64 = sheet.sheet.iter().take(pos).map(|s| slot_duration(s)).sum();
        for layered in &sheet.layers[&pos] {
            voices.push(voice_from_sheet(layered, offset));
        }
    }
    voices
}

fn render_voice(voice: &Voice, amplitude: f64) -> Vec<i16> {
    let mut samples = Vec::new();
    for (freqs, duration) in &voice.slots {
        let count = (duration * SAMPLE_RATE as f64) as usize;
        let cutoff = (count as f64 * CUTOFF_RATIO) as usize;
        for i in 0..count {
            if i >= cutoff {
                samples.push(0);
                continue;
            }
            let t = i as f64 / SAMPLE_RATE as f64;
            let sum: f64 = freqs
                .iter()
                .map(|f| (2.0 * std::f64::consts::PI * f * t).sin())
                .sum();
            samples.push((sum * amplitude) as i16);
        }
    }
    samples
}

/// Render the whole composition to mono 16-bit PCM at `SAMPLE_RATE`.
pub fn synthesize(sheet: &NoteSheet) -> Result<Vec<i16>, WavError> {
    let voices = collect_voices(sheet);
    let audible = voices
        .iter()
        .any(|v| v.slots.iter().any(|(freqs, _)| freqs.iter().any(|&f| f > 0.0)));
    if !audible {
        return Err(WavError::SilentSong);
    }

    // Scale so that the largest chord across all voices cannot clip
    // even with every voice sounding at once.
    let max_chord = voices
        .iter()
        .flat_map(|v| v.slots.iter().map(|(freqs, _)| freqs.len()))
        .max()
        .unwrap_or(1)
        .max(1);
    let amplitude = i16::MAX as f64 / (max_chord * voices.len()) as f64;

    let rendered: Vec<(usize, Vec<i16>)> = voices
        .iter()
        .map(|v| {
            let offset = (v.offset_secs * SAMPLE_RATE as f64) as usize;
            (offset, render_voice(v, amplitude))
        })
        .collect();

    let total = rendered
        .iter()
        .map(|(offset, samples)| offset + samples.len())
        .max()
        .unwrap_or(0);
    let mut mixed = vec![0i16; total];
    for (offset, samples) in rendered {
        for (i, sample) in samples.into_iter().enumerate() {
            mixed[offset + i] = mixed[offset + i].wrapping_add(sample);
        }
    }
    Ok(mixed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn compile(music: &str) -> NoteSheet {
        let src = format!(
            "title: \"T\"\nkey: Cmaj\ntime: common\ntempo: 4=120\noctave: 4\n---\n---\n{music}\n---\n"
        );
        Parser::new(&src, "synth").parse().unwrap()
    }

    #[test]
    fn note_sample_count_matches_duration() {
        // One note at 0.5 s is 22050 samples.
        let pcm = synthesize(&compile("A")).unwrap();
        assert_eq!(pcm.len(), 22050);
    }

    #[test]
    fn rests_only_is_a_silent_song() {
        assert_eq!(synthesize(&compile("_ _ _")), Err(WavError::SilentSong));
    }

    #[test]
    fn empty_music_is_a_silent_song() {
        assert_eq!(synthesize(&compile("repeat (0) { A }")), Err(WavError::SilentSong));
    }

    #[test]
    fn note_tail_is_cut_off() {
        let pcm = synthesize(&compile("A")).unwrap();
        let cutoff = (pcm.len() as f64 * CUTOFF_RATIO) as usize;
        assert!(pcm[cutoff..].iter().all(|&s| s == 0));
        assert!(pcm[..cutoff].iter().any(|&s| s != 0));
    }

    #[test]
    fn rests_render_as_zeros() {
        let pcm = synthesize(&compile("_ A")).unwrap();
        // First slot (0.5 s) is the rest.
        assert!(pcm[..22050].iter().all(|&s| s == 0));
        assert!(pcm[22050..].iter().any(|&s| s != 0));
    }

    #[test]
    fn amplitude_never_exceeds_the_budget() {
        let src = "title: \"T\"\nkey: Cmaj\ntime: common\ntempo: 4=120\noctave: 4\n---\nchord c is C; E; G\n---\nc A\n---\n";
        let sheet = Parser::new(src, "synth").parse().unwrap();
        let pcm = synthesize(&sheet).unwrap();
        // One voice, max chord of three: each sine stays within a
        // third of the sample range, so the sum cannot wrap.
        assert!(pcm.iter().all(|&s| s > i16::MIN));
    }

    #[test]
    fn layers_enter_at_their_offset() {
        let src = "title: \"T\"\nkey: Cmaj\ntime: common\ntempo: 4=120\noctave: 4\n---\npattern [x]:\n    C C\n---\n_ _ layer(x) _ _\n---\n";
        let sheet = Parser::new(src, "synth").parse().unwrap();
        let pcm = synthesize(&sheet).unwrap();
        // Primary is four rests (2 s); the layer starts after two of
        // them (1 s in) and runs 1 s.
        assert_eq!(pcm.len(), 88200);
        assert!(pcm[..44100].iter().all(|&s| s == 0));
        assert!(pcm[44100..66150].iter().any(|&s| s != 0));
    }

    #[test]
    fn layer_can_outlast_the_primary_sheet() {
        let src = "title: \"T\"\nkey: Cmaj\ntime: common\ntempo: 4=120\noctave: 4\n---\npattern [x]:\n    C C C C\n---\nA layer(x)\n---\n";
        let sheet = Parser::new(src, "synth").parse().unwrap();
        let pcm = synthesize(&sheet).unwrap();
        // Primary lasts 0.5 s, the layer starts at 0.5 s and runs 2 s.
        assert_eq!(pcm.len(), (2.5 * SAMPLE_RATE as f64) as usize);
    }
}
