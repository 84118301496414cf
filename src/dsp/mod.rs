//! Waveform synthesis: compiled sheets to 16-bit mono PCM and WAV.

pub mod renderer;
pub mod synth;

pub use renderer::render_wav;
pub use synth::SAMPLE_RATE;
