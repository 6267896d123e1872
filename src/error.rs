//! Error types for the synthesizer and sequencer.

use thiserror::Error;

/// Errors surfaced to callers on the control thread.
///
/// The audio thread never returns these: render-time problems (a zone whose
/// sample index is out of range, an unparseable MIDI byte) are recovered
/// locally, logged, and counted in [`crate::synth::RenderStats`].
#[derive(Debug, Error)]
pub enum SynthError {
    /// The bank object model is internally inconsistent.
    #[error("invalid soundfont: {0}")]
    InvalidSoundFont(String),

    /// A zone referenced a sample index the bank does not contain.
    #[error("missing sample {index} (bank has {count})")]
    MissingSample { index: usize, count: usize },

    /// A MIDI event could not be decoded.
    #[error("invalid MIDI event: {0}")]
    InvalidMidiEvent(String),

    /// The sequencer was asked to play with no file loaded.
    #[error("no MIDI file loaded")]
    NoMidiLoaded,

    /// The MIDI file uses SMPTE timecode division, which has no tempo map.
    #[error("SMPTE timecode time division is not supported")]
    UnsupportedTimeDivision,
}
