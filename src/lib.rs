//! SoundFont 2 synthesizer and MIDI sequencer core.
//!
//! The crate renders General-MIDI material against a loaded SoundFont
//! bank: a [`Synthesizer`] owns the channels, voices and effect buses and
//! runs on the audio thread; a [`Sequencer`] feeds it tempo-accurate MIDI
//! from a Standard MIDI File, or encodes to raw bytes for an external
//! device. Cross-thread control and event traffic run over `rtrb` SPSC
//! ring buffers.
//!
//! The SoundFont file parser is a collaborator, not part of this crate:
//! anything that can produce a [`soundfont::SoundFontBank`] object model
//! can drive the engine.

pub mod dsp;
pub mod error;
pub mod io;
pub mod sequencer;
pub mod soundfont;
pub mod synth;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use error::SynthError;
pub use sequencer::{MidiBytePassthrough, MidiOutput, Sequencer};
pub use synth::Synthesizer;

/// Upper bound on one internal render block, in frames. Host buffers may
/// be any size; the engine chunks them to at most this many frames, and
/// all per-block scratch is preallocated against it.
pub const MAX_BLOCK_SIZE: usize = 4096;

/// Modulated-delay network settings for the chorus bus.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy)]
pub struct ChorusConfig {
    /// Center delay in milliseconds.
    pub delay_ms: f32,
    /// Delay sweep depth in milliseconds.
    pub depth_ms: f32,
    /// Sweep rate in Hz.
    pub rate_hz: f32,
    /// Wet recirculation, 0..1.
    pub feedback: f32,
}

impl Default for ChorusConfig {
    fn default() -> Self {
        Self {
            delay_ms: 20.0,
            depth_ms: 3.0,
            rate_hz: 0.8,
            feedback: 0.25,
        }
    }
}

/// Engine configuration.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct SynthConfig {
    pub sample_rate: u32,
    /// Global polyphony ceiling; the quietest-oldest voices are stolen
    /// beyond it.
    pub voice_cap: usize,
    pub reverb_enabled: bool,
    /// Mono impulse response for the reverb bus; `None` selects a small
    /// built-in room.
    pub reverb_impulse: Option<Vec<f32>>,
    pub chorus_enabled: bool,
    pub chorus: ChorusConfig,
    /// Channels present at startup; more can be added for multi-port
    /// MIDI, up to [`synth::MAX_CHANNELS`].
    pub channel_count: usize,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            voice_cap: 250,
            reverb_enabled: true,
            reverb_impulse: None,
            chorus_enabled: true,
            chorus: ChorusConfig::default(),
            channel_count: 16,
        }
    }
}
