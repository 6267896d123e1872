//! Control-thread → audio-thread messages.
//!
//! The control surface never touches the synthesizer directly; it pushes
//! these through an SPSC ring buffer and the audio thread drains them at
//! the top of each render block, so every state change lands on a block
//! boundary.

use crate::io::midi::MidiMessage;

#[derive(Debug, Clone, Copy)]
pub enum SynthMessage {
    /// Any decoded MIDI message, dispatched exactly as if it had arrived
    /// on the wire.
    Midi(MidiMessage),
    /// Replace the polyphony ceiling.
    SetVoiceCap(usize),
    /// Master output scaling, 0..=1.
    SetMasterGain(f32),
    EnableReverb(bool),
    EnableChorus(bool),
    MuteChannel { channel: u8, muted: bool },
    /// Transpose one channel in semitones.
    TransposeChannel { channel: u8, semitones: f32 },
    /// Add one channel (multi-port MIDI), up to the hard limit.
    AddChannel,
    /// Full power-on reset.
    Reset,
}
