//! Low-level DSP primitives used by voices and the effect buses.
//!
//! These components are allocation-free after construction and realtime-safe,
//! so they embed directly inside voice structs. They stay focused on the
//! signal-processing math; the synth layer handles orchestration.

/// Stereo modulated-delay chorus bus.
pub mod chorus;
/// Time-domain delay line with fractional-sample reads.
pub mod delay;
/// Six-stage volume and modulation envelope generators.
pub mod envelope;
/// Resonant low-pass filter in SoundFont units.
pub mod filter;
/// Delayed triangle LFOs.
pub mod lfo;
/// Impulse-response reverb bus.
pub mod reverb;
/// SoundFont 2.04 unit conversions.
pub mod units;
