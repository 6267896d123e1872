/*
Modulators
==========

A modulator is a rule: take one or two MIDI-side sources, normalize each to
0..1, bend it through a curve, multiply the results by a signed amount, and
add that onto a destination generator. All modulators targeting the same
generator compose additively.

Source normalization
--------------------

  velocity, key, pressures, CCs     value / 127
  pitch wheel                       value / 16383   (14-bit)
  pitch-wheel range                 semitones / 128
  "no controller"                   constant 1

Curves (SF2 2.04 §9.5.3)
------------------------

  linear      y = x
  switch      y = 0 below the midpoint, 1 above
  concave     y = -20/96 · log10((1-x)²)   slow start, fast finish
  convex      y = 1 + 20/96 · log10(x²)    fast start, slow finish

Direction inverts the input (x → 1-x) before the curve. Unipolar output
spans 0..1; bipolar remaps the input to -1..1 and applies the curve
symmetrically, preserving sign.

The nine default modulators of SF2 §8.4 are instantiated for every voice;
a bank or zone modulator with the same source/destination identity
replaces the corresponding default rather than stacking on top of it.
(SF2's tenth default, pitch wheel to initial pitch, is realized directly
in the voice's pitch computation instead.)
*/

use crate::soundfont::generator::GeneratorType;

/// What a modulator reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModulatorSourceKind {
    /// Constant 1; the modulator degenerates to `curve(1) * amount`.
    NoController,
    NoteOnVelocity,
    NoteOnKey,
    PolyPressure,
    ChannelPressure,
    PitchWheel,
    PitchWheelRange,
    /// A MIDI continuous controller.
    Controller(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCurve {
    Linear,
    Concave,
    Convex,
    Switch,
}

/// One source operand: what to read and how to shape it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModulatorSource {
    pub kind: ModulatorSourceKind,
    pub curve: SourceCurve,
    pub bipolar: bool,
    pub negative: bool,
}

impl ModulatorSource {
    pub const fn unipolar(kind: ModulatorSourceKind, curve: SourceCurve) -> Self {
        Self {
            kind,
            curve,
            bipolar: false,
            negative: false,
        }
    }

    pub const fn negative_unipolar(kind: ModulatorSourceKind, curve: SourceCurve) -> Self {
        Self {
            kind,
            curve,
            bipolar: false,
            negative: true,
        }
    }

    pub const fn bipolar(kind: ModulatorSourceKind, curve: SourceCurve) -> Self {
        Self {
            kind,
            curve,
            bipolar: true,
            negative: false,
        }
    }

    /// Decode a raw sfModSrcOper word: 7 bits of index, then the CC flag,
    /// direction, polarity and curve-type fields.
    pub fn from_raw(raw: u16) -> Self {
        let index = (raw & 0x7F) as u8;
        let is_cc = raw & 0x80 != 0;
        let negative = raw & 0x100 != 0;
        let bipolar = raw & 0x200 != 0;
        let curve = match (raw >> 10) & 0x3F {
            1 => SourceCurve::Concave,
            2 => SourceCurve::Convex,
            3 => SourceCurve::Switch,
            _ => SourceCurve::Linear,
        };
        let kind = if is_cc {
            ModulatorSourceKind::Controller(index)
        } else {
            match index {
                2 => ModulatorSourceKind::NoteOnVelocity,
                3 => ModulatorSourceKind::NoteOnKey,
                10 => ModulatorSourceKind::PolyPressure,
                13 => ModulatorSourceKind::ChannelPressure,
                14 => ModulatorSourceKind::PitchWheel,
                16 => ModulatorSourceKind::PitchWheelRange,
                _ => ModulatorSourceKind::NoController,
            }
        };
        Self {
            kind,
            curve,
            bipolar,
            negative,
        }
    }

    /// Shape a normalized 0..1 input into this source's output range.
    fn shape(&self, normalized: f32) -> f32 {
        let x = if self.negative {
            1.0 - normalized
        } else {
            normalized
        };
        if self.bipolar {
            let centered = 2.0 * x - 1.0;
            centered.signum() * curve_unipolar(self.curve, centered.abs())
        } else {
            curve_unipolar(self.curve, x)
        }
    }
}

fn curve_unipolar(curve: SourceCurve, x: f32) -> f32 {
    let x = x.clamp(0.0, 1.0);
    match curve {
        SourceCurve::Linear => x,
        SourceCurve::Switch => {
            if x >= 0.5 {
                1.0
            } else {
                0.0
            }
        }
        SourceCurve::Concave => {
            if x >= 1.0 {
                1.0
            } else {
                (-40.0 / 96.0 * (1.0 - x).log10()).min(1.0)
            }
        }
        SourceCurve::Convex => {
            if x <= 0.0 {
                0.0
            } else {
                (1.0 + 40.0 / 96.0 * x.log10()).max(0.0)
            }
        }
    }
}

/// Output transform applied after the source product.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModTransform {
    Linear,
    AbsoluteValue,
}

/// Live values a modulator can read, snapshotted from the owning channel
/// and voice.
#[derive(Debug, Clone, Copy)]
pub struct ModulatorInputs<'a> {
    pub controllers: &'a [u8; 128],
    pub velocity: u8,
    pub key: u8,
    pub poly_pressure: u8,
    pub channel_pressure: u8,
    /// 14-bit pitch wheel value, 8192 = center.
    pub pitch_wheel: u16,
    /// Pitch-wheel sensitivity in semitones.
    pub pitch_wheel_range: f32,
}

impl ModulatorInputs<'_> {
    fn normalized(&self, kind: ModulatorSourceKind) -> f32 {
        match kind {
            ModulatorSourceKind::NoController => 1.0,
            ModulatorSourceKind::NoteOnVelocity => f32::from(self.velocity) / 127.0,
            ModulatorSourceKind::NoteOnKey => f32::from(self.key) / 127.0,
            ModulatorSourceKind::PolyPressure => f32::from(self.poly_pressure) / 127.0,
            ModulatorSourceKind::ChannelPressure => f32::from(self.channel_pressure) / 127.0,
            ModulatorSourceKind::PitchWheel => f32::from(self.pitch_wheel) / 16383.0,
            ModulatorSourceKind::PitchWheelRange => (self.pitch_wheel_range / 128.0).clamp(0.0, 1.0),
            ModulatorSourceKind::Controller(cc) => {
                f32::from(self.controllers[(cc & 0x7F) as usize]) / 127.0
            }
        }
    }
}

/// A complete modulator rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modulator {
    pub source: ModulatorSource,
    pub secondary: ModulatorSource,
    pub destination: GeneratorType,
    pub amount: i16,
    pub transform: ModTransform,
}

impl Modulator {
    /// Evaluate against live inputs; the result is added onto the
    /// destination generator.
    pub fn evaluate(&self, inputs: &ModulatorInputs<'_>) -> f32 {
        let primary = self.source.shape(inputs.normalized(self.source.kind));
        let secondary = self.secondary.shape(inputs.normalized(self.secondary.kind));
        let value = primary * secondary * f32::from(self.amount);
        match self.transform {
            ModTransform::Linear => value,
            ModTransform::AbsoluteValue => value.abs(),
        }
    }

    /// SF2 identity: two modulators with equal sources, destination and
    /// transform are "the same" and the later one supersedes the earlier.
    pub fn same_identity(&self, other: &Modulator) -> bool {
        self.source == other.source
            && self.secondary == other.secondary
            && self.destination == other.destination
            && self.transform == other.transform
    }

    /// Does this modulator read the given source at all?
    pub fn depends_on(&self, kind: ModulatorSourceKind) -> bool {
        self.source.kind == kind || self.secondary.kind == kind
    }
}

const NO_SECONDARY: ModulatorSource =
    ModulatorSource::unipolar(ModulatorSourceKind::NoController, SourceCurve::Linear);

/// The default modulator set every voice starts from (SF2 2.04 §8.4).
pub fn default_modulators() -> [Modulator; 9] {
    [
        // Velocity to attenuation: quieter strikes attenuate concavely
        Modulator {
            source: ModulatorSource::negative_unipolar(
                ModulatorSourceKind::NoteOnVelocity,
                SourceCurve::Concave,
            ),
            secondary: NO_SECONDARY,
            destination: GeneratorType::InitialAttenuation,
            amount: 960,
            transform: ModTransform::Linear,
        },
        // Velocity closes the filter
        Modulator {
            source: ModulatorSource::negative_unipolar(
                ModulatorSourceKind::NoteOnVelocity,
                SourceCurve::Linear,
            ),
            secondary: NO_SECONDARY,
            destination: GeneratorType::InitialFilterFc,
            amount: -2400,
            transform: ModTransform::Linear,
        },
        // Channel pressure adds vibrato
        Modulator {
            source: ModulatorSource::unipolar(
                ModulatorSourceKind::ChannelPressure,
                SourceCurve::Linear,
            ),
            secondary: NO_SECONDARY,
            destination: GeneratorType::VibLfoToPitch,
            amount: 50,
            transform: ModTransform::Linear,
        },
        // Mod wheel adds vibrato
        Modulator {
            source: ModulatorSource::unipolar(
                ModulatorSourceKind::Controller(1),
                SourceCurve::Linear,
            ),
            secondary: NO_SECONDARY,
            destination: GeneratorType::VibLfoToPitch,
            amount: 50,
            transform: ModTransform::Linear,
        },
        // Main volume
        Modulator {
            source: ModulatorSource::negative_unipolar(
                ModulatorSourceKind::Controller(7),
                SourceCurve::Concave,
            ),
            secondary: NO_SECONDARY,
            destination: GeneratorType::InitialAttenuation,
            amount: 960,
            transform: ModTransform::Linear,
        },
        // Pan controller sweeps the pan generator across its full range
        Modulator {
            source: ModulatorSource::bipolar(
                ModulatorSourceKind::Controller(10),
                SourceCurve::Linear,
            ),
            secondary: NO_SECONDARY,
            destination: GeneratorType::Pan,
            amount: 500,
            transform: ModTransform::Linear,
        },
        // Expression
        Modulator {
            source: ModulatorSource::negative_unipolar(
                ModulatorSourceKind::Controller(11),
                SourceCurve::Concave,
            ),
            secondary: NO_SECONDARY,
            destination: GeneratorType::InitialAttenuation,
            amount: 960,
            transform: ModTransform::Linear,
        },
        // Effects depth sends
        Modulator {
            source: ModulatorSource::unipolar(
                ModulatorSourceKind::Controller(91),
                SourceCurve::Linear,
            ),
            secondary: NO_SECONDARY,
            destination: GeneratorType::ReverbEffectsSend,
            amount: 200,
            transform: ModTransform::Linear,
        },
        Modulator {
            source: ModulatorSource::unipolar(
                ModulatorSourceKind::Controller(93),
                SourceCurve::Linear,
            ),
            secondary: NO_SECONDARY,
            destination: GeneratorType::ChorusEffectsSend,
            amount: 200,
            transform: ModTransform::Linear,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(controllers: &[u8; 128], velocity: u8) -> ModulatorInputs<'_> {
        ModulatorInputs {
            controllers,
            velocity,
            key: 60,
            poly_pressure: 0,
            channel_pressure: 0,
            pitch_wheel: 8192,
            pitch_wheel_range: 2.0,
        }
    }

    #[test]
    fn test_full_velocity_means_no_attenuation() {
        let controllers = [0u8; 128];
        let mods = default_modulators();
        let value = mods[0].evaluate(&inputs(&controllers, 127));
        assert!(value.abs() < 1e-6, "velocity 127 should add 0 cB, got {value}");
    }

    #[test]
    fn test_low_velocity_attenuates() {
        let controllers = [0u8; 128];
        let mods = default_modulators();
        let quiet = mods[0].evaluate(&inputs(&controllers, 16));
        let loud = mods[0].evaluate(&inputs(&controllers, 112));
        assert!(quiet > loud, "lower velocity must attenuate more");
        assert!(quiet > 300.0, "velocity 16 should be heavily attenuated, got {quiet}");
    }

    #[test]
    fn test_pan_controller_is_bipolar() {
        let mods = default_modulators();
        let pan_mod = mods[5];

        let mut controllers = [0u8; 128];
        controllers[10] = 0;
        let left = pan_mod.evaluate(&inputs(&controllers, 64));
        controllers[10] = 127;
        let right = pan_mod.evaluate(&inputs(&controllers, 64));

        assert!((left + 500.0).abs() < 1.0, "CC10=0 is hard left, got {left}");
        assert!((right - 500.0).abs() < 1.0, "CC10=127 is hard right, got {right}");
    }

    #[test]
    fn test_curve_endpoints() {
        assert_eq!(curve_unipolar(SourceCurve::Concave, 0.0), 0.0);
        assert_eq!(curve_unipolar(SourceCurve::Concave, 1.0), 1.0);
        assert_eq!(curve_unipolar(SourceCurve::Convex, 0.0), 0.0);
        assert!((curve_unipolar(SourceCurve::Convex, 1.0) - 1.0).abs() < 1e-6);
        assert_eq!(curve_unipolar(SourceCurve::Switch, 0.49), 0.0);
        assert_eq!(curve_unipolar(SourceCurve::Switch, 0.51), 1.0);
    }

    #[test]
    fn test_from_raw_decodes_fields() {
        // CC 7, negative direction, unipolar, concave:
        // index 7 | cc 0x80 | direction 0x100 | curve 1 << 10
        let source = ModulatorSource::from_raw(7 | 0x80 | 0x100 | (1 << 10));
        assert_eq!(source.kind, ModulatorSourceKind::Controller(7));
        assert!(source.negative);
        assert!(!source.bipolar);
        assert_eq!(source.curve, SourceCurve::Concave);

        // Pitch wheel, bipolar linear
        let source = ModulatorSource::from_raw(14 | 0x200);
        assert_eq!(source.kind, ModulatorSourceKind::PitchWheel);
        assert!(source.bipolar);
    }

    #[test]
    fn test_identity_supersedes() {
        let mods = default_modulators();
        let mut replacement = mods[0];
        replacement.amount = 200;
        assert!(replacement.same_identity(&mods[0]));
        assert!(!replacement.same_identity(&mods[1]));
    }

    #[test]
    fn test_depends_on() {
        let mods = default_modulators();
        assert!(mods[0].depends_on(ModulatorSourceKind::NoteOnVelocity));
        assert!(mods[4].depends_on(ModulatorSourceKind::Controller(7)));
        assert!(!mods[4].depends_on(ModulatorSourceKind::Controller(11)));
    }
}
