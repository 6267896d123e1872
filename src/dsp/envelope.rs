/*
DAHDSR Envelopes
================

SoundFont volume envelopes have six stages, not the classic four:

  Gain (dB attenuation, inverted)
     0 ┐        ______
       │       ╱      ╲
       │      ╱        ╲_________
       │     ╱                   ╲
   100 └────╱─────────────────────╲──→ Time
      Delay Attack Hold Decay Sust. Release

  Delay:   silence, for delayVolEnv seconds
  Attack:  ramp 0 → peak, linear in GAIN
  Hold:    stay at peak (the attenuation level)
  Decay:   ramp peak → sustain, linear in dB
  Sustain: hold at attenuation + sustain dB
  Release: ramp current → 100 dB floor, linear in dB

Release is orthogonal to the stage machine: a note can be released while
still in delay or attack, so the release ramp has to derive its starting
point from whatever the envelope was doing at that moment.

Two domains meet here. Attack is perceived as loudness onset and sounds
right ramped linearly in gain; decay and release are perceived as fade-outs
and sound right ramped linearly in dB. Both are expressible as an "ideal"
attenuation-in-dB per sample, which is then low-pass smoothed (one-pole,
alpha per sample) so parameter jumps from modulators never zipper.

The modulation envelope shares the stage machine but outputs a plain 0..1
value for pitch and filter offsets; no dB conversion, no smoothing.
*/

use crate::dsp::units::{decibels_to_gain, FLOOR_DB, SILENCE_DB};

/// Smoothing coefficient per sample toward the ideal attenuation.
const SMOOTH_ALPHA: f32 = 0.001;
/// Release smoothing is ten times faster so short releases stay short.
const SMOOTH_ALPHA_RELEASE: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
}

/// Stage durations and levels, already converted to physical units.
///
/// The voice computes these from its modulated generator vector (timecent
/// durations, key-number scaling, attenuation and sustain centibels) and
/// re-installs them whenever a modulator source changes.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeEnvelopeParams {
    pub delay_seconds: f64,
    pub attack_seconds: f64,
    pub hold_seconds: f64,
    pub decay_seconds: f64,
    pub release_seconds: f64,
    /// Peak attenuation in dB (initial attenuation plus modulator offsets).
    pub attenuation_db: f32,
    /// Sustain attenuation in dB relative to the peak, clamped to [0, 100].
    pub sustain_db: f32,
}

/// Per-voice volume envelope in the dB domain.
pub struct VolumeEnvelope {
    sample_rate: f32,

    delay_samples: f64,
    attack_samples: f64,
    hold_samples: f64,
    decay_samples: f64,
    release_samples: f64,
    attenuation_db: f32,
    sustain_db: f32,

    stage: Stage,
    /// Samples elapsed since note-on; frozen once release starts.
    position: f64,
    in_release: bool,
    release_position: f64,
    release_start_db: f32,

    /// Smoothed attenuation actually applied to the signal.
    current_db: f32,
    finished: bool,
}

impl VolumeEnvelope {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            delay_samples: 0.0,
            attack_samples: 0.0,
            hold_samples: 0.0,
            decay_samples: 0.0,
            release_samples: 0.0,
            attenuation_db: 0.0,
            sustain_db: 0.0,
            stage: Stage::Delay,
            position: 0.0,
            in_release: false,
            release_position: 0.0,
            release_start_db: FLOOR_DB,
            current_db: FLOOR_DB,
            finished: false,
        }
    }

    /// Install stage parameters. Safe to call mid-note; the elapsed position
    /// is kept so controller-driven modulator updates don't restart stages.
    pub fn set_params(&mut self, params: &VolumeEnvelopeParams) {
        let sr = f64::from(self.sample_rate);
        self.delay_samples = params.delay_seconds * sr;
        self.attack_samples = params.attack_seconds * sr;
        self.hold_samples = params.hold_seconds * sr;
        self.decay_samples = params.decay_seconds * sr;
        self.release_samples = params.release_seconds * sr;
        self.attenuation_db = params.attenuation_db;
        self.sustain_db = params.sustain_db.clamp(0.0, 100.0);
    }

    pub fn is_in_release(&self) -> bool {
        self.in_release
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Current smoothed attenuation in dB. The voice manager ranks kill
    /// candidates by this when the voice cap is exceeded.
    pub fn attenuation_db(&self) -> f32 {
        self.current_db
    }

    /// Enter release, deriving the ramp start from the current stage.
    pub fn start_release(&mut self) {
        if self.in_release {
            return;
        }
        self.release_start_db = self.ideal_db();
        self.release_position = 0.0;
        self.in_release = true;
    }

    /// Release instantly: jump the ramp start to the floor so the voice
    /// finishes within the smoothing window. Used for voice stealing and
    /// all-sound-off.
    pub fn kill(&mut self) {
        self.in_release = true;
        self.release_start_db = FLOOR_DB;
        self.release_samples = 0.0;
        self.release_position = 0.0;
    }

    /// The attenuation the stage machine calls for right now, before
    /// smoothing.
    fn ideal_db(&self) -> f32 {
        if self.in_release {
            if self.release_samples <= 0.0 {
                return FLOOR_DB;
            }
            let progress = (self.release_position / self.release_samples).min(1.0) as f32;
            return self.release_start_db + (FLOOR_DB - self.release_start_db) * progress;
        }

        match self.stage {
            Stage::Delay => FLOOR_DB,
            Stage::Attack => {
                let elapsed = self.position - self.delay_samples;
                let progress = if self.attack_samples <= 0.0 {
                    1.0
                } else {
                    (elapsed / self.attack_samples).clamp(0.0, 1.0) as f32
                };
                if progress <= 0.0 {
                    FLOOR_DB
                } else {
                    // Linear-in-gain ramp expressed in dB:
                    // gain = progress * 10^(-attenuation/20)
                    (self.attenuation_db - 20.0 * progress.log10()).min(FLOOR_DB)
                }
            }
            Stage::Hold => self.attenuation_db,
            Stage::Decay => {
                let elapsed =
                    self.position - self.delay_samples - self.attack_samples - self.hold_samples;
                let progress = if self.decay_samples <= 0.0 {
                    1.0
                } else {
                    (elapsed / self.decay_samples).clamp(0.0, 1.0) as f32
                };
                self.attenuation_db + self.sustain_db * progress
            }
            Stage::Sustain => self.attenuation_db + self.sustain_db,
        }
    }

    fn advance_stage(&mut self) {
        loop {
            let boundary = match self.stage {
                Stage::Delay => self.delay_samples,
                Stage::Attack => self.delay_samples + self.attack_samples,
                Stage::Hold => self.delay_samples + self.attack_samples + self.hold_samples,
                Stage::Decay => {
                    self.delay_samples
                        + self.attack_samples
                        + self.hold_samples
                        + self.decay_samples
                }
                Stage::Sustain => return,
            };
            if self.position < boundary {
                return;
            }
            self.stage = match self.stage {
                Stage::Delay => Stage::Attack,
                Stage::Attack => Stage::Hold,
                Stage::Hold => Stage::Decay,
                Stage::Decay => Stage::Sustain,
                Stage::Sustain => Stage::Sustain,
            };
        }
    }

    /// Advance one sample and return the linear gain to apply.
    #[inline]
    pub fn next_gain(&mut self) -> f32 {
        if self.finished {
            return 0.0;
        }

        let ideal = self.ideal_db();
        let alpha = if self.in_release {
            SMOOTH_ALPHA_RELEASE
        } else {
            SMOOTH_ALPHA
        };
        self.current_db += (ideal - self.current_db) * alpha;

        if self.in_release {
            self.release_position += 1.0;
            if self.current_db >= SILENCE_DB {
                self.finished = true;
            }
        } else {
            self.position += 1.0;
            self.advance_stage();
        }

        decibels_to_gain(self.current_db)
    }
}

/// Stage parameters for the modulation envelope (0..1 value domain).
#[derive(Debug, Clone, Copy, Default)]
pub struct ModulationEnvelopeParams {
    pub delay_seconds: f64,
    pub attack_seconds: f64,
    pub hold_seconds: f64,
    pub decay_seconds: f64,
    pub release_seconds: f64,
    /// Sustain level, 0..1 (SF2 expresses this as a 0.1% decrease).
    pub sustain_level: f32,
}

/// Per-voice modulation envelope. Same stage machine as the volume
/// envelope but outputs a unitless 0..1 value consumed by the pitch and
/// filter offsets. Advanced once per block, not per sample.
pub struct ModulationEnvelope {
    sample_rate: f32,
    delay_samples: f64,
    attack_samples: f64,
    hold_samples: f64,
    decay_samples: f64,
    release_samples: f64,
    sustain_level: f32,

    position: f64,
    in_release: bool,
    release_position: f64,
    release_start_level: f32,
}

impl ModulationEnvelope {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            delay_samples: 0.0,
            attack_samples: 0.0,
            hold_samples: 0.0,
            decay_samples: 0.0,
            release_samples: 0.0,
            sustain_level: 1.0,
            position: 0.0,
            in_release: false,
            release_position: 0.0,
            release_start_level: 0.0,
        }
    }

    pub fn set_params(&mut self, params: &ModulationEnvelopeParams) {
        let sr = f64::from(self.sample_rate);
        self.delay_samples = params.delay_seconds * sr;
        self.attack_samples = params.attack_seconds * sr;
        self.hold_samples = params.hold_seconds * sr;
        self.decay_samples = params.decay_seconds * sr;
        self.release_samples = params.release_seconds * sr;
        self.sustain_level = params.sustain_level.clamp(0.0, 1.0);
    }

    pub fn start_release(&mut self) {
        if self.in_release {
            return;
        }
        self.release_start_level = self.level();
        self.release_position = 0.0;
        self.in_release = true;
    }

    /// Envelope value at the current position.
    pub fn level(&self) -> f32 {
        if self.in_release {
            if self.release_samples <= 0.0 {
                return 0.0;
            }
            let progress = (self.release_position / self.release_samples).min(1.0) as f32;
            return self.release_start_level * (1.0 - progress);
        }

        let mut t = self.position;
        if t < self.delay_samples {
            return 0.0;
        }
        t -= self.delay_samples;
        if t < self.attack_samples {
            return (t / self.attack_samples) as f32;
        }
        t -= self.attack_samples;
        if t < self.hold_samples {
            return 1.0;
        }
        t -= self.hold_samples;
        if t < self.decay_samples {
            let progress = (t / self.decay_samples) as f32;
            return 1.0 + (self.sustain_level - 1.0) * progress;
        }
        self.sustain_level
    }

    /// Value at block start, then advance the position by `samples`.
    pub fn advance_block(&mut self, samples: usize) -> f32 {
        let value = self.level();
        if self.in_release {
            self.release_position += samples as f64;
        } else {
            self.position += samples as f64;
        }
        value
    }
}
