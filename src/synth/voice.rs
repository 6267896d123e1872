//! A single voice: one SoundFont sample being played at one pitch.
//!
//! The voice owns its generator vectors, envelopes, LFOs and filter. Per
//! audio block it computes the effective pitch and filter cutoff from the
//! modulated generators, then walks the PCM with a fractional cursor,
//! looping between the loop points and writing pan-split output into the
//! dry, reverb and chorus buses.
//!
//! Pitch, filter and LFO modulation are evaluated once per block; the
//! volume envelope and filter state advance per sample.

use std::sync::Arc;

use crate::dsp::envelope::{
    ModulationEnvelope, ModulationEnvelopeParams, VolumeEnvelope, VolumeEnvelopeParams,
};
use crate::dsp::filter::LowPassFilter;
use crate::dsp::lfo::Lfo;
use crate::dsp::units::{absolute_cents_to_hz, centibels_to_gain, pan_gains, timecents_to_seconds};
use crate::soundfont::generator::{GeneratorSet, GeneratorType, GENERATOR_COUNT};
use crate::soundfont::modulator::{Modulator, ModulatorInputs};
use crate::soundfont::{Sample, SampleType, ZoneResolution};

/// Mutable views of the three stereo mix buses for one block.
pub struct VoiceBuses<'a> {
    pub dry_left: &'a mut [f32],
    pub dry_right: &'a mut [f32],
    pub reverb_left: &'a mut [f32],
    pub reverb_right: &'a mut [f32],
    pub chorus_left: &'a mut [f32],
    pub chorus_right: &'a mut [f32],
}

/// Channel-wide pitch state a voice folds into its own, recomputed by the
/// channel whenever the wheel or tuning moves.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelVoiceParams {
    pub pitch_wheel_cents: f64,
    pub tuning_cents: f64,
}

pub struct Voice {
    // Sample data, shared with the bank
    pcm: Arc<[i16]>,
    sample_rate: u32,
    sample_type: SampleType,
    root_key: i32,
    pitch_correction: i32,

    // Playback region after generator address offsets, in frames
    end_index: usize,
    loop_start: usize,
    loop_end: usize,
    loop_mode: u8,

    cursor: f64,
    playback_step: f64,
    out_sample_rate: f32,

    key: u8,
    velocity: u8,
    exclusive_class: i32,
    /// Sample clock of the owning synth at note-on; used for age ranking.
    started_at: u64,
    /// Held by the sustain pedal after its note-off arrived.
    pub sustained: bool,
    finished: bool,

    base_generators: GeneratorSet,
    generators: GeneratorSet,
    modulators: Vec<Modulator>,

    vol_env: VolumeEnvelope,
    mod_env: ModulationEnvelope,
    vib_lfo: Lfo,
    mod_lfo: Lfo,
    filter: LowPassFilter,
}

impl Voice {
    /// Build a voice from one resolved zone. The caller has already matched
    /// key and velocity ranges and validated the sample link.
    pub fn new(
        sample: &Sample,
        resolution: ZoneResolution,
        key: u8,
        velocity: u8,
        out_sample_rate: f32,
        started_at: u64,
        inputs: &ModulatorInputs<'_>,
    ) -> Self {
        let generators = resolution.generators;

        // Generator-level key/velocity substitutions
        let keynum = generators.get(GeneratorType::Keynum);
        let key = if (0..=127).contains(&keynum) {
            keynum as u8
        } else {
            key
        };
        let veln = generators.get(GeneratorType::Velocity);
        let velocity = if (0..=127).contains(&veln) {
            veln as u8
        } else {
            velocity
        };

        let frames = sample.pcm.len();
        let offset = |fine: GeneratorType, coarse: GeneratorType| {
            generators.get(fine) + generators.get(coarse) * 32_768
        };
        let clamp_frame = |base: i64, delta: i32| -> usize {
            (base + i64::from(delta)).clamp(0, frames as i64) as usize
        };

        let start_index = clamp_frame(
            0,
            offset(
                GeneratorType::StartAddrsOffset,
                GeneratorType::StartAddrsCoarseOffset,
            ),
        );
        let end_index = clamp_frame(
            frames as i64,
            offset(
                GeneratorType::EndAddrsOffset,
                GeneratorType::EndAddrsCoarseOffset,
            ),
        );
        let loop_start = clamp_frame(
            i64::from(sample.loop_start),
            offset(
                GeneratorType::StartLoopAddrsOffset,
                GeneratorType::StartLoopAddrsCoarseOffset,
            ),
        );
        let loop_end = clamp_frame(
            i64::from(sample.loop_end),
            offset(
                GeneratorType::EndLoopAddrsOffset,
                GeneratorType::EndLoopAddrsCoarseOffset,
            ),
        );

        let override_root = generators.get(GeneratorType::OverridingRootKey);
        let root_key = if (0..=127).contains(&override_root) {
            override_root
        } else {
            i32::from(sample.original_pitch)
        };

        let mut voice = Self {
            pcm: Arc::clone(&sample.pcm),
            sample_rate: sample.sample_rate,
            sample_type: sample.sample_type,
            root_key,
            pitch_correction: i32::from(sample.pitch_correction),
            end_index,
            loop_start,
            loop_end,
            loop_mode: (generators.get(GeneratorType::SampleModes) & 0x3) as u8,
            cursor: start_index as f64,
            playback_step: 1.0,
            out_sample_rate,
            key,
            velocity,
            exclusive_class: generators.get(GeneratorType::ExclusiveClass),
            started_at,
            sustained: false,
            finished: false,
            base_generators: generators.clone(),
            generators,
            modulators: resolution.modulators,
            vol_env: VolumeEnvelope::new(out_sample_rate),
            mod_env: ModulationEnvelope::new(out_sample_rate),
            vib_lfo: Lfo::new(out_sample_rate),
            mod_lfo: Lfo::new(out_sample_rate),
            filter: LowPassFilter::new(out_sample_rate),
        };
        voice.update_modulators(inputs);
        voice
    }

    pub fn key(&self) -> u8 {
        self.key
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn exclusive_class(&self) -> i32 {
        self.exclusive_class
    }

    pub fn started_at(&self) -> u64 {
        self.started_at
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_in_release(&self) -> bool {
        self.vol_env.is_in_release()
    }

    /// Current smoothed attenuation, for voice-steal ranking.
    pub fn attenuation_db(&self) -> f32 {
        self.vol_env.attenuation_db()
    }

    /// Fractional position in the sample, for diagnostics and tests.
    pub fn cursor(&self) -> f64 {
        self.cursor
    }

    /// Does any modulator on this voice read the given source?
    pub fn depends_on(&self, kind: crate::soundfont::modulator::ModulatorSourceKind) -> bool {
        self.modulators.iter().any(|m| m.depends_on(kind))
    }

    pub fn release(&mut self) {
        self.sustained = false;
        self.vol_env.start_release();
        self.mod_env.start_release();
    }

    /// Immediate shutdown without an audible release tail.
    pub fn kill(&mut self) {
        self.sustained = false;
        self.vol_env.kill();
    }

    /// Re-evaluate the modulator graph and refresh every derived parameter.
    /// Called at note-on and whenever a source the graph reads has changed.
    pub fn update_modulators(&mut self, inputs: &ModulatorInputs<'_>) {
        // Voice-local sources override the channel snapshot
        let inputs = ModulatorInputs {
            velocity: self.velocity,
            key: self.key,
            ..*inputs
        };

        let mut offsets = [0.0f32; GENERATOR_COUNT];
        for modulator in &self.modulators {
            offsets[modulator.destination as usize] += modulator.evaluate(&inputs);
        }

        self.generators = self.base_generators.clone();
        for (index, offset) in offsets.iter().enumerate() {
            if *offset != 0.0 {
                if let Some(gen) = GeneratorType::from_raw(index as u16) {
                    self.generators.add(gen, offset.round() as i32);
                }
            }
        }

        self.refresh_parameters();
    }

    fn refresh_parameters(&mut self) {
        let key_offset = f64::from(60 - i32::from(self.key));
        let gens = self.generators.clone();
        let key_scaled = |timecents: i32, per_key: i32| {
            timecents_to_seconds(timecents) * (key_offset * f64::from(per_key) / 1200.0).exp2()
        };

        self.vol_env.set_params(&VolumeEnvelopeParams {
            delay_seconds: timecents_to_seconds(gens.get(GeneratorType::DelayVolEnv)),
            attack_seconds: timecents_to_seconds(gens.get(GeneratorType::AttackVolEnv)),
            hold_seconds: key_scaled(
                gens.get(GeneratorType::HoldVolEnv),
                gens.get(GeneratorType::KeynumToVolEnvHold),
            ),
            decay_seconds: key_scaled(
                gens.get(GeneratorType::DecayVolEnv),
                gens.get(GeneratorType::KeynumToVolEnvDecay),
            ),
            release_seconds: timecents_to_seconds(gens.get(GeneratorType::ReleaseVolEnv)),
            attenuation_db: (gens.get(GeneratorType::InitialAttenuation).clamp(0, 1440) as f32)
                / 10.0,
            sustain_db: (gens.get(GeneratorType::SustainVolEnv).clamp(0, 1000) as f32) / 10.0,
        });

        self.mod_env.set_params(&ModulationEnvelopeParams {
            delay_seconds: timecents_to_seconds(gens.get(GeneratorType::DelayModEnv)),
            attack_seconds: timecents_to_seconds(gens.get(GeneratorType::AttackModEnv)),
            hold_seconds: key_scaled(
                gens.get(GeneratorType::HoldModEnv),
                gens.get(GeneratorType::KeynumToModEnvHold),
            ),
            decay_seconds: key_scaled(
                gens.get(GeneratorType::DecayModEnv),
                gens.get(GeneratorType::KeynumToModEnvDecay),
            ),
            release_seconds: timecents_to_seconds(gens.get(GeneratorType::ReleaseModEnv)),
            sustain_level: 1.0
                - gens.get(GeneratorType::SustainModEnv).clamp(0, 1000) as f32 / 1000.0,
        });

        self.vib_lfo.set_params(
            absolute_cents_to_hz(f64::from(gens.get(GeneratorType::FreqVibLfo))),
            timecents_to_seconds(gens.get(GeneratorType::DelayVibLfo)),
        );
        self.mod_lfo.set_params(
            absolute_cents_to_hz(f64::from(gens.get(GeneratorType::FreqModLfo))),
            timecents_to_seconds(gens.get(GeneratorType::DelayModLfo)),
        );

        self.filter
            .set_resonance_cb(gens.get(GeneratorType::InitialFilterQ) as f32);
    }

    fn is_looping(&self) -> bool {
        self.loop_end > self.loop_start
            && (self.loop_mode == 1 || (self.loop_mode == 3 && !self.vol_env.is_in_release()))
    }

    /// Render one block into the buses. Leaves the tail silent once the
    /// voice finishes mid-block.
    pub fn render(&mut self, channel: &ChannelVoiceParams, buses: &mut VoiceBuses<'_>) {
        if self.finished {
            return;
        }
        let block_len = buses.dry_left.len();

        // Block-rate modulation
        let mod_env_level = f64::from(self.mod_env.advance_block(block_len));
        let vib_level = f64::from(self.vib_lfo.advance_block(block_len));
        let mod_level = f64::from(self.mod_lfo.advance_block(block_len));

        let gens = &self.generators;
        let pitch_cents = f64::from(i32::from(self.key) - self.root_key)
            * f64::from(gens.get(GeneratorType::ScaleTuning))
            + f64::from(self.pitch_correction)
            + f64::from(gens.get(GeneratorType::FineTune))
            + f64::from(gens.get(GeneratorType::CoarseTune) * 100)
            + channel.tuning_cents
            + channel.pitch_wheel_cents
            + f64::from(gens.get(GeneratorType::ModEnvToPitch)) * mod_env_level
            + f64::from(gens.get(GeneratorType::ModLfoToPitch)) * mod_level
            + f64::from(gens.get(GeneratorType::VibLfoToPitch)) * vib_level;
        self.playback_step = (pitch_cents / 1200.0).exp2() * f64::from(self.sample_rate)
            / f64::from(self.out_sample_rate);

        let cutoff_cents = f64::from(gens.get(GeneratorType::InitialFilterFc))
            + f64::from(gens.get(GeneratorType::ModEnvToFilterFc)) * mod_env_level
            + f64::from(gens.get(GeneratorType::ModLfoToFilterFc)) * mod_level;
        self.filter.set_cutoff_cents(cutoff_cents as f32);

        let tremolo_gain = centibels_to_gain(
            (f64::from(gens.get(GeneratorType::ModLfoToVolume)) * mod_level) as f32,
        );

        let type_pan = match self.sample_type {
            SampleType::Left => -500,
            SampleType::Right => 500,
            _ => 0,
        };
        let pan = (gens.get(GeneratorType::Pan) + type_pan).clamp(-500, 500);
        let (pan_left, pan_right) = pan_gains(pan as f32);

        let reverb_send = gens.get(GeneratorType::ReverbEffectsSend).clamp(0, 1000) as f32 / 1000.0;
        let chorus_send = gens.get(GeneratorType::ChorusEffectsSend).clamp(0, 1000) as f32 / 1000.0;

        let looping = self.is_looping();
        let loop_length = (self.loop_end - self.loop_start) as f64;
        let last_frame = self.end_index.saturating_sub(1) as f64;

        // Address offsets can place the start past the loop end
        if looping {
            while self.cursor >= self.loop_end as f64 {
                self.cursor -= loop_length;
            }
        } else if self.cursor >= last_frame {
            self.finished = true;
            return;
        }

        for i in 0..block_len {
            // Linear interpolation, wrapping the second tap at the loop seam
            let index = self.cursor as usize;
            let frac = (self.cursor - index as f64) as f32;
            let s0 = f32::from(self.pcm[index]);
            let next = index + 1;
            let s1 = if looping && next >= self.loop_end {
                f32::from(self.pcm[self.loop_start + (next - self.loop_end)])
            } else if next < self.end_index {
                f32::from(self.pcm[next])
            } else {
                s0
            };
            let raw = (s0 + (s1 - s0) * frac) / 32_768.0;

            let filtered = self.filter.process(raw);
            let amplitude = filtered * self.vol_env.next_gain() * tremolo_gain;

            let left = amplitude * pan_left;
            let right = amplitude * pan_right;
            buses.dry_left[i] += left;
            buses.dry_right[i] += right;
            if reverb_send > 0.0 {
                buses.reverb_left[i] += left * reverb_send;
                buses.reverb_right[i] += right * reverb_send;
            }
            if chorus_send > 0.0 {
                buses.chorus_left[i] += left * chorus_send;
                buses.chorus_right[i] += right * chorus_send;
            }

            self.cursor += self.playback_step;
            if looping {
                while self.cursor >= self.loop_end as f64 {
                    self.cursor -= loop_length;
                }
            } else if self.cursor >= last_frame {
                self.finished = true;
                return;
            }

            if self.vol_env.is_finished() {
                self.finished = true;
                return;
            }
        }
    }
}
