//! The SoundFont bank object model.
//!
//! This is the contract with the file parser, which lives outside this
//! crate: presets own key/velocity-ranged zones pointing at instruments,
//! instruments own zones pointing at samples, and zones carry generator and
//! modulator lists. The bank is immutable after load and shared read-only
//! across every channel and voice.
//!
//! Layering rules when a note resolves to a voice:
//! instrument zones OVERRIDE the generator defaults, preset zones ADD on
//! top of the instrument result. Key/velocity ranges and the sample/
//! instrument links are structural here, not entries in the generator
//! lists.

pub mod generator;
pub mod modulator;

use std::sync::Arc;

use crate::error::SynthError;
use generator::{GeneratorSet, GeneratorType};
use modulator::{default_modulators, Modulator};

/// How a sample participates in stereo pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    Mono,
    Left,
    Right,
    Linked,
}

/// One PCM sample with its loop and pitch metadata.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    /// Immutable signed-16 PCM, shared by every voice playing it.
    pub pcm: Arc<[i16]>,
    pub sample_rate: u32,
    pub loop_start: u32,
    pub loop_end: u32,
    /// MIDI key this sample was recorded at.
    pub original_pitch: u8,
    /// Cents of correction applied on top of the root key.
    pub pitch_correction: i8,
    pub linked_sample: Option<usize>,
    pub sample_type: SampleType,
}

/// A key/velocity-ranged container of generator overrides.
///
/// `link` is the instrument index (in preset zones) or the sample index
/// (in instrument zones); `None` marks the zone as global.
#[derive(Debug, Clone)]
pub struct Zone {
    pub key_range: (u8, u8),
    pub vel_range: (u8, u8),
    pub generators: Vec<(GeneratorType, i32)>,
    pub modulators: Vec<Modulator>,
    pub link: Option<usize>,
}

impl Zone {
    pub fn global() -> Self {
        Self {
            key_range: (0, 127),
            vel_range: (0, 127),
            generators: Vec::new(),
            modulators: Vec::new(),
            link: None,
        }
    }

    pub fn is_global(&self) -> bool {
        self.link.is_none()
    }

    pub fn matches(&self, key: u8, velocity: u8) -> bool {
        key >= self.key_range.0
            && key <= self.key_range.1
            && velocity >= self.vel_range.0
            && velocity <= self.vel_range.1
    }
}

#[derive(Debug, Clone)]
pub struct Instrument {
    pub name: String,
    pub zones: Vec<Zone>,
}

#[derive(Debug, Clone)]
pub struct Preset {
    pub name: String,
    pub bank: u16,
    pub program: u8,
    pub zones: Vec<Zone>,
}

/// Everything a note-on needs to start one voice.
#[derive(Debug, Clone)]
pub struct ZoneResolution {
    pub generators: GeneratorSet,
    pub modulators: Vec<Modulator>,
    pub sample_index: usize,
}

/// The loaded bank: flat pools of presets, instruments and samples.
#[derive(Debug, Clone, Default)]
pub struct SoundFontBank {
    pub name: String,
    pub presets: Vec<Preset>,
    pub instruments: Vec<Instrument>,
    pub samples: Vec<Sample>,
}

impl SoundFontBank {
    /// Exact (bank, program) lookup.
    pub fn find_preset(&self, bank: u16, program: u8) -> Option<usize> {
        self.presets
            .iter()
            .position(|p| p.bank == bank && p.program == program)
    }

    /// Lookup with the General-MIDI fallback chain: exact match, then the
    /// percussion bank's program 0 for drum requests, then the melodic
    /// bank 0, then any preset with the right program, then preset 0.
    pub fn find_preset_fallback(&self, bank: u16, program: u8) -> Option<usize> {
        if let Some(index) = self.find_preset(bank, program) {
            return Some(index);
        }
        if bank == 128 {
            if let Some(index) = self.find_preset(128, 0) {
                return Some(index);
            }
        }
        if let Some(index) = self.find_preset(0, program) {
            return Some(index);
        }
        if let Some(index) = self.presets.iter().position(|p| p.program == program) {
            return Some(index);
        }
        if self.presets.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    /// Resolve a note against a preset into per-voice generator vectors.
    ///
    /// One resolution per (matching preset zone × matching instrument
    /// zone) pair. Zones with broken links are skipped, never fatal.
    pub fn resolve_note(
        &self,
        preset_index: usize,
        key: u8,
        velocity: u8,
        out: &mut Vec<ZoneResolution>,
    ) {
        out.clear();
        let Some(preset) = self.presets.get(preset_index) else {
            return;
        };

        let preset_global = preset.zones.iter().find(|z| z.is_global());

        for preset_zone in &preset.zones {
            if preset_zone.is_global() || !preset_zone.matches(key, velocity) {
                continue;
            }
            let Some(instrument) = preset_zone.link.and_then(|i| self.instruments.get(i)) else {
                log::warn!(
                    "preset '{}' zone links to missing instrument {:?}",
                    preset.name,
                    preset_zone.link
                );
                continue;
            };

            let instrument_global = instrument.zones.iter().find(|z| z.is_global());

            for instrument_zone in &instrument.zones {
                if instrument_zone.is_global() || !instrument_zone.matches(key, velocity) {
                    continue;
                }
                let Some(sample_index) = instrument_zone.link else {
                    continue;
                };
                if sample_index >= self.samples.len() {
                    log::warn!(
                        "instrument '{}' zone links to missing sample {sample_index}",
                        instrument.name
                    );
                    continue;
                }

                // Instrument level: defaults overridden by global, then local
                let mut generators = GeneratorSet::defaults();
                if let Some(global) = instrument_global {
                    for &(gen, value) in &global.generators {
                        generators.set(gen, value);
                    }
                }
                for &(gen, value) in &instrument_zone.generators {
                    generators.set(gen, value);
                }

                // Preset level: local overrides global, the result adds
                let mut preset_layer = GeneratorSet::zeroed();
                if let Some(global) = preset_global {
                    for &(gen, value) in &global.generators {
                        preset_layer.set(gen, value);
                    }
                }
                for &(gen, value) in &preset_zone.generators {
                    preset_layer.set(gen, value);
                }
                generators.add_all(&preset_layer);

                // Modulators: defaults, superseded by instrument-level
                // identity matches; preset-level amounts sum instead
                let mut modulators: Vec<Modulator> = default_modulators().to_vec();
                let instrument_mods = instrument_global
                    .map(|z| z.modulators.as_slice())
                    .unwrap_or(&[])
                    .iter()
                    .chain(&instrument_zone.modulators);
                for &incoming in instrument_mods {
                    if let Some(existing) =
                        modulators.iter_mut().find(|m| m.same_identity(&incoming))
                    {
                        *existing = incoming;
                    } else {
                        modulators.push(incoming);
                    }
                }
                let preset_mods = preset_global
                    .map(|z| z.modulators.as_slice())
                    .unwrap_or(&[])
                    .iter()
                    .chain(&preset_zone.modulators);
                for &incoming in preset_mods {
                    if let Some(existing) =
                        modulators.iter_mut().find(|m| m.same_identity(&incoming))
                    {
                        existing.amount = existing.amount.saturating_add(incoming.amount);
                    } else {
                        modulators.push(incoming);
                    }
                }

                out.push(ZoneResolution {
                    generators,
                    modulators,
                    sample_index,
                });
            }
        }
    }

    /// Structural checks run once at load, so render time can trust links.
    pub fn validate(&self) -> Result<(), SynthError> {
        for preset in &self.presets {
            for zone in &preset.zones {
                if let Some(link) = zone.link {
                    if link >= self.instruments.len() {
                        return Err(SynthError::InvalidSoundFont(format!(
                            "preset '{}' links to instrument {link} of {}",
                            preset.name,
                            self.instruments.len()
                        )));
                    }
                }
            }
        }
        for instrument in &self.instruments {
            for zone in &instrument.zones {
                if let Some(link) = zone.link {
                    if link >= self.samples.len() {
                        return Err(SynthError::MissingSample {
                            index: link,
                            count: self.samples.len(),
                        });
                    }
                }
            }
        }
        for sample in &self.samples {
            let len = sample.pcm.len() as u32;
            if sample.loop_end > len || sample.loop_start > sample.loop_end {
                return Err(SynthError::InvalidSoundFont(format!(
                    "sample '{}' loop {}..{} exceeds {} frames",
                    sample.name, sample.loop_start, sample.loop_end, len
                )));
            }
            if sample.original_pitch > 127 {
                return Err(SynthError::InvalidSoundFont(format!(
                    "sample '{}' has root key {}",
                    sample.name, sample.original_pitch
                )));
            }
        }
        Ok(())
    }
}
