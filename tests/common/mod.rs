//! Shared fixtures for the scenario tests.
#![allow(dead_code)]

use std::sync::Arc;

use sforzo::soundfont::generator::GeneratorType;
use sforzo::soundfont::{Instrument, Preset, Sample, SampleType, SoundFontBank, Zone};
use sforzo::SynthConfig;

/// A bank with one preset: a 440 Hz sine recorded at 48 kHz, root key 69,
/// looped over exactly 11 cycles (1200 frames) so the seam is phase-exact.
pub fn sine_bank_440(extra_generators: &[(GeneratorType, i32)]) -> Arc<SoundFontBank> {
    let frames = 1200usize;
    let pcm: Arc<[i16]> = (0..frames)
        .map(|i| {
            let phase = std::f64::consts::TAU * 440.0 * i as f64 / 48_000.0;
            (phase.sin() * 30_000.0) as i16
        })
        .collect();

    let mut generators = vec![(GeneratorType::SampleModes, 1)];
    generators.extend_from_slice(extra_generators);

    Arc::new(SoundFontBank {
        name: "sine 440".into(),
        samples: vec![Sample {
            name: "sine440".into(),
            pcm,
            sample_rate: 48_000,
            loop_start: 0,
            loop_end: frames as u32,
            original_pitch: 69,
            pitch_correction: 0,
            linked_sample: None,
            sample_type: SampleType::Mono,
        }],
        instruments: vec![Instrument {
            name: "sine".into(),
            zones: vec![Zone {
                key_range: (0, 127),
                vel_range: (0, 127),
                generators,
                modulators: Vec::new(),
                link: Some(0),
            }],
        }],
        presets: vec![Preset {
            name: "sine preset".into(),
            bank: 0,
            program: 0,
            zones: vec![Zone {
                key_range: (0, 127),
                vel_range: (0, 127),
                generators: Vec::new(),
                modulators: Vec::new(),
                link: Some(0),
            }],
        }],
    })
}

/// Effects off so frequency measurements see the dry voice alone.
pub fn dry_config() -> SynthConfig {
    SynthConfig {
        reverb_enabled: false,
        chorus_enabled: false,
        ..SynthConfig::default()
    }
}

/// Count sign changes; a steady tone crosses zero twice per cycle.
pub fn zero_crossings(signal: &[f32]) -> usize {
    signal
        .windows(2)
        .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
        .count()
}
