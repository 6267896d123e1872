//! MIDI channel state machine.
//!
//! A channel owns its controller bank, preset selection, pitch wheel,
//! tuning, RPN/NRPN registers and the arena of voices it has spawned. All
//! of it is mutated only on the audio thread; the synth dispatches decoded
//! MIDI messages here and the channel decides what they mean.

use crate::soundfont::modulator::{ModulatorInputs, ModulatorSourceKind};
use crate::soundfont::{SoundFontBank, ZoneResolution};
use crate::synth::voice::{ChannelVoiceParams, Voice};

/// Controller numbers the channel handles by name.
mod cc {
    pub const BANK_SELECT: u8 = 0;
    pub const DATA_ENTRY_MSB: u8 = 6;
    pub const BANK_SELECT_LSB: u8 = 32;
    pub const DATA_ENTRY_LSB: u8 = 38;
    pub const SUSTAIN_PEDAL: u8 = 64;
    pub const NRPN_LSB: u8 = 98;
    pub const NRPN_MSB: u8 = 99;
    pub const RPN_LSB: u8 = 100;
    pub const RPN_MSB: u8 = 101;
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const RESET_CONTROLLERS: u8 = 121;
    pub const ALL_NOTES_OFF: u8 = 123;
    pub const OMNI_OFF: u8 = 124;
    pub const OMNI_ON: u8 = 125;
    pub const MONO_ON: u8 = 126;
    pub const POLY_ON: u8 = 127;
}

/// Registered parameter numbers (MSB<<7 | LSB).
mod rpn {
    pub const PITCH_BEND_RANGE: u16 = 0x0000;
    pub const FINE_TUNING: u16 = 0x0001;
    pub const COARSE_TUNING: u16 = 0x0002;
    pub const NULL: u16 = 0x3FFF;
}

/// Power-on controller values; everything not listed defaults to zero.
fn default_controller_value(controller: u8) -> u8 {
    match controller {
        7 => 100,  // main volume
        8 => 64,   // balance
        10 => 64,  // pan
        11 => 127, // expression
        71 => 64,  // timbre
        72 => 64,  // release time
        73 => 64,  // attack time
        74 => 64,  // brightness
        75..=79 => 64,
        91 => 40, // effects 1 depth (reverb)
        _ => 0,
    }
}

/// Which parameter the next data-entry message writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataEntryTarget {
    None,
    Rpn(u16),
    Nrpn(u16),
}

pub struct Channel {
    number: usize,

    controllers: [u8; 128],
    locked: [bool; 128],
    poly_pressure: [u8; 128],
    channel_pressure: u8,
    pitch_wheel: u16,

    bank_msb: u8,
    bank_lsb: u8,
    program: u8,
    preset_index: Option<usize>,
    pub percussion: bool,

    data_entry: DataEntryTarget,
    pitch_bend_range_semitones: f32,
    fine_tune_cents: f32,
    coarse_tune_semitones: f32,
    /// API-level transposition, octaves folded into cents at render time.
    transpose_semitones: f32,

    mono_mode: bool,
    /// Last key struck, kept for portamento-style behaviors.
    last_key: Option<u8>,
    pub muted: bool,

    pub(crate) voices: Vec<Voice>,
    /// Scratch for zone resolution, reused across note-ons.
    scratch: Vec<ZoneResolution>,
}

impl Channel {
    pub fn new(number: usize) -> Self {
        let mut controllers = [0u8; 128];
        for (index, value) in controllers.iter_mut().enumerate() {
            *value = default_controller_value(index as u8);
        }
        Self {
            number,
            controllers,
            locked: [false; 128],
            poly_pressure: [0; 128],
            channel_pressure: 0,
            pitch_wheel: 8192,
            bank_msb: 0,
            bank_lsb: 0,
            program: 0,
            preset_index: None,
            percussion: number % 16 == 9,
            data_entry: DataEntryTarget::None,
            pitch_bend_range_semitones: 2.0,
            fine_tune_cents: 0.0,
            coarse_tune_semitones: 0.0,
            transpose_semitones: 0.0,
            mono_mode: false,
            last_key: None,
            muted: false,
            voices: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn number(&self) -> usize {
        self.number
    }

    /// The most recent key that actually started voices.
    pub fn last_key(&self) -> Option<u8> {
        self.last_key
    }

    pub fn controller(&self, controller: u8) -> u8 {
        self.controllers[(controller & 0x7F) as usize]
    }

    pub fn pitch_wheel(&self) -> u16 {
        self.pitch_wheel
    }

    pub fn program(&self) -> u8 {
        self.program
    }

    pub fn bank(&self) -> u16 {
        if self.percussion {
            128
        } else {
            u16::from(self.bank_msb)
        }
    }

    /// Bank select LSB, tracked for GM2/XG-style variation banks.
    pub fn bank_lsb(&self) -> u8 {
        self.bank_lsb
    }

    pub fn preset_index(&self) -> Option<usize> {
        self.preset_index
    }

    pub fn pitch_bend_range(&self) -> f32 {
        self.pitch_bend_range_semitones
    }

    pub fn set_transpose(&mut self, semitones: f32) {
        self.transpose_semitones = semitones;
    }

    /// Prevent `resetAllControllers` and incoming writes from touching one
    /// controller. Used by hosts that override e.g. channel volume.
    pub fn lock_controller(&mut self, controller: u8, locked: bool) {
        self.locked[(controller & 0x7F) as usize] = locked;
    }

    pub fn hold_pedal_down(&self) -> bool {
        self.controllers[cc::SUSTAIN_PEDAL as usize] >= 64
    }

    /// Channel-wide pitch offsets every voice folds in.
    pub fn voice_params(&self) -> ChannelVoiceParams {
        let wheel =
            f64::from(i32::from(self.pitch_wheel) - 8192) / 8192.0;
        ChannelVoiceParams {
            pitch_wheel_cents: wheel * f64::from(self.pitch_bend_range_semitones) * 100.0,
            tuning_cents: f64::from(self.fine_tune_cents)
                + f64::from(self.coarse_tune_semitones) * 100.0
                + f64::from(self.transpose_semitones) * 100.0,
        }
    }

    /// Read-only view of the voice arena.
    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.iter().filter(|v| !v.is_finished()).count()
    }

    pub fn sustained_voice_count(&self) -> usize {
        self.voices
            .iter()
            .filter(|v| v.sustained && !v.is_finished())
            .count()
    }

    /// Start voices for a note. Returns how many were spawned.
    ///
    /// Velocity zero is a note-off in disguise. Zone resolution failures
    /// are logged and skipped; playback never aborts.
    pub fn note_on(
        &mut self,
        bank: &SoundFontBank,
        key: u8,
        velocity: u8,
        sample_rate: f32,
        now: u64,
    ) -> usize {
        if velocity == 0 {
            self.note_off(key);
            return 0;
        }
        if self.muted {
            return 0;
        }

        let preset_index = match self.preset_index {
            Some(index) => index,
            None => match bank.find_preset_fallback(self.bank(), self.program) {
                Some(index) => {
                    self.preset_index = Some(index);
                    index
                }
                None => {
                    log::warn!("channel {}: no preset for note-on", self.number);
                    return 0;
                }
            },
        };

        if self.mono_mode {
            for voice in &mut self.voices {
                if !voice.is_in_release() {
                    voice.release();
                }
            }
        }

        let mut scratch = std::mem::take(&mut self.scratch);
        bank.resolve_note(preset_index, key, velocity, &mut scratch);

        let mut started = 0;
        for resolution in scratch.drain(..) {
            let Some(sample) = bank.samples.get(resolution.sample_index) else {
                log::warn!(
                    "channel {}: zone resolved to missing sample {}",
                    self.number,
                    resolution.sample_index
                );
                continue;
            };

            let inputs = ModulatorInputs {
                controllers: &self.controllers,
                velocity,
                key,
                poly_pressure: self.poly_pressure[key as usize],
                channel_pressure: self.channel_pressure,
                pitch_wheel: self.pitch_wheel,
                pitch_wheel_range: self.pitch_bend_range_semitones,
            };
            let voice = Voice::new(sample, resolution, key, velocity, sample_rate, now, &inputs);

            // A nonzero exclusive class silences its class-mates first
            let class = voice.exclusive_class();
            if class != 0 {
                for other in &mut self.voices {
                    if other.exclusive_class() == class {
                        other.kill();
                    }
                }
            }

            self.voices.push(voice);
            started += 1;
        }
        self.scratch = scratch;

        if started > 0 {
            self.last_key = Some(key);
        }
        started
    }

    /// Release (or sustain) every voice playing `key`.
    pub fn note_off(&mut self, key: u8) {
        let hold = self.hold_pedal_down();
        for voice in &mut self.voices {
            if voice.key() == key && !voice.is_in_release() && !voice.sustained {
                if hold {
                    voice.sustained = true;
                } else {
                    voice.release();
                }
            }
        }
    }

    /// Release everything gracefully.
    pub fn release_all(&mut self) {
        for voice in &mut self.voices {
            if !voice.is_in_release() {
                voice.release();
            }
        }
    }

    /// Silence everything now.
    pub fn kill_all(&mut self) {
        for voice in &mut self.voices {
            voice.kill();
        }
    }

    pub fn controller_change(&mut self, controller: u8, value: u8) {
        let controller = controller & 0x7F;
        let value = value & 0x7F;

        match controller {
            cc::ALL_SOUND_OFF => {
                self.kill_all();
                return;
            }
            cc::RESET_CONTROLLERS => {
                self.reset_controllers();
                return;
            }
            cc::ALL_NOTES_OFF | cc::OMNI_OFF | cc::OMNI_ON => {
                // Omni mode changes imply all-notes-off; the mode itself
                // is meaningless for a single-input synth
                self.release_all();
                return;
            }
            cc::MONO_ON => {
                self.release_all();
                self.mono_mode = true;
                return;
            }
            cc::POLY_ON => {
                self.release_all();
                self.mono_mode = false;
                return;
            }
            _ => {}
        }

        if self.locked[controller as usize] {
            return;
        }
        let previous = self.controllers[controller as usize];
        self.controllers[controller as usize] = value;

        match controller {
            cc::BANK_SELECT => self.bank_msb = value,
            cc::BANK_SELECT_LSB => self.bank_lsb = value,
            cc::SUSTAIN_PEDAL => {
                if previous >= 64 && value < 64 {
                    // Pedal lifted: sustained voices finally release
                    for voice in &mut self.voices {
                        if voice.sustained {
                            voice.release();
                        }
                    }
                }
            }
            cc::DATA_ENTRY_MSB => self.data_entry_msb(value),
            cc::DATA_ENTRY_LSB => self.data_entry_lsb(value),
            cc::RPN_LSB => {
                let msb = u16::from(self.controllers[cc::RPN_MSB as usize]);
                self.select_rpn(msb << 7 | u16::from(value));
            }
            cc::RPN_MSB => {
                let lsb = u16::from(self.controllers[cc::RPN_LSB as usize]);
                self.select_rpn(u16::from(value) << 7 | lsb);
            }
            cc::NRPN_LSB => {
                let msb = u16::from(self.controllers[cc::NRPN_MSB as usize]);
                self.data_entry = DataEntryTarget::Nrpn(msb << 7 | u16::from(value));
            }
            cc::NRPN_MSB => {
                let lsb = u16::from(self.controllers[cc::NRPN_LSB as usize]);
                self.data_entry = DataEntryTarget::Nrpn(u16::from(value) << 7 | lsb);
            }
            _ => {}
        }

        self.refresh_voices_depending_on(ModulatorSourceKind::Controller(controller));
    }

    fn select_rpn(&mut self, parameter: u16) {
        self.data_entry = if parameter == rpn::NULL {
            DataEntryTarget::None
        } else {
            DataEntryTarget::Rpn(parameter)
        };
    }

    fn data_entry_msb(&mut self, value: u8) {
        match self.data_entry {
            DataEntryTarget::Rpn(rpn::PITCH_BEND_RANGE) => {
                let cents = self.pitch_bend_range_semitones.fract();
                self.pitch_bend_range_semitones = f32::from(value) + cents;
                self.refresh_voices_depending_on(ModulatorSourceKind::PitchWheelRange);
            }
            DataEntryTarget::Rpn(rpn::FINE_TUNING) => {
                // 14-bit centered value spanning ±100 cents; MSB alone
                // carries ±64 steps of 100/64 cents
                let lsb = self.controllers[cc::DATA_ENTRY_LSB as usize];
                let raw = i32::from(value) << 7 | i32::from(lsb);
                self.fine_tune_cents = (raw - 8192) as f32 * (100.0 / 8192.0);
            }
            DataEntryTarget::Rpn(rpn::COARSE_TUNING) => {
                self.coarse_tune_semitones = f32::from(i16::from(value) - 64);
            }
            DataEntryTarget::Nrpn(parameter) => {
                log::debug!(
                    "channel {}: NRPN {:#06x} data entry {} ignored",
                    self.number,
                    parameter,
                    value
                );
            }
            _ => {}
        }
    }

    fn data_entry_lsb(&mut self, value: u8) {
        match self.data_entry {
            DataEntryTarget::Rpn(rpn::PITCH_BEND_RANGE) => {
                let semitones = self.pitch_bend_range_semitones.trunc();
                self.pitch_bend_range_semitones = semitones + f32::from(value) / 100.0;
                self.refresh_voices_depending_on(ModulatorSourceKind::PitchWheelRange);
            }
            DataEntryTarget::Rpn(rpn::FINE_TUNING) => {
                let msb = self.controllers[cc::DATA_ENTRY_MSB as usize];
                let raw = i32::from(msb) << 7 | i32::from(value);
                self.fine_tune_cents = (raw - 8192) as f32 * (100.0 / 8192.0);
            }
            _ => {}
        }
    }

    pub fn set_pitch_wheel(&mut self, value: u16) {
        self.pitch_wheel = value.min(16383);
        self.refresh_voices_depending_on(ModulatorSourceKind::PitchWheel);
    }

    pub fn set_channel_pressure(&mut self, value: u8) {
        self.channel_pressure = value & 0x7F;
        self.refresh_voices_depending_on(ModulatorSourceKind::ChannelPressure);
    }

    pub fn set_poly_pressure(&mut self, key: u8, value: u8) {
        self.poly_pressure[(key & 0x7F) as usize] = value & 0x7F;
        self.refresh_voices_depending_on(ModulatorSourceKind::PolyPressure);
    }

    pub fn program_change(&mut self, bank: &SoundFontBank, program: u8) {
        self.program = program & 0x7F;
        self.preset_index = bank.find_preset_fallback(self.bank(), self.program);
        if self.preset_index.is_none() {
            log::warn!(
                "channel {}: no preset for bank {} program {}",
                self.number,
                self.bank(),
                self.program
            );
        }
    }

    pub fn set_percussion(&mut self, bank: &SoundFontBank, drums: bool) {
        self.percussion = drums;
        self.preset_index = bank.find_preset_fallback(self.bank(), self.program);
    }

    /// `resetAllControllers`: restore the default vector on every
    /// controller that isn't locked, recenter the wheel, clear pressures
    /// and data-entry selection. Bank, program and tuning survive.
    pub fn reset_controllers(&mut self) {
        for index in 0..128 {
            if !self.locked[index] {
                self.controllers[index] = default_controller_value(index as u8);
            }
        }
        self.pitch_wheel = 8192;
        self.channel_pressure = 0;
        self.poly_pressure = [0; 128];
        self.data_entry = DataEntryTarget::None;
        self.refresh_all_voices();
    }

    /// Power-on state: everything, including locks, tuning and preset.
    pub fn full_reset(&mut self, bank: &SoundFontBank) {
        self.locked = [false; 128];
        self.reset_controllers();
        self.bank_msb = 0;
        self.bank_lsb = 0;
        self.program = 0;
        self.percussion = self.number % 16 == 9;
        self.pitch_bend_range_semitones = 2.0;
        self.fine_tune_cents = 0.0;
        self.coarse_tune_semitones = 0.0;
        self.mono_mode = false;
        self.last_key = None;
        self.muted = false;
        self.kill_all();
        self.preset_index = bank.find_preset_fallback(self.bank(), self.program);
    }

    /// Drop finished voices. Called by the synth after each block.
    pub fn reap_finished(&mut self) {
        self.voices.retain(|v| !v.is_finished());
    }

    fn refresh_voices_depending_on(&mut self, kind: ModulatorSourceKind) {
        let controllers = &self.controllers;
        let poly_pressure = &self.poly_pressure;
        let channel_pressure = self.channel_pressure;
        let pitch_wheel = self.pitch_wheel;
        let range = self.pitch_bend_range_semitones;
        for voice in &mut self.voices {
            if !voice.depends_on(kind) {
                continue;
            }
            let inputs = ModulatorInputs {
                controllers,
                velocity: voice.velocity(),
                key: voice.key(),
                poly_pressure: poly_pressure[voice.key() as usize],
                channel_pressure,
                pitch_wheel,
                pitch_wheel_range: range,
            };
            voice.update_modulators(&inputs);
        }
    }

    fn refresh_all_voices(&mut self) {
        let controllers = &self.controllers;
        let poly_pressure = &self.poly_pressure;
        let channel_pressure = self.channel_pressure;
        let pitch_wheel = self.pitch_wheel;
        let range = self.pitch_bend_range_semitones;
        for voice in &mut self.voices {
            let inputs = ModulatorInputs {
                controllers,
                velocity: voice.velocity(),
                key: voice.key(),
                poly_pressure: poly_pressure[voice.key() as usize],
                channel_pressure,
                pitch_wheel,
                pitch_wheel_range: range,
            };
            voice.update_modulators(&inputs);
        }
    }
}
