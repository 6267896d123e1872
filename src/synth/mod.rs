//! The synthesizer core.
//!
//! Owns the channels, the three stereo mix buses and the effect units, and
//! runs on the audio thread. Each render call drains the control queue,
//! then renders every live voice into the dry/reverb/chorus buses, feeds
//! the effect buses through their processors and sums the result into the
//! caller's output pair. Block sizes above [`crate::MAX_BLOCK_SIZE`] are
//! chunked; the per-block buffers are preallocated up front so the render
//! path never allocates.

pub mod channel;
pub mod event;
pub mod message;
pub mod voice;

use std::sync::Arc;

use rtrb::{Consumer, Producer};

use crate::dsp::chorus::Chorus;
use crate::dsp::reverb::ConvolutionReverb;
use crate::error::SynthError;
use crate::io::midi::{MidiMessage, MidiParser, SysEx};
use crate::soundfont::SoundFontBank;
use crate::{SynthConfig, MAX_BLOCK_SIZE};

use channel::Channel;
use event::{EventOutbox, SynthEvent};
use message::SynthMessage;
use voice::VoiceBuses;

/// Hard ceiling on channels, enough for two full MIDI ports.
pub const MAX_CHANNELS: usize = 32;

/// Counters for everything the audio thread recovered from locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderStats {
    /// Events lost because the outbound queue was full.
    pub dropped_events: u64,
    /// Voices removed to honor the polyphony cap.
    pub stolen_voices: u64,
    /// Raw MIDI bytes the parser had to skip.
    pub skipped_bytes: u64,
}

pub struct Synthesizer {
    bank: Arc<SoundFontBank>,
    channels: Vec<Channel>,
    sample_rate: f32,
    voice_cap: usize,
    master_gain: f32,

    reverb: ConvolutionReverb,
    chorus: Chorus,
    reverb_enabled: bool,
    chorus_enabled: bool,

    dry_left: Vec<f32>,
    dry_right: Vec<f32>,
    reverb_left: Vec<f32>,
    reverb_right: Vec<f32>,
    chorus_left: Vec<f32>,
    chorus_right: Vec<f32>,

    messages: Option<Consumer<SynthMessage>>,
    events: EventOutbox,
    parser: MidiParser,

    /// Samples rendered since construction; voice age reference.
    sample_clock: u64,
    stolen_voices: u64,
    skipped_bytes: u64,
}

impl Synthesizer {
    /// Build a synthesizer over a validated bank.
    pub fn new(bank: Arc<SoundFontBank>, config: &SynthConfig) -> Result<Self, SynthError> {
        bank.validate()?;

        let sample_rate = config.sample_rate as f32;
        let channel_count = config.channel_count.clamp(1, MAX_CHANNELS);
        let mut channels: Vec<Channel> = (0..channel_count).map(Channel::new).collect();
        for channel in &mut channels {
            channel.full_reset(&bank);
        }

        let impulse = config
            .reverb_impulse
            .clone()
            .unwrap_or_else(|| ConvolutionReverb::default_impulse_response(sample_rate));

        Ok(Self {
            reverb: ConvolutionReverb::new(impulse),
            chorus: Chorus::new(sample_rate, &config.chorus),
            reverb_enabled: config.reverb_enabled,
            chorus_enabled: config.chorus_enabled,
            channels,
            bank,
            sample_rate,
            voice_cap: config.voice_cap.max(1),
            master_gain: 1.0,
            dry_left: vec![0.0; MAX_BLOCK_SIZE],
            dry_right: vec![0.0; MAX_BLOCK_SIZE],
            reverb_left: vec![0.0; MAX_BLOCK_SIZE],
            reverb_right: vec![0.0; MAX_BLOCK_SIZE],
            chorus_left: vec![0.0; MAX_BLOCK_SIZE],
            chorus_right: vec![0.0; MAX_BLOCK_SIZE],
            messages: None,
            events: EventOutbox::new(),
            parser: MidiParser::new(),
            sample_clock: 0,
            stolen_voices: 0,
            skipped_bytes: 0,
        })
    }

    /// Attach the control-thread message queue; drained at block top.
    pub fn attach_message_queue(&mut self, consumer: Consumer<SynthMessage>) {
        self.messages = Some(consumer);
    }

    /// Attach the event queue feeding UI/observers.
    pub fn attach_event_queue(&mut self, producer: Producer<SynthEvent>) {
        self.events.attach(producer);
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    pub fn bank(&self) -> &Arc<SoundFontBank> {
        &self.bank
    }

    pub fn voice_count(&self) -> usize {
        self.channels.iter().map(|c| c.voices.len()).sum()
    }

    /// Push an event into the outbox (dropped, never blocking, if full).
    pub fn publish_event(&mut self, event: SynthEvent) {
        self.events.publish(event);
    }

    pub fn stats(&self) -> RenderStats {
        RenderStats {
            dropped_events: self.events.dropped(),
            stolen_voices: self.stolen_voices,
            skipped_bytes: self.skipped_bytes,
        }
    }

    /// Add a channel for multi-port MIDI. Returns its index, or `None` at
    /// the hard limit.
    pub fn add_channel(&mut self) -> Option<usize> {
        if self.channels.len() >= MAX_CHANNELS {
            return None;
        }
        let index = self.channels.len();
        let mut channel = Channel::new(index);
        channel.full_reset(&self.bank);
        self.channels.push(channel);
        self.events.publish(SynthEvent::NewChannel {
            channel: index as u8,
        });
        Some(index)
    }

    /// Grow to at least `count` channels, saturating at the limit.
    pub fn ensure_channel_count(&mut self, count: usize) {
        while self.channels.len() < count.min(MAX_CHANNELS) {
            if self.add_channel().is_none() {
                break;
            }
        }
    }

    fn channel_index(&self, channel: u8) -> usize {
        (channel as usize) % self.channels.len()
    }

    // ------------------------------------------------------------------
    // MIDI dispatch
    // ------------------------------------------------------------------

    pub fn note_on(&mut self, channel: u8, key: u8, velocity: u8) {
        let index = self.channel_index(channel);
        let bank = Arc::clone(&self.bank);
        let started =
            self.channels[index].note_on(&bank, key, velocity, self.sample_rate, self.sample_clock);
        if started > 0 {
            self.enforce_voice_cap();
            self.events.publish(SynthEvent::NoteOn {
                channel,
                key,
                velocity,
            });
        } else if velocity == 0 {
            self.events.publish(SynthEvent::NoteOff { channel, key });
        }
    }

    pub fn note_off(&mut self, channel: u8, key: u8) {
        let index = self.channel_index(channel);
        self.channels[index].note_off(key);
        self.events.publish(SynthEvent::NoteOff { channel, key });
    }

    pub fn controller_change(&mut self, channel: u8, controller: u8, value: u8) {
        let index = self.channel_index(channel);
        self.channels[index].controller_change(controller, value);
        self.events.publish(SynthEvent::ControllerChange {
            channel,
            controller,
            value,
        });
    }

    pub fn program_change(&mut self, channel: u8, program: u8) {
        let index = self.channel_index(channel);
        let bank = Arc::clone(&self.bank);
        self.channels[index].program_change(&bank, program);
        self.events.publish(SynthEvent::ProgramChange {
            channel,
            bank: self.channels[index].bank(),
            program,
        });
    }

    pub fn pitch_wheel(&mut self, channel: u8, value: u16) {
        let index = self.channel_index(channel);
        self.channels[index].set_pitch_wheel(value);
        self.events.publish(SynthEvent::PitchWheel { channel, value });
    }

    pub fn channel_pressure(&mut self, channel: u8, value: u8) {
        let index = self.channel_index(channel);
        self.channels[index].set_channel_pressure(value);
        self.events
            .publish(SynthEvent::ChannelPressure { channel, value });
    }

    pub fn poly_pressure(&mut self, channel: u8, key: u8, value: u8) {
        let index = self.channel_index(channel);
        self.channels[index].set_poly_pressure(key, value);
    }

    /// Release every voice on every channel.
    pub fn release_all(&mut self) {
        for channel in &mut self.channels {
            channel.release_all();
        }
        self.events.publish(SynthEvent::StopAll);
    }

    /// Silence every voice immediately.
    pub fn kill_all(&mut self) {
        for channel in &mut self.channels {
            channel.kill_all();
        }
        self.events.publish(SynthEvent::StopAll);
    }

    /// Transpose one channel by a (possibly fractional) semitone count.
    pub fn set_channel_transpose(&mut self, channel: u8, semitones: f32) {
        let index = self.channel_index(channel);
        self.channels[index].set_transpose(semitones);
    }

    pub fn mute_channel(&mut self, channel: u8, muted: bool) {
        let index = self.channel_index(channel);
        self.channels[index].muted = muted;
        if muted {
            self.channels[index].kill_all();
        }
        self.events.publish(SynthEvent::MuteChannel { channel, muted });
    }

    /// Power-on reset: channels, effects, master gain.
    pub fn system_reset(&mut self) {
        let bank = Arc::clone(&self.bank);
        for channel in &mut self.channels {
            channel.full_reset(&bank);
        }
        self.reverb.reset();
        self.chorus.reset();
        self.master_gain = 1.0;
        self.events.publish(SynthEvent::StopAll);
    }

    /// Dispatch one decoded MIDI message.
    pub fn process_message(&mut self, message: MidiMessage) {
        match message {
            MidiMessage::NoteOn {
                channel,
                key,
                velocity,
            } => self.note_on(channel, key, velocity),
            MidiMessage::NoteOff { channel, key, .. } => self.note_off(channel, key),
            MidiMessage::PolyPressure {
                channel,
                key,
                value,
            } => self.poly_pressure(channel, key, value),
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => self.controller_change(channel, controller, value),
            MidiMessage::ProgramChange { channel, program } => {
                self.program_change(channel, program)
            }
            MidiMessage::ChannelPressure { channel, value } => {
                self.channel_pressure(channel, value)
            }
            MidiMessage::PitchWheel { channel, value } => self.pitch_wheel(channel, value),
            MidiMessage::SystemExclusive(sysex) => self.process_sysex(sysex),
            MidiMessage::SystemReset => self.system_reset(),
            // Song position, clock and sensing belong to the sequencer
            _ => {}
        }
    }

    fn process_sysex(&mut self, sysex: SysEx) {
        match sysex {
            SysEx::GmReset | SysEx::Gm2Reset | SysEx::GsReset | SysEx::XgReset => {
                self.system_reset();
            }
            SysEx::MasterVolume(value) => {
                self.master_gain = f32::from(value) / 16383.0;
            }
            SysEx::GsDrumPart { channel, drums } | SysEx::XgDrumPart { channel, drums } => {
                let index = self.channel_index(channel);
                let bank = Arc::clone(&self.bank);
                self.channels[index].set_percussion(&bank, drums);
                self.events.publish(SynthEvent::DrumChange { channel, drums });
            }
            SysEx::Unrecognized => {}
        }
    }

    /// Feed a raw MIDI byte stream through the running-status parser.
    pub fn send_raw(&mut self, bytes: &[u8]) {
        let mut parser = std::mem::replace(&mut self.parser, MidiParser::new());
        let skipped = parser.parse(bytes, |message| self.process_message(message));
        self.parser = parser;
        if skipped > 0 {
            log::debug!("skipped {skipped} bytes of malformed MIDI");
            self.skipped_bytes += skipped as u64;
        }
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Render stereo output. Both slices must have equal length; any
    /// length is accepted and chunked internally.
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        debug_assert_eq!(left.len(), right.len());
        self.drain_messages();

        let mut offset = 0;
        let frames = left.len().min(right.len());
        while offset < frames {
            let n = (frames - offset).min(MAX_BLOCK_SIZE);
            self.render_block(
                &mut left[offset..offset + n],
                &mut right[offset..offset + n],
            );
            offset += n;
        }
    }

    fn drain_messages(&mut self) {
        let Some(mut consumer) = self.messages.take() else {
            return;
        };
        while let Ok(message) = consumer.pop() {
            match message {
                SynthMessage::Midi(midi) => self.process_message(midi),
                SynthMessage::SetVoiceCap(cap) => self.voice_cap = cap.max(1),
                SynthMessage::SetMasterGain(gain) => self.master_gain = gain.clamp(0.0, 1.0),
                SynthMessage::EnableReverb(enabled) => self.reverb_enabled = enabled,
                SynthMessage::EnableChorus(enabled) => self.chorus_enabled = enabled,
                SynthMessage::MuteChannel { channel, muted } => self.mute_channel(channel, muted),
                SynthMessage::TransposeChannel { channel, semitones } => {
                    self.set_channel_transpose(channel, semitones)
                }
                SynthMessage::AddChannel => {
                    self.add_channel();
                }
                SynthMessage::Reset => self.system_reset(),
            }
        }
        self.messages = Some(consumer);
    }

    fn render_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        let n = left.len();

        self.dry_left[..n].fill(0.0);
        self.dry_right[..n].fill(0.0);
        self.reverb_left[..n].fill(0.0);
        self.reverb_right[..n].fill(0.0);
        self.chorus_left[..n].fill(0.0);
        self.chorus_right[..n].fill(0.0);

        for channel in &mut self.channels {
            if channel.muted {
                continue;
            }
            let params = channel.voice_params();
            for voice in &mut channel.voices {
                let mut buses = VoiceBuses {
                    dry_left: &mut self.dry_left[..n],
                    dry_right: &mut self.dry_right[..n],
                    reverb_left: &mut self.reverb_left[..n],
                    reverb_right: &mut self.reverb_right[..n],
                    chorus_left: &mut self.chorus_left[..n],
                    chorus_right: &mut self.chorus_right[..n],
                };
                voice.render(&params, &mut buses);
            }
            channel.reap_finished();
        }

        left.copy_from_slice(&self.dry_left[..n]);
        right.copy_from_slice(&self.dry_right[..n]);
        if self.reverb_enabled {
            self.reverb
                .process(&self.reverb_left[..n], &self.reverb_right[..n], left, right);
        }
        if self.chorus_enabled {
            self.chorus
                .process(&self.chorus_left[..n], &self.chorus_right[..n], left, right);
        }
        if self.master_gain != 1.0 {
            for (l, r) in left.iter_mut().zip(right.iter_mut()) {
                *l *= self.master_gain;
                *r *= self.master_gain;
            }
        }

        self.sample_clock += n as u64;
    }

    /// Remove the worst voices until the polyphony cap holds. Worst is the
    /// highest current attenuation, oldest first on ties.
    fn enforce_voice_cap(&mut self) {
        while self.voice_count() > self.voice_cap {
            let mut worst: Option<(usize, usize, f32, u64)> = None;
            for (channel_index, channel) in self.channels.iter().enumerate() {
                for (voice_index, voice) in channel.voices.iter().enumerate() {
                    let attenuation = voice.attenuation_db();
                    let age = voice.started_at();
                    let better = match worst {
                        None => true,
                        Some((_, _, worst_att, worst_age)) => {
                            attenuation > worst_att
                                || (attenuation == worst_att && age < worst_age)
                        }
                    };
                    if better {
                        worst = Some((channel_index, voice_index, attenuation, age));
                    }
                }
            }
            let Some((channel_index, voice_index, _, _)) = worst else {
                break;
            };
            self.channels[channel_index].voices.swap_remove(voice_index);
            self.stolen_voices += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soundfont::generator::GeneratorType as Gen;
    use crate::soundfont::{Instrument, Preset, Sample, SampleType, Zone};
    use rtrb::RingBuffer;

    fn sine_bank() -> Arc<SoundFontBank> {
        let pcm: Arc<[i16]> = (0..1200)
            .map(|i| {
                let phase = i as f64 / 100.0 * std::f64::consts::TAU;
                (phase.sin() * 30_000.0) as i16
            })
            .collect();
        Arc::new(SoundFontBank {
            name: "test".into(),
            samples: vec![Sample {
                name: "sine".into(),
                pcm,
                sample_rate: 48_000,
                loop_start: 0,
                loop_end: 1200,
                original_pitch: 69,
                pitch_correction: 0,
                linked_sample: None,
                sample_type: SampleType::Mono,
            }],
            instruments: vec![Instrument {
                name: "sine inst".into(),
                zones: vec![Zone {
                    key_range: (0, 127),
                    vel_range: (0, 127),
                    generators: vec![(Gen::SampleModes, 1)],
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

    fn quiet_config() -> SynthConfig {
        SynthConfig {
            reverb_enabled: false,
            chorus_enabled: false,
            ..SynthConfig::default()
        }
    }

    #[test]
    fn test_renders_signal_after_note_on() {
        let mut synth = Synthesizer::new(sine_bank(), &quiet_config()).unwrap();
        synth.note_on(0, 69, 127);

        let mut left = vec![0.0f32; 4800];
        let mut right = vec![0.0f32; 4800];
        synth.render(&mut left, &mut right);

        assert!(left.iter().any(|&s| s.abs() > 0.001), "expected signal");
        assert!(left.iter().all(|&s| s.abs() <= 1.0), "output must not clip");
    }

    #[test]
    fn test_messages_apply_at_block_top() {
        let mut synth = Synthesizer::new(sine_bank(), &quiet_config()).unwrap();
        let (mut tx, rx) = RingBuffer::new(16);
        synth.attach_message_queue(rx);

        tx.push(SynthMessage::Midi(MidiMessage::NoteOn {
            channel: 0,
            key: 60,
            velocity: 100,
        }))
        .unwrap();

        assert_eq!(synth.voice_count(), 0);
        let mut left = vec![0.0f32; 256];
        let mut right = vec![0.0f32; 256];
        synth.render(&mut left, &mut right);
        assert_eq!(synth.voice_count(), 1);
    }

    #[test]
    fn test_voice_cap_steals_voices() {
        let mut config = quiet_config();
        config.voice_cap = 4;
        let mut synth = Synthesizer::new(sine_bank(), &config).unwrap();

        for key in 40..50 {
            synth.note_on(0, key, 100);
        }
        assert!(synth.voice_count() <= 4);
        assert!(synth.stats().stolen_voices >= 6);
    }

    #[test]
    fn test_event_queue_sees_lifecycle() {
        let mut synth = Synthesizer::new(sine_bank(), &quiet_config()).unwrap();
        let (tx, mut rx) = RingBuffer::new(16);
        synth.attach_event_queue(tx);

        synth.note_on(0, 69, 127);
        synth.note_off(0, 69);

        assert_eq!(
            rx.pop(),
            Ok(SynthEvent::NoteOn {
                channel: 0,
                key: 69,
                velocity: 127
            })
        );
        assert_eq!(rx.pop(), Ok(SynthEvent::NoteOff { channel: 0, key: 69 }));
    }

    #[test]
    fn test_send_raw_running_status() {
        let mut synth = Synthesizer::new(sine_bank(), &quiet_config()).unwrap();
        synth.send_raw(&[0x90, 60, 100, 64, 100, 67, 100]);
        assert_eq!(synth.voice_count(), 3);
    }

    #[test]
    fn test_gm_reset_restores_channels(){
        let mut synth = Synthesizer::new(sine_bank(), &quiet_config()).unwrap();
        synth.controller_change(0, 7, 20);
        synth.pitch_wheel(0, 0);
        synth.send_raw(&[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7]);

        let channel = synth.channel(0).unwrap();
        assert_eq!(channel.controller(7), 100);
        assert_eq!(channel.pitch_wheel(), 8192);
    }

    #[test]
    fn test_master_volume_sysex_scales_output() {
        let mut synth = Synthesizer::new(sine_bank(), &quiet_config()).unwrap();
        synth.note_on(0, 69, 127);
        let mut left = vec![0.0f32; 9600];
        let mut right = vec![0.0f32; 9600];
        synth.render(&mut left, &mut right);
        let full = left.iter().fold(0.0f32, |a, &x| a.max(x.abs()));

        synth.process_message(MidiMessage::SystemExclusive(SysEx::MasterVolume(4096)));
        synth.render(&mut left, &mut right);
        let quarter = left.iter().fold(0.0f32, |a, &x| a.max(x.abs()));
        assert!(
            quarter < full * 0.3,
            "master volume 25% should scale output: {quarter} vs {full}"
        );
    }

    #[test]
    fn test_add_channel_up_to_limit() {
        let mut synth = Synthesizer::new(sine_bank(), &quiet_config()).unwrap();
        assert_eq!(synth.channel_count(), 16);
        synth.ensure_channel_count(MAX_CHANNELS);
        assert_eq!(synth.channel_count(), MAX_CHANNELS);
        assert!(synth.add_channel().is_none());
        // Channel 25 sits at the percussion position of the second port
        assert!(synth.channel(25).unwrap().percussion);
    }

    #[test]
    fn test_drum_part_sysex_toggles_percussion() {
        let mut synth = Synthesizer::new(sine_bank(), &quiet_config()).unwrap();
        assert!(!synth.channel(0).unwrap().percussion);
        synth.process_message(MidiMessage::SystemExclusive(SysEx::GsDrumPart {
            channel: 0,
            drums: true,
        }));
        assert!(synth.channel(0).unwrap().percussion);
        assert_eq!(synth.channel(0).unwrap().bank(), 128);
    }
}
