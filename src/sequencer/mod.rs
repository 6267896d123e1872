/*
Sequencer
=========

Tempo-accurate playback of Standard MIDI Files into a MIDI sink. The file
is decoded once, off the audio thread, into owned per-track event lists
with absolute ticks, plus a tempo map. From then on playback is driven by
wall-clock notifications:

    advance(now) → played = (now - start) * rate
                 → target tick via the tempo map
                 → dispatch every event at tick ≤ target, merged across
                   tracks in tick order

Two operating modes fall out of the sink abstraction rather than a flag:
driving the in-process synthesizer directly, or encoding back to raw MIDI
bytes for an external device. Controller state is tracked by replay, so
both modes seek identically.

Seeking releases all voices, rewinds every track cursor, silently replays
all non-note events up to the target — bank select and data entry are
issued in-order because their effects are stateful, everything else is
coalesced into a final value per controller — and then pushes the
resulting controller/program/pitch-bend image to the sink in one batch.
*/

pub mod tempo;

use midly::{Format, MetaMessage, Smf, Timing, TrackEventKind};

use crate::error::SynthError;
use crate::io::midi::{parse_sysex, MidiMessage};
use crate::synth::event::SynthEvent;
use crate::synth::{Synthesizer, MAX_CHANNELS};
use tempo::{TempoChange, TempoMap};

/// Where sequenced MIDI goes. Implemented by [`Synthesizer`] for direct
/// mode and by [`MidiBytePassthrough`] for external sinks.
pub trait MidiOutput {
    fn midi_message(&mut self, message: MidiMessage);

    /// Grow to at least `count` channels if the backend supports it.
    fn ensure_channels(&mut self, count: usize) {
        let _ = count;
    }

    /// Release everything currently sounding.
    fn stop_all(&mut self);

    /// Playback ran past the last event of every track.
    fn song_ended(&mut self) {}
}

impl MidiOutput for Synthesizer {
    fn midi_message(&mut self, message: MidiMessage) {
        self.process_message(message);
    }

    fn ensure_channels(&mut self, count: usize) {
        self.ensure_channel_count(count);
    }

    fn stop_all(&mut self) {
        self.release_all();
    }

    fn song_ended(&mut self) {
        self.publish_event(SynthEvent::StopAll);
    }
}

/// Encodes messages back to wire bytes for an external MIDI device. The
/// port offset is folded away: bytes only carry four channel bits.
pub struct MidiBytePassthrough<F: FnMut(&[u8])> {
    sink: F,
}

impl<F: FnMut(&[u8])> MidiBytePassthrough<F> {
    pub fn new(sink: F) -> Self {
        Self { sink }
    }
}

impl<F: FnMut(&[u8])> MidiOutput for MidiBytePassthrough<F> {
    fn midi_message(&mut self, mut message: MidiMessage) {
        if let Some(channel) = message.channel() {
            message.set_channel(channel % 16);
        }
        let mut buffer = [0u8; 12];
        let len = message.encode(&mut buffer);
        if len > 0 {
            (self.sink)(&buffer[..len]);
        }
    }

    fn stop_all(&mut self) {
        // All notes off on every channel
        for channel in 0..16u8 {
            self.midi_message(MidiMessage::ControlChange {
                channel,
                controller: 123,
                value: 0,
            });
        }
    }
}

fn convert_message(channel: u8, message: midly::MidiMessage) -> Option<MidiMessage> {
    Some(match message {
        midly::MidiMessage::NoteOff { key, vel } => MidiMessage::NoteOff {
            channel,
            key: key.as_int(),
            velocity: vel.as_int(),
        },
        midly::MidiMessage::NoteOn { key, vel } => MidiMessage::NoteOn {
            channel,
            key: key.as_int(),
            velocity: vel.as_int(),
        },
        midly::MidiMessage::Aftertouch { key, vel } => MidiMessage::PolyPressure {
            channel,
            key: key.as_int(),
            value: vel.as_int(),
        },
        midly::MidiMessage::Controller { controller, value } => MidiMessage::ControlChange {
            channel,
            controller: controller.as_int(),
            value: value.as_int(),
        },
        midly::MidiMessage::ProgramChange { program } => MidiMessage::ProgramChange {
            channel,
            program: program.as_int(),
        },
        midly::MidiMessage::ChannelAftertouch { vel } => MidiMessage::ChannelPressure {
            channel,
            value: vel.as_int(),
        },
        midly::MidiMessage::PitchBend { bend } => MidiMessage::PitchWheel {
            channel,
            value: bend.0.as_int(),
        },
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Message(MidiMessage),
    Tempo(u32),
    MidiPort(u8),
    EndOfTrack,
}

#[derive(Debug, Clone, Copy)]
struct TimedEvent {
    tick: u32,
    kind: EventKind,
}

struct SequencerTrack {
    events: Vec<TimedEvent>,
    cursor: usize,
    /// Current MIDI port; each port maps to a block of 16 channels.
    port: u8,
}

/// Recorded per-channel state during a silent seek replay.
#[derive(Debug, Clone, Copy)]
struct ChannelImage {
    controllers: [i16; 128],
    program: i16,
    pitch_wheel: i32,
    channel_pressure: i16,
}

impl ChannelImage {
    const EMPTY: Self = Self {
        controllers: [-1; 128],
        program: -1,
        pitch_wheel: -1,
        channel_pressure: -1,
    };
}

pub struct Sequencer {
    tracks: Vec<SequencerTrack>,
    tempo_map: TempoMap,
    duration_ticks: u32,
    duration_seconds: f64,

    /// Song time of the playhead, in seconds at rate 1.
    played_seconds: f64,
    /// Wall-clock instant that corresponds to song time zero, given the
    /// current rate.
    absolute_start: f64,
    playback_rate: f64,
    paused: bool,
    finished: bool,

    loop_start_tick: u32,
    loop_end_tick: u32,
    loop_count: u32,

    seek_images: Vec<ChannelImage>,
}

impl Sequencer {
    /// Parse an SMF byte stream. Format 2 and SMPTE timing are rejected;
    /// everything else is decoded into owned events.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SynthError> {
        let smf =
            Smf::parse(data).map_err(|e| SynthError::InvalidMidiEvent(e.to_string()))?;
        Self::from_smf(&smf)
    }

    pub fn from_smf(smf: &Smf) -> Result<Self, SynthError> {
        if smf.header.format == Format::Sequential {
            return Err(SynthError::InvalidMidiEvent(
                "format 2 (sequential) files are not supported".into(),
            ));
        }
        let ticks_per_quarter = match smf.header.timing {
            Timing::Metrical(tpq) => u32::from(tpq.as_int()),
            Timing::Timecode(..) => return Err(SynthError::UnsupportedTimeDivision),
        };

        let mut tracks = Vec::with_capacity(smf.tracks.len());
        let mut tempo_changes = Vec::new();
        let mut duration_ticks = 0u32;

        for track in &smf.tracks {
            let mut events = Vec::with_capacity(track.len());
            let mut tick = 0u32;
            for event in track {
                tick = tick.saturating_add(event.delta.as_int());
                let kind = match event.kind {
                    TrackEventKind::Midi { channel, message } => {
                        convert_message(channel.as_int(), message).map(EventKind::Message)
                    }
                    TrackEventKind::SysEx(data) => {
                        let body = data.strip_suffix(&[0xF7]).unwrap_or(data);
                        Some(EventKind::Message(MidiMessage::SystemExclusive(
                            parse_sysex(body),
                        )))
                    }
                    TrackEventKind::Meta(MetaMessage::Tempo(micros)) => {
                        tempo_changes.push(TempoChange {
                            tick,
                            micros_per_quarter: micros.as_int(),
                        });
                        Some(EventKind::Tempo(micros.as_int()))
                    }
                    TrackEventKind::Meta(MetaMessage::MidiPort(port)) => {
                        Some(EventKind::MidiPort(port.as_int()))
                    }
                    TrackEventKind::Meta(MetaMessage::EndOfTrack) => Some(EventKind::EndOfTrack),
                    _ => None,
                };
                if let Some(kind) = kind {
                    events.push(TimedEvent { tick, kind });
                }
            }
            duration_ticks = duration_ticks.max(tick);
            tracks.push(SequencerTrack {
                events,
                cursor: 0,
                port: 0,
            });
        }

        let tempo_map = TempoMap::new(ticks_per_quarter, tempo_changes);
        let duration_seconds = tempo_map.seconds_at_tick(f64::from(duration_ticks));

        Ok(Self {
            tracks,
            tempo_map,
            duration_ticks,
            duration_seconds,
            played_seconds: 0.0,
            absolute_start: 0.0,
            playback_rate: 1.0,
            paused: true,
            finished: false,
            loop_start_tick: 0,
            loop_end_tick: duration_ticks,
            loop_count: 0,
            seek_images: vec![ChannelImage::EMPTY; MAX_CHANNELS],
        })
    }

    pub fn duration_ticks(&self) -> u32 {
        self.duration_ticks
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    pub fn played_seconds(&self) -> f64 {
        self.played_seconds
    }

    pub fn current_tick(&self) -> f64 {
        self.tempo_map.tick_at_seconds(self.played_seconds)
    }

    pub fn tempo_map(&self) -> &TempoMap {
        &self.tempo_map
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    /// Start or resume playback at the given wall-clock time.
    pub fn play(&mut self, now_seconds: f64) {
        self.absolute_start = now_seconds - self.played_seconds / self.playback_rate;
        self.paused = false;
    }

    /// Freeze the playhead. Voices keep ringing; time stops advancing.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Stop: release everything and rewind to the top.
    pub fn stop(&mut self, sink: &mut impl MidiOutput) {
        sink.stop_all();
        self.paused = true;
        self.finished = false;
        self.played_seconds = 0.0;
        for track in &mut self.tracks {
            track.cursor = 0;
            track.port = 0;
        }
    }

    /// Change the time-scaling factor; `playedTime` stays continuous.
    pub fn set_playback_rate(&mut self, rate: f64, now_seconds: f64) {
        let rate = rate.clamp(0.01, 100.0);
        self.playback_rate = rate;
        if !self.paused {
            self.absolute_start = now_seconds - self.played_seconds / rate;
        }
    }

    /// Repeat `[start_tick, end_tick)` the given number of times.
    pub fn set_loop(&mut self, start_tick: u32, end_tick: u32, count: u32) {
        self.loop_start_tick = start_tick;
        self.loop_end_tick = end_tick.min(self.duration_ticks).max(start_tick + 1);
        self.loop_count = count;
    }

    /// Advance the playhead to `now` and dispatch everything due.
    pub fn advance(&mut self, now_seconds: f64, sink: &mut impl MidiOutput) {
        if self.paused || self.finished {
            return;
        }

        let mut target_seconds =
            ((now_seconds - self.absolute_start) * self.playback_rate).max(0.0);

        // Loop region: dispatch to the boundary, rewind, keep going
        while self.loop_count > 0 {
            let loop_end_seconds = self
                .tempo_map
                .seconds_at_tick(f64::from(self.loop_end_tick));
            if target_seconds < loop_end_seconds {
                break;
            }
            self.dispatch_until(self.loop_end_tick, sink);
            let leftover = target_seconds - loop_end_seconds;
            self.replay_to(self.loop_start_tick, sink);
            self.loop_count -= 1;

            let loop_start_seconds = self
                .tempo_map
                .seconds_at_tick(f64::from(self.loop_start_tick));
            target_seconds = loop_start_seconds + leftover;
            self.absolute_start = now_seconds - target_seconds / self.playback_rate;
        }

        let target_tick = self.tempo_map.tick_at_seconds(target_seconds);
        self.dispatch_until(target_tick.floor() as u32 + 1, sink);
        self.played_seconds = target_seconds;

        if self.tracks.iter().all(|t| t.cursor >= t.events.len()) && !self.finished {
            self.finished = true;
            sink.song_ended();
        }
    }

    /// Dispatch every event with tick < `boundary`, merged across tracks
    /// in tick order.
    fn dispatch_until(&mut self, boundary: u32, sink: &mut impl MidiOutput) {
        loop {
            let mut best: Option<(usize, u32)> = None;
            for (index, track) in self.tracks.iter().enumerate() {
                if let Some(event) = track.events.get(track.cursor) {
                    if event.tick < boundary
                        && best.map_or(true, |(_, tick)| event.tick < tick)
                    {
                        best = Some((index, event.tick));
                    }
                }
            }
            let Some((index, _)) = best else {
                return;
            };
            let event = self.tracks[index].events[self.tracks[index].cursor];
            self.tracks[index].cursor += 1;

            match event.kind {
                EventKind::Message(message) => {
                    let port = self.tracks[index].port;
                    self.send_with_port(message, port, sink);
                }
                EventKind::MidiPort(port) => self.tracks[index].port = port,
                // The tempo map was precomputed at load; nothing to do live
                EventKind::Tempo(_) | EventKind::EndOfTrack => {}
            }
        }
    }

    fn send_with_port(&self, mut message: MidiMessage, port: u8, sink: &mut impl MidiOutput) {
        if let Some(channel) = message.channel() {
            let effective = (usize::from(port) * 16 + usize::from(channel)) % MAX_CHANNELS;
            sink.ensure_channels(effective + 1);
            message.set_channel(effective as u8);
        }
        sink.midi_message(message);
    }

    pub fn set_time_seconds(
        &mut self,
        seconds: f64,
        now_seconds: f64,
        sink: &mut impl MidiOutput,
    ) {
        let tick = self.tempo_map.tick_at_seconds(seconds.max(0.0));
        self.set_time_ticks(tick.floor() as u32, now_seconds, sink);
    }

    /// Seek: silence, rewind, silently replay non-note state up to the
    /// target, push the batched image, and re-base the clock.
    pub fn set_time_ticks(&mut self, tick: u32, now_seconds: f64, sink: &mut impl MidiOutput) {
        let tick = tick.min(self.duration_ticks);
        self.replay_to(tick, sink);
        self.played_seconds = self.tempo_map.seconds_at_tick(f64::from(tick));
        self.absolute_start = now_seconds - self.played_seconds / self.playback_rate;
        self.finished = false;
    }

    /// The silent-replay core shared by seek and loop rewind.
    fn replay_to(&mut self, target_tick: u32, sink: &mut impl MidiOutput) {
        sink.stop_all();
        for track in &mut self.tracks {
            track.cursor = 0;
            track.port = 0;
        }
        for image in &mut self.seek_images {
            *image = ChannelImage::EMPTY;
        }

        loop {
            let mut best: Option<(usize, u32)> = None;
            for (index, track) in self.tracks.iter().enumerate() {
                if let Some(event) = track.events.get(track.cursor) {
                    if event.tick < target_tick
                        && best.map_or(true, |(_, tick)| event.tick < tick)
                    {
                        best = Some((index, event.tick));
                    }
                }
            }
            let Some((index, _)) = best else {
                break;
            };
            let event = self.tracks[index].events[self.tracks[index].cursor];
            self.tracks[index].cursor += 1;

            match event.kind {
                EventKind::MidiPort(port) => self.tracks[index].port = port,
                EventKind::Tempo(_) | EventKind::EndOfTrack => {}
                EventKind::Message(message) => {
                    let port = self.tracks[index].port;
                    self.record_or_forward(message, port, sink);
                }
            }
        }

        // Push the coalesced state in one batch
        for (channel, image) in self.seek_images.iter().enumerate() {
            let channel = channel as u8;
            for (controller, value) in image.controllers.iter().enumerate() {
                if *value >= 0 {
                    sink.midi_message(MidiMessage::ControlChange {
                        channel,
                        controller: controller as u8,
                        value: *value as u8,
                    });
                }
            }
            if image.program >= 0 {
                sink.midi_message(MidiMessage::ProgramChange {
                    channel,
                    program: image.program as u8,
                });
            }
            if image.pitch_wheel >= 0 {
                sink.midi_message(MidiMessage::PitchWheel {
                    channel,
                    value: image.pitch_wheel as u16,
                });
            }
            if image.channel_pressure >= 0 {
                sink.midi_message(MidiMessage::ChannelPressure {
                    channel,
                    value: image.channel_pressure as u8,
                });
            }
        }
    }

    fn record_or_forward(&mut self, message: MidiMessage, port: u8, sink: &mut impl MidiOutput) {
        let Some(channel) = message.channel() else {
            // Resets and drum-map selects have semantic side effects
            if matches!(
                message,
                MidiMessage::SystemExclusive(_) | MidiMessage::SystemReset
            ) {
                self.send_with_port(message, port, sink);
            }
            return;
        };
        let index = (usize::from(port) * 16 + usize::from(channel)) % MAX_CHANNELS;

        match message {
            // Notes never replay during a seek
            MidiMessage::NoteOn { .. }
            | MidiMessage::NoteOff { .. }
            | MidiMessage::PolyPressure { .. } => {}

            MidiMessage::ControlChange {
                controller, value, ..
            } => {
                let image = &mut self.seek_images[index];
                match controller {
                    // Stateful selectors and data entry keep their order
                    0 | 6 | 32 | 38 | 98 | 99 | 100 | 101 => {
                        self.send_with_port(message, port, sink);
                    }
                    // Reset wipes what was recorded so far, then forwards
                    121 => {
                        image.controllers = [-1; 128];
                        image.pitch_wheel = -1;
                        image.channel_pressure = -1;
                        self.send_with_port(message, port, sink);
                    }
                    // Mode messages are meaningless with no notes sounding
                    120 | 122..=127 => {}
                    _ => image.controllers[usize::from(controller)] = i16::from(value),
                }
            }
            MidiMessage::ProgramChange { program, .. } => {
                self.seek_images[index].program = i16::from(program);
            }
            MidiMessage::PitchWheel { value, .. } => {
                self.seek_images[index].pitch_wheel = i32::from(value);
            }
            MidiMessage::ChannelPressure { value, .. } => {
                self.seek_images[index].channel_pressure = i16::from(value);
            }
            _ => {}
        }
    }
}
