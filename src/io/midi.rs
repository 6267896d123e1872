//! MIDI 1.0 wire format: message model, byte-stream parser, encoder.
//!
//! The parser consumes a raw byte stream with full running-status support
//! and hands decoded [`MidiMessage`]s to a sink closure. Malformed bytes are
//! skipped and counted, never fatal — a live MIDI cable drops bytes and the
//! engine has to keep playing. The encoder is the inverse, used by the
//! sequencer's passthrough mode to re-emit events as bytes.

/// Recognized System Exclusive payloads. Unrecognized vendor data decodes
/// to `Unrecognized` and is otherwise ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysEx {
    /// Universal non-realtime GM System On.
    GmReset,
    /// Universal non-realtime GM2 System On.
    Gm2Reset,
    /// Universal realtime master volume, 14-bit.
    MasterVolume(u16),
    /// Roland GS reset (DT1 write to the system mode address).
    GsReset,
    /// Roland GS "use for rhythm part" toggle for one channel.
    GsDrumPart { channel: u8, drums: bool },
    /// Yamaha XG System On.
    XgReset,
    /// Yamaha XG part-mode select for one channel.
    XgDrumPart { channel: u8, drums: bool },
    Unrecognized,
}

/// One decoded MIDI message. Channel messages carry their channel; system
/// messages do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOff { channel: u8, key: u8, velocity: u8 },
    NoteOn { channel: u8, key: u8, velocity: u8 },
    PolyPressure { channel: u8, key: u8, value: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelPressure { channel: u8, value: u8 },
    /// 14-bit value, 8192 = center.
    PitchWheel { channel: u8, value: u16 },
    SystemExclusive(SysEx),
    SongPosition(u16),
    SongSelect(u8),
    TuneRequest,
    TimingClock,
    Start,
    Continue,
    Stop,
    ActiveSensing,
    SystemReset,
}

impl MidiMessage {
    /// The channel this message addresses, if it is a channel message.
    pub fn channel(&self) -> Option<u8> {
        match self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchWheel { channel, .. } => Some(*channel),
            _ => None,
        }
    }

    /// Rewrite the channel in place; no-op for system messages. The
    /// sequencer uses this to apply MIDI-port offsets.
    pub fn set_channel(&mut self, new_channel: u8) {
        match self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchWheel { channel, .. } => *channel = new_channel,
            _ => {}
        }
    }

    /// Encode to wire bytes. Returns the number of bytes written into
    /// `out`, which must hold at least 12.
    pub fn encode(&self, out: &mut [u8; 12]) -> usize {
        match *self {
            MidiMessage::NoteOff {
                channel,
                key,
                velocity,
            } => {
                out[..3].copy_from_slice(&[0x80 | (channel & 0x0F), key & 0x7F, velocity & 0x7F]);
                3
            }
            MidiMessage::NoteOn {
                channel,
                key,
                velocity,
            } => {
                out[..3].copy_from_slice(&[0x90 | (channel & 0x0F), key & 0x7F, velocity & 0x7F]);
                3
            }
            MidiMessage::PolyPressure {
                channel,
                key,
                value,
            } => {
                out[..3].copy_from_slice(&[0xA0 | (channel & 0x0F), key & 0x7F, value & 0x7F]);
                3
            }
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => {
                out[..3].copy_from_slice(&[
                    0xB0 | (channel & 0x0F),
                    controller & 0x7F,
                    value & 0x7F,
                ]);
                3
            }
            MidiMessage::ProgramChange { channel, program } => {
                out[..2].copy_from_slice(&[0xC0 | (channel & 0x0F), program & 0x7F]);
                2
            }
            MidiMessage::ChannelPressure { channel, value } => {
                out[..2].copy_from_slice(&[0xD0 | (channel & 0x0F), value & 0x7F]);
                2
            }
            MidiMessage::PitchWheel { channel, value } => {
                out[..3].copy_from_slice(&[
                    0xE0 | (channel & 0x0F),
                    (value & 0x7F) as u8,
                    ((value >> 7) & 0x7F) as u8,
                ]);
                3
            }
            MidiMessage::SystemExclusive(sysex) => encode_sysex(sysex, out),
            MidiMessage::SongPosition(value) => {
                out[..3].copy_from_slice(&[
                    0xF2,
                    (value & 0x7F) as u8,
                    ((value >> 7) & 0x7F) as u8,
                ]);
                3
            }
            MidiMessage::SongSelect(song) => {
                out[..2].copy_from_slice(&[0xF3, song & 0x7F]);
                2
            }
            MidiMessage::TuneRequest => {
                out[0] = 0xF6;
                1
            }
            MidiMessage::TimingClock => {
                out[0] = 0xF8;
                1
            }
            MidiMessage::Start => {
                out[0] = 0xFA;
                1
            }
            MidiMessage::Continue => {
                out[0] = 0xFB;
                1
            }
            MidiMessage::Stop => {
                out[0] = 0xFC;
                1
            }
            MidiMessage::ActiveSensing => {
                out[0] = 0xFE;
                1
            }
            MidiMessage::SystemReset => {
                out[0] = 0xFF;
                1
            }
        }
    }
}

fn encode_sysex(sysex: SysEx, out: &mut [u8; 12]) -> usize {
    match sysex {
        SysEx::GmReset => {
            out[..6].copy_from_slice(&[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7]);
            6
        }
        SysEx::Gm2Reset => {
            out[..6].copy_from_slice(&[0xF0, 0x7E, 0x7F, 0x09, 0x03, 0xF7]);
            6
        }
        SysEx::MasterVolume(value) => {
            out[..8].copy_from_slice(&[
                0xF0,
                0x7F,
                0x7F,
                0x04,
                0x01,
                (value & 0x7F) as u8,
                ((value >> 7) & 0x7F) as u8,
                0xF7,
            ]);
            8
        }
        SysEx::GsReset => {
            out[..11].copy_from_slice(&[
                0xF0, 0x41, 0x10, 0x42, 0x12, 0x40, 0x00, 0x7F, 0x00, 0x41, 0xF7,
            ]);
            11
        }
        SysEx::GsDrumPart { channel, drums } => {
            let block = gs_block_from_channel(channel);
            let value: u8 = if drums { 0x01 } else { 0x00 };
            let checksum = gs_checksum(&[0x40, 0x10 | block, 0x15, value]);
            out[..11].copy_from_slice(&[
                0xF0,
                0x41,
                0x10,
                0x42,
                0x12,
                0x40,
                0x10 | block,
                0x15,
                value,
                checksum,
                0xF7,
            ]);
            11
        }
        SysEx::XgReset => {
            out[..9].copy_from_slice(&[0xF0, 0x43, 0x10, 0x4C, 0x00, 0x00, 0x7E, 0x00, 0xF7]);
            9
        }
        SysEx::XgDrumPart { channel, drums } => {
            out[..9].copy_from_slice(&[
                0xF0,
                0x43,
                0x10,
                0x4C,
                0x08,
                channel & 0x0F,
                0x07,
                if drums { 0x02 } else { 0x00 },
                0xF7,
            ]);
            9
        }
        SysEx::Unrecognized => 0,
    }
}

/// GS addresses rhythm parts by block: block 0 is channel 9, blocks 1..=9
/// are channels 0..=8, blocks 10..=15 are channels 10..=15.
fn gs_channel_from_block(block: u8) -> u8 {
    match block {
        0 => 9,
        1..=9 => block - 1,
        _ => block,
    }
}

fn gs_block_from_channel(channel: u8) -> u8 {
    match channel {
        9 => 0,
        0..=8 => channel + 1,
        _ => channel & 0x0F,
    }
}

fn gs_checksum(data: &[u8]) -> u8 {
    let sum: u32 = data.iter().map(|&b| u32::from(b)).sum();
    ((128 - (sum % 128)) % 128) as u8
}

/// Decode a complete SysEx body (bytes between F0 and F7, exclusive).
pub fn parse_sysex(body: &[u8]) -> SysEx {
    match body {
        // Universal non-realtime, device 7F, General MIDI sub-ids
        [0x7E, 0x7F, 0x09, 0x01] | [0x7E, 0x7F, 0x09, 0x02] => SysEx::GmReset,
        [0x7E, 0x7F, 0x09, 0x03] => SysEx::Gm2Reset,
        // Universal realtime master volume
        [0x7F, 0x7F, 0x04, 0x01, lsb, msb] => {
            SysEx::MasterVolume(u16::from(*msb) << 7 | u16::from(*lsb))
        }
        // Roland GS DT1 writes
        [0x41, _, 0x42, 0x12, 0x40, 0x00, 0x7F, 0x00, _] => SysEx::GsReset,
        [0x41, _, 0x42, 0x12, 0x40, part, 0x15, value, _] if part & 0xF0 == 0x10 => {
            SysEx::GsDrumPart {
                channel: gs_channel_from_block(part & 0x0F),
                drums: *value != 0,
            }
        }
        // Yamaha XG
        [0x43, _, 0x4C, 0x00, 0x00, 0x7E, 0x00] => SysEx::XgReset,
        [0x43, _, 0x4C, 0x08, part, 0x07, mode] => SysEx::XgDrumPart {
            channel: part & 0x0F,
            drums: *mode != 0,
        },
        _ => SysEx::Unrecognized,
    }
}

/// Streaming byte parser with running status.
pub struct MidiParser {
    running_status: u8,
}

impl MidiParser {
    pub fn new() -> Self {
        Self { running_status: 0 }
    }

    /// Decode `bytes`, invoking `sink` per message. Returns the number of
    /// bytes that had to be skipped.
    pub fn parse(&mut self, bytes: &[u8], mut sink: impl FnMut(MidiMessage)) -> usize {
        let mut skipped = 0;
        let mut i = 0;

        while i < bytes.len() {
            let byte = bytes[i];

            // System real-time: single byte, valid anywhere, does not
            // disturb running status
            if byte >= 0xF8 {
                if let Some(message) = real_time_message(byte) {
                    sink(message);
                } else {
                    skipped += 1;
                }
                i += 1;
                continue;
            }

            let status = if byte & 0x80 != 0 {
                i += 1;
                byte
            } else if self.running_status != 0 {
                self.running_status
            } else {
                // Stray data byte with nothing to attach it to
                skipped += 1;
                i += 1;
                continue;
            };

            match status & 0xF0 {
                0xF0 => {
                    // System common clears running status
                    self.running_status = 0;
                    match status {
                        0xF0 => {
                            // Collect until EOX
                            let start = i;
                            while i < bytes.len() && bytes[i] != 0xF7 {
                                i += 1;
                            }
                            if i < bytes.len() {
                                sink(MidiMessage::SystemExclusive(parse_sysex(
                                    &bytes[start..i],
                                )));
                                i += 1;
                            } else {
                                // Truncated SysEx: drop it
                                skipped += i - start + 1;
                            }
                        }
                        0xF2 => {
                            if let Some((lsb, msb)) = take_two(bytes, &mut i) {
                                sink(MidiMessage::SongPosition(
                                    u16::from(msb) << 7 | u16::from(lsb),
                                ));
                            } else {
                                skipped += 1;
                            }
                        }
                        0xF3 => {
                            if let Some(song) = take_one(bytes, &mut i) {
                                sink(MidiMessage::SongSelect(song));
                            } else {
                                skipped += 1;
                            }
                        }
                        0xF6 => sink(MidiMessage::TuneRequest),
                        _ => skipped += 1,
                    }
                }
                kind => {
                    self.running_status = status;
                    let channel = status & 0x0F;
                    let message = match kind {
                        0x80 => take_two(bytes, &mut i).map(|(key, velocity)| {
                            MidiMessage::NoteOff {
                                channel,
                                key,
                                velocity,
                            }
                        }),
                        0x90 => take_two(bytes, &mut i).map(|(key, velocity)| {
                            MidiMessage::NoteOn {
                                channel,
                                key,
                                velocity,
                            }
                        }),
                        0xA0 => take_two(bytes, &mut i).map(|(key, value)| {
                            MidiMessage::PolyPressure {
                                channel,
                                key,
                                value,
                            }
                        }),
                        0xB0 => take_two(bytes, &mut i).map(|(controller, value)| {
                            MidiMessage::ControlChange {
                                channel,
                                controller,
                                value,
                            }
                        }),
                        0xC0 => take_one(bytes, &mut i)
                            .map(|program| MidiMessage::ProgramChange { channel, program }),
                        0xD0 => take_one(bytes, &mut i)
                            .map(|value| MidiMessage::ChannelPressure { channel, value }),
                        0xE0 => take_two(bytes, &mut i).map(|(lsb, msb)| MidiMessage::PitchWheel {
                            channel,
                            value: u16::from(msb) << 7 | u16::from(lsb),
                        }),
                        _ => None,
                    };
                    match message {
                        Some(message) => sink(message),
                        None => skipped += 1,
                    }
                }
            }
        }

        skipped
    }
}

impl Default for MidiParser {
    fn default() -> Self {
        Self::new()
    }
}

fn real_time_message(byte: u8) -> Option<MidiMessage> {
    match byte {
        0xF8 => Some(MidiMessage::TimingClock),
        0xFA => Some(MidiMessage::Start),
        0xFB => Some(MidiMessage::Continue),
        0xFC => Some(MidiMessage::Stop),
        0xFE => Some(MidiMessage::ActiveSensing),
        0xFF => Some(MidiMessage::SystemReset),
        _ => None,
    }
}

fn take_one(bytes: &[u8], i: &mut usize) -> Option<u8> {
    if *i < bytes.len() && bytes[*i] & 0x80 == 0 {
        let value = bytes[*i];
        *i += 1;
        Some(value)
    } else {
        None
    }
}

fn take_two(bytes: &[u8], i: &mut usize) -> Option<(u8, u8)> {
    if *i + 1 < bytes.len() && bytes[*i] & 0x80 == 0 && bytes[*i + 1] & 0x80 == 0 {
        let pair = (bytes[*i], bytes[*i + 1]);
        *i += 2;
        Some(pair)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(bytes: &[u8]) -> Vec<MidiMessage> {
        let mut parser = MidiParser::new();
        let mut messages = Vec::new();
        parser.parse(bytes, |m| messages.push(m));
        messages
    }

    #[test]
    fn test_basic_channel_messages() {
        let messages = collect(&[0x90, 60, 100, 0x80, 60, 0, 0xE4, 0x00, 0x60]);
        assert_eq!(
            messages,
            vec![
                MidiMessage::NoteOn {
                    channel: 0,
                    key: 60,
                    velocity: 100
                },
                MidiMessage::NoteOff {
                    channel: 0,
                    key: 60,
                    velocity: 0
                },
                MidiMessage::PitchWheel {
                    channel: 4,
                    value: 0x60 << 7
                },
            ]
        );
    }

    #[test]
    fn test_running_status() {
        // One status byte, three note-ons
        let messages = collect(&[0x91, 60, 100, 64, 100, 67, 100]);
        assert_eq!(messages.len(), 3);
        for (message, key) in messages.iter().zip([60u8, 64, 67]) {
            assert_eq!(
                *message,
                MidiMessage::NoteOn {
                    channel: 1,
                    key,
                    velocity: 100
                }
            );
        }
    }

    #[test]
    fn test_real_time_interleaved() {
        let messages = collect(&[0x90, 60, 100, 0xF8, 64, 100]);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1], MidiMessage::TimingClock);
        // Running status survives the real-time byte
        assert_eq!(
            messages[2],
            MidiMessage::NoteOn {
                channel: 0,
                key: 64,
                velocity: 100
            }
        );
    }

    #[test]
    fn test_stray_data_is_skipped() {
        let mut parser = MidiParser::new();
        let mut messages = Vec::new();
        let skipped = parser.parse(&[0x42, 0x42, 0x90, 60, 100], |m| messages.push(m));
        assert_eq!(skipped, 2);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_sysex_gm_reset() {
        let messages = collect(&[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7]);
        assert_eq!(messages, vec![MidiMessage::SystemExclusive(SysEx::GmReset)]);
    }

    #[test]
    fn test_sysex_master_volume() {
        let messages = collect(&[0xF0, 0x7F, 0x7F, 0x04, 0x01, 0x00, 0x40, 0xF7]);
        assert_eq!(
            messages,
            vec![MidiMessage::SystemExclusive(SysEx::MasterVolume(0x2000))]
        );
    }

    #[test]
    fn test_sysex_gs_drum_part() {
        // Block 0x10 = channel 9, value 1 = drums on
        let messages = collect(&[
            0xF0, 0x41, 0x10, 0x42, 0x12, 0x40, 0x10, 0x15, 0x01, 0x1A, 0xF7,
        ]);
        assert_eq!(
            messages,
            vec![MidiMessage::SystemExclusive(SysEx::GsDrumPart {
                channel: 9,
                drums: true
            })]
        );
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let originals = [
            MidiMessage::NoteOn {
                channel: 3,
                key: 72,
                velocity: 90,
            },
            MidiMessage::ControlChange {
                channel: 15,
                controller: 7,
                value: 100,
            },
            MidiMessage::ProgramChange {
                channel: 2,
                program: 41,
            },
            MidiMessage::PitchWheel {
                channel: 0,
                value: 16383,
            },
            MidiMessage::SystemExclusive(SysEx::XgReset),
        ];
        for original in originals {
            let mut buffer = [0u8; 12];
            let len = original.encode(&mut buffer);
            let decoded = collect(&buffer[..len]);
            assert_eq!(decoded, vec![original], "roundtrip failed for {original:?}");
        }
    }

    #[test]
    fn test_set_channel() {
        let mut message = MidiMessage::NoteOn {
            channel: 0,
            key: 60,
            velocity: 1,
        };
        message.set_channel(12);
        assert_eq!(message.channel(), Some(12));

        let mut reset = MidiMessage::SystemReset;
        reset.set_channel(5);
        assert_eq!(reset.channel(), None);
    }
}
