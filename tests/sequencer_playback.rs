//! Sequencer driving the synthesizer: tempo-mapped playback and seek.

mod common;

use common::{dry_config, sine_bank_440};
use rtrb::RingBuffer;
use sforzo::synth::event::SynthEvent;
use sforzo::{Sequencer, Synthesizer};

const SR: f64 = 48_000.0;
const BLOCK: usize = 128;

// -- minimal SMF writer (format 1, PPQ 480) --------------------------------

fn write_vlq(value: u32, buffer: &mut Vec<u8>) {
    let mut bytes = [0u8; 4];
    let mut count = 0;
    let mut temp = value;
    loop {
        bytes[count] = (temp & 0x7F) as u8;
        temp >>= 7;
        count += 1;
        if temp == 0 {
            break;
        }
    }
    for i in (0..count).rev() {
        buffer.push(bytes[i] | if i == 0 { 0 } else { 0x80 });
    }
}

fn tempo_bytes(micros: u32) -> Vec<u8> {
    let b = micros.to_be_bytes();
    vec![0xFF, 0x51, 0x03, b[1], b[2], b[3]]
}

fn build_smf(tracks: &[&[(u32, Vec<u8>)]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    out.extend_from_slice(&480u16.to_be_bytes());
    for events in tracks {
        let mut data = Vec::new();
        let mut last_tick = 0u32;
        for (tick, bytes) in *events {
            write_vlq(tick - last_tick, &mut data);
            data.extend_from_slice(bytes);
            last_tick = *tick;
        }
        write_vlq(0, &mut data);
        data.extend_from_slice(&[0xFF, 0x2F, 0x00]);
        out.extend_from_slice(b"MTrk");
        out.extend_from_slice(&(data.len() as u32).to_be_bytes());
        out.extend_from_slice(&data);
    }
    out
}

/// Step the sequencer and synth together in audio-callback-sized slices,
/// noting the wall time at which each note-on event surfaced.
fn run_and_collect_note_times(
    sequencer: &mut Sequencer,
    synth: &mut Synthesizer,
    seconds: f64,
) -> Vec<(f64, u8)> {
    let (tx, mut rx) = RingBuffer::new(1024);
    synth.attach_event_queue(tx);

    let mut note_times = Vec::new();
    let mut left = vec![0.0f32; BLOCK];
    let mut right = vec![0.0f32; BLOCK];
    let blocks = (seconds * SR / BLOCK as f64) as usize;
    for block in 0..blocks {
        let now = block as f64 * BLOCK as f64 / SR;
        sequencer.advance(now, synth);
        synth.render(&mut left, &mut right);
        while let Ok(event) = rx.pop() {
            if let SynthEvent::NoteOn { key, .. } = event {
                note_times.push((now, key));
            }
        }
    }
    note_times
}

#[test]
fn tempo_change_shifts_event_times() {
    // 120 BPM, halving to 60 BPM at tick 960 (PPQ 480). Notes at ticks
    // 0, 960 and 1440: wall times 0.0, 1.0 and 2.0 seconds.
    let data = build_smf(&[
        &[(0, tempo_bytes(500_000)), (960, tempo_bytes(1_000_000))],
        &[
            (0, vec![0x90, 60, 100]),
            (960, vec![0x90, 64, 100]),
            (1440, vec![0x90, 67, 100]),
        ],
    ]);

    let mut sequencer = Sequencer::from_bytes(&data).unwrap();
    let mut synth = Synthesizer::new(sine_bank_440(&[]), &dry_config()).unwrap();
    sequencer.play(0.0);

    let note_times = run_and_collect_note_times(&mut sequencer, &mut synth, 2.5);
    assert_eq!(note_times.len(), 3);
    assert_eq!(note_times[0].1, 60);
    assert!(note_times[0].0 < 0.01);

    let (t1, key1) = note_times[1];
    assert_eq!(key1, 64);
    assert!((t1 - 1.0).abs() < 0.01, "second note at 1.0 s, got {t1}");

    let (t2, key2) = note_times[2];
    assert_eq!(key2, 67);
    assert!(
        (t2 - 2.0).abs() < 0.01,
        "tick 1440 lands at 2.0 s after the tempo halves, got {t2}"
    );
}

#[test]
fn seek_restores_controller_state_with_no_voices() {
    // CC7=50 fires at 2.0 s (tick 1920); a long note starts at 1.0 s.
    // The file extends to 6.0 s so a 5.0 s seek stays inside it.
    let data = build_smf(&[&[
        (960, vec![0x90, 69, 100]),
        (1920, vec![0xB0, 7, 50]),
        (4320, vec![0x80, 69, 0]),
        (5760, vec![0x90, 70, 1]),
    ]]);

    let mut sequencer = Sequencer::from_bytes(&data).unwrap();
    let mut synth = Synthesizer::new(sine_bank_440(&[]), &dry_config()).unwrap();
    sequencer.play(0.0);

    // Reach 1.5 s: the note is sounding, CC7 still at its default
    run_and_collect_note_times(&mut sequencer, &mut synth, 1.5);
    assert!(synth.voice_count() > 0);
    assert_eq!(synth.channel(0).unwrap().controller(7), 100);

    sequencer.set_time_seconds(5.0, 1.5, &mut synth);
    assert_eq!(
        synth.channel(0).unwrap().controller(7),
        50,
        "seek must replay the controller change"
    );

    // The released voice drains within a fraction of a second
    let mut left = vec![0.0f32; BLOCK];
    let mut right = vec![0.0f32; BLOCK];
    for _ in 0..200 {
        synth.render(&mut left, &mut right);
    }
    assert_eq!(synth.voice_count(), 0, "no voices may survive a seek");
}

#[test]
fn seek_does_not_replay_notes() {
    let data = build_smf(&[&[
        (0, vec![0x90, 60, 100]),
        (480, vec![0x90, 62, 100]),
        (960, vec![0x80, 60, 0]),
        (1920, vec![0x90, 64, 100]),
    ]]);

    let mut sequencer = Sequencer::from_bytes(&data).unwrap();
    let mut synth = Synthesizer::new(sine_bank_440(&[]), &dry_config()).unwrap();
    sequencer.play(0.0);
    sequencer.set_time_seconds(1.5, 0.0, &mut synth);

    // Drain the release tails of nothing: no voices were ever started
    let mut left = vec![0.0f32; BLOCK];
    let mut right = vec![0.0f32; BLOCK];
    for _ in 0..50 {
        synth.render(&mut left, &mut right);
    }
    assert_eq!(synth.voice_count(), 0);
    assert!(left.iter().all(|&s| s == 0.0));
}

#[test]
fn stop_releases_and_rewinds() {
    let data = build_smf(&[&[(0, vec![0x90, 60, 100]), (1920, vec![0x80, 60, 0])]]);
    let mut sequencer = Sequencer::from_bytes(&data).unwrap();
    let mut synth = Synthesizer::new(sine_bank_440(&[]), &dry_config()).unwrap();

    sequencer.play(0.0);
    run_and_collect_note_times(&mut sequencer, &mut synth, 0.5);
    assert!(synth.voice_count() > 0);

    sequencer.stop(&mut synth);
    assert!(sequencer.is_paused());
    assert_eq!(sequencer.played_seconds(), 0.0);

    let mut left = vec![0.0f32; BLOCK];
    let mut right = vec![0.0f32; BLOCK];
    for _ in 0..200 {
        synth.render(&mut left, &mut right);
    }
    assert_eq!(synth.voice_count(), 0);
}

#[test]
fn multi_port_files_spread_over_extra_channels() {
    // Two tracks on different MIDI ports, both using wire channel 0
    let data = build_smf(&[
        &[
            (0, vec![0xFF, 0x21, 0x01, 0x00]), // port 0
            (0, vec![0x90, 60, 100]),
        ],
        &[
            (0, vec![0xFF, 0x21, 0x01, 0x01]), // port 1
            (0, vec![0x90, 72, 100]),
        ],
    ]);

    let mut sequencer = Sequencer::from_bytes(&data).unwrap();
    let mut synth = Synthesizer::new(sine_bank_440(&[]), &dry_config()).unwrap();
    sequencer.play(0.0);
    sequencer.advance(0.1, &mut synth);

    assert!(synth.channel_count() >= 17, "port 1 must grow the channel set");
    assert_eq!(synth.channel(0).unwrap().active_voice_count(), 1);
    assert_eq!(synth.channel(16).unwrap().active_voice_count(), 1);
}
