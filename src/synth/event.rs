//! Audio-thread → control-thread event publication.
//!
//! The synth narrates note and controller lifecycle through a typed event
//! enum pushed into an SPSC ring buffer. The audio thread never blocks on
//! the queue: when the consumer falls behind, events are dropped and a
//! monotonically increasing counter records how many. Subscribers drain
//! the consumer end on their own thread and must not call back into the
//! synth from the handler.

use rtrb::Producer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8 },
    ControllerChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, bank: u16, program: u8 },
    PitchWheel { channel: u8, value: u16 },
    ChannelPressure { channel: u8, value: u8 },
    /// A channel switched between melodic and percussion mode.
    DrumChange { channel: u8, drums: bool },
    /// Everything was released or killed at once.
    StopAll,
    NewChannel { channel: u8 },
    MuteChannel { channel: u8, muted: bool },
    /// The available preset list changed (bank swap).
    PresetListChange,
}

/// Non-blocking event publisher with a drop counter.
pub struct EventOutbox {
    producer: Option<Producer<SynthEvent>>,
    dropped: u64,
}

impl EventOutbox {
    pub fn new() -> Self {
        Self {
            producer: None,
            dropped: 0,
        }
    }

    pub fn attach(&mut self, producer: Producer<SynthEvent>) {
        self.producer = Some(producer);
    }

    /// Push if a subscriber is attached and the queue has room; count the
    /// event as dropped otherwise. Never blocks.
    pub fn publish(&mut self, event: SynthEvent) {
        if let Some(producer) = &mut self.producer {
            if producer.push(event).is_err() {
                self.dropped += 1;
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for EventOutbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrb::RingBuffer;

    #[test]
    fn test_publish_and_drain() {
        let (tx, mut rx) = RingBuffer::new(4);
        let mut outbox = EventOutbox::new();
        outbox.attach(tx);

        outbox.publish(SynthEvent::StopAll);
        outbox.publish(SynthEvent::NewChannel { channel: 16 });

        assert_eq!(rx.pop(), Ok(SynthEvent::StopAll));
        assert_eq!(rx.pop(), Ok(SynthEvent::NewChannel { channel: 16 }));
        assert!(rx.pop().is_err());
        assert_eq!(outbox.dropped(), 0);
    }

    #[test]
    fn test_overflow_counts_drops() {
        let (tx, _rx) = RingBuffer::new(2);
        let mut outbox = EventOutbox::new();
        outbox.attach(tx);

        for _ in 0..5 {
            outbox.publish(SynthEvent::StopAll);
        }
        assert_eq!(outbox.dropped(), 3);
    }

    #[test]
    fn test_unattached_outbox_is_silent() {
        let mut outbox = EventOutbox::new();
        outbox.publish(SynthEvent::StopAll);
        assert_eq!(outbox.dropped(), 0);
    }
}
