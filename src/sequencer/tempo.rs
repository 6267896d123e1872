//! The tempo map: tick ↔ seconds conversion under tempo changes.
//!
//! SMF expresses time as ticks of `1/PPQ` quarter notes; tempo meta-events
//! change how long a quarter note lasts. The map stores every change with
//! its precomputed absolute time so both directions are a binary search
//! plus one linear term.

/// One tempo meta-event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoChange {
    pub tick: u32,
    pub micros_per_quarter: u32,
}

/// Default MIDI tempo: 120 BPM.
pub const DEFAULT_MICROS_PER_QUARTER: u32 = 500_000;

#[derive(Debug, Clone)]
struct Segment {
    tick: u32,
    micros_per_quarter: u32,
    /// Absolute song time at `tick`.
    seconds: f64,
}

#[derive(Debug, Clone)]
pub struct TempoMap {
    ticks_per_quarter: u32,
    segments: Vec<Segment>,
}

impl TempoMap {
    /// Build from the (possibly unsorted, possibly empty) tempo events of
    /// a file. A change at tick 0 overrides the 120 BPM default.
    pub fn new(ticks_per_quarter: u32, mut changes: Vec<TempoChange>) -> Self {
        let ticks_per_quarter = ticks_per_quarter.max(1);
        changes.sort_by_key(|c| c.tick);
        changes.retain(|c| c.micros_per_quarter > 0);

        let mut segments = vec![Segment {
            tick: 0,
            micros_per_quarter: DEFAULT_MICROS_PER_QUARTER,
            seconds: 0.0,
        }];
        for change in changes {
            let last = segments.last().unwrap();
            if change.tick == last.tick {
                // Later event at the same tick wins
                let seconds = last.seconds;
                let tick = last.tick;
                *segments.last_mut().unwrap() = Segment {
                    tick,
                    micros_per_quarter: change.micros_per_quarter,
                    seconds,
                };
                continue;
            }
            let seconds = last.seconds
                + f64::from(change.tick - last.tick) * seconds_per_tick(
                    last.micros_per_quarter,
                    ticks_per_quarter,
                );
            segments.push(Segment {
                tick: change.tick,
                micros_per_quarter: change.micros_per_quarter,
                seconds,
            });
        }

        Self {
            ticks_per_quarter,
            segments,
        }
    }

    pub fn ticks_per_quarter(&self) -> u32 {
        self.ticks_per_quarter
    }

    /// Tempo in effect at `tick`.
    pub fn micros_per_quarter_at(&self, tick: u32) -> u32 {
        self.segment_for_tick(f64::from(tick)).micros_per_quarter
    }

    pub fn seconds_at_tick(&self, tick: f64) -> f64 {
        let segment = self.segment_for_tick(tick);
        segment.seconds
            + (tick - f64::from(segment.tick))
                * seconds_per_tick(segment.micros_per_quarter, self.ticks_per_quarter)
    }

    pub fn tick_at_seconds(&self, seconds: f64) -> f64 {
        let segment = self.segment_for_seconds(seconds);
        f64::from(segment.tick)
            + (seconds - segment.seconds)
                / seconds_per_tick(segment.micros_per_quarter, self.ticks_per_quarter)
    }

    fn segment_for_tick(&self, tick: f64) -> &Segment {
        match self
            .segments
            .partition_point(|s| f64::from(s.tick) <= tick)
        {
            0 => &self.segments[0],
            n => &self.segments[n - 1],
        }
    }

    fn segment_for_seconds(&self, seconds: f64) -> &Segment {
        match self.segments.partition_point(|s| s.seconds <= seconds) {
            0 => &self.segments[0],
            n => &self.segments[n - 1],
        }
    }
}

#[inline]
fn seconds_per_tick(micros_per_quarter: u32, ticks_per_quarter: u32) -> f64 {
    f64::from(micros_per_quarter) / 1_000_000.0 / f64::from(ticks_per_quarter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tempo() {
        let map = TempoMap::new(480, Vec::new());
        // 120 BPM: one quarter (480 ticks) = 0.5 s
        assert!((map.seconds_at_tick(480.0) - 0.5).abs() < 1e-9);
        assert!((map.tick_at_seconds(1.0) - 960.0).abs() < 1e-9);
    }

    #[test]
    fn test_tempo_change_splits_timeline() {
        // 120 BPM until tick 960, then 60 BPM
        let map = TempoMap::new(
            480,
            vec![TempoChange {
                tick: 960,
                micros_per_quarter: 1_000_000,
            }],
        );

        assert!((map.seconds_at_tick(960.0) - 1.0).abs() < 1e-9);
        // One more quarter at 60 BPM takes a full second
        assert!((map.seconds_at_tick(1440.0) - 2.0).abs() < 1e-9);

        assert!((map.tick_at_seconds(1.0) - 960.0).abs() < 1e-9);
        assert!((map.tick_at_seconds(2.0) - 1440.0).abs() < 1e-9);
        assert!((map.tick_at_seconds(1.5) - 1200.0).abs() < 1e-9);
    }

    #[test]
    fn test_change_at_tick_zero_overrides_default() {
        let map = TempoMap::new(
            480,
            vec![TempoChange {
                tick: 0,
                micros_per_quarter: 250_000,
            }],
        );
        // 240 BPM: a quarter is 0.25 s
        assert!((map.seconds_at_tick(480.0) - 0.25).abs() < 1e-9);
        assert_eq!(map.micros_per_quarter_at(0), 250_000);
    }

    #[test]
    fn test_unsorted_changes_are_sorted() {
        let map = TempoMap::new(
            480,
            vec![
                TempoChange {
                    tick: 960,
                    micros_per_quarter: 250_000,
                },
                TempoChange {
                    tick: 480,
                    micros_per_quarter: 1_000_000,
                },
            ],
        );
        // 0..480 at 120 BPM (0.5 s), 480..960 at 60 BPM (1.0 s), then 240
        assert!((map.seconds_at_tick(960.0) - 1.5).abs() < 1e-9);
        assert_eq!(map.micros_per_quarter_at(970), 250_000);
    }

    #[test]
    fn test_roundtrip() {
        let map = TempoMap::new(
            384,
            vec![
                TempoChange {
                    tick: 1000,
                    micros_per_quarter: 300_000,
                },
                TempoChange {
                    tick: 5000,
                    micros_per_quarter: 800_000,
                },
            ],
        );
        for tick in [0.0, 999.0, 1000.0, 2500.5, 4999.0, 5001.0, 20_000.0] {
            let back = map.tick_at_seconds(map.seconds_at_tick(tick));
            assert!((back - tick).abs() < 1e-6, "roundtrip failed at {tick}: {back}");
        }
    }
}
