//! Delayed triangle LFOs for vibrato and modulation.
//!
//! SoundFont LFOs are triangle waves that hold at zero for a delay period,
//! then start rising from zero. Bipolar output (-1..+1): vibrato pushes pitch
//! sharp AND flat around center, so symmetric modulation is the natural
//! shape. The frequency comes from `freqVibLFO`/`freqModLFO` in absolute
//! cents and the delay from `delayVibLFO`/`delayModLFO` in timecents; the
//! voice converts both before installing them here.

/// Triangle LFO starting at 0 and rising, after an initial delay.
pub struct Lfo {
    sample_rate: f32,
    frequency_hz: f32,
    delay_samples: f64,
    /// Samples elapsed since the voice started.
    position: f64,
}

impl Lfo {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            frequency_hz: 0.0,
            delay_samples: 0.0,
            position: 0.0,
        }
    }

    pub fn set_params(&mut self, frequency_hz: f64, delay_seconds: f64) {
        self.frequency_hz = frequency_hz.max(0.0) as f32;
        self.delay_samples = delay_seconds.max(0.0) * f64::from(self.sample_rate);
    }

    /// Value at block start, then advance the position by `samples`.
    ///
    /// Triangle phase: 0 → +1 over the first quarter period, +1 → -1 over
    /// the middle half, -1 → 0 over the last quarter.
    pub fn advance_block(&mut self, samples: usize) -> f32 {
        let value = self.value();
        self.position += samples as f64;
        value
    }

    fn value(&self) -> f32 {
        if self.frequency_hz <= 0.0 || self.position < self.delay_samples {
            return 0.0;
        }
        let active = self.position - self.delay_samples;
        let period = f64::from(self.sample_rate) / f64::from(self.frequency_hz);
        let phase = (active / period).fract() as f32;

        if phase < 0.25 {
            4.0 * phase
        } else if phase < 0.75 {
            2.0 - 4.0 * phase
        } else {
            4.0 * phase - 4.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silent_during_delay() {
        let mut lfo = Lfo::new(48_000.0);
        lfo.set_params(5.0, 0.1);
        // 0.1 s = 4800 samples of delay
        for _ in 0..37 {
            assert_eq!(lfo.advance_block(128), 0.0);
        }
    }

    #[test]
    fn test_triangle_shape() {
        let mut lfo = Lfo::new(48_000.0);
        lfo.set_params(1.0, 0.0);

        // Quarter period at 1 Hz / 48 kHz = 12000 samples
        assert_eq!(lfo.advance_block(12_000), 0.0);
        let peak = lfo.advance_block(12_000);
        assert!((peak - 1.0).abs() < 1e-3, "quarter period should peak, got {peak}");
        let zero = lfo.advance_block(12_000);
        assert!(zero.abs() < 1e-3, "half period should cross zero, got {zero}");
        let trough = lfo.advance_block(12_000);
        assert!((trough + 1.0).abs() < 1e-3, "trough should be -1, got {trough}");
        let wrapped = lfo.advance_block(12_000);
        assert!(wrapped.abs() < 1e-3, "full period should return to 0, got {wrapped}");
    }

    #[test]
    fn test_zero_frequency_is_flat() {
        let mut lfo = Lfo::new(48_000.0);
        lfo.set_params(0.0, 0.0);
        for _ in 0..100 {
            assert_eq!(lfo.advance_block(64), 0.0);
        }
    }
}
