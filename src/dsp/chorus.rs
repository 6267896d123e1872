//! Chorus bus - stereo modulated delay network.
//!
//! Voices route a share of their output here via the chorus-send generator.
//! The bus thickens that signal by reading two short delay lines whose delay
//! times are swept by a sine LFO, the right channel a quarter turn behind
//! the left so the image widens. Feedback recirculates a portion of the wet
//! signal for a denser ensemble.

use std::f32::consts::TAU;

use crate::dsp::delay::DelayLine;
use crate::ChorusConfig;

pub struct Chorus {
    sample_rate: f32,
    left: DelayLine,
    right: DelayLine,
    lfo_phase: f32,
    base_delay_ms: f32,
    depth_ms: f32,
    rate_hz: f32,
    feedback: f32,
}

impl Chorus {
    pub fn new(sample_rate: f32, config: &ChorusConfig) -> Self {
        // Worst case: base + depth, plus headroom for config changes
        let max_samples = (sample_rate * 0.1) as usize;
        Self {
            sample_rate,
            left: DelayLine::new(max_samples),
            right: DelayLine::new(max_samples),
            lfo_phase: 0.0,
            base_delay_ms: config.delay_ms.clamp(1.0, 50.0),
            depth_ms: config.depth_ms.clamp(0.0, 20.0),
            rate_hz: config.rate_hz.clamp(0.05, 10.0),
            feedback: config.feedback.clamp(0.0, 0.95),
        }
    }

    /// Process one block of the chorus bus and ADD the wet signal into the
    /// stereo output. The dry path lives on the dry bus; this never mixes it.
    pub fn process(
        &mut self,
        input_left: &[f32],
        input_right: &[f32],
        out_left: &mut [f32],
        out_right: &mut [f32],
    ) {
        let phase_inc = TAU * self.rate_hz / self.sample_rate;
        let ms_to_samples = self.sample_rate / 1000.0;

        for i in 0..input_left.len() {
            let lfo_l = self.lfo_phase.sin();
            let lfo_r = (self.lfo_phase + TAU * 0.25).sin();

            let delay_l = (self.base_delay_ms + lfo_l * self.depth_ms) * ms_to_samples;
            let delay_r = (self.base_delay_ms + lfo_r * self.depth_ms) * ms_to_samples;

            let wet_l = self.left.read_interpolated(delay_l.max(1.0));
            let wet_r = self.right.read_interpolated(delay_r.max(1.0));

            self.left.write(input_left[i] + wet_l * self.feedback);
            self.right.write(input_right[i] + wet_r * self.feedback);

            out_left[i] += wet_l;
            out_right[i] += wet_r;

            self.lfo_phase += phase_inc;
            if self.lfo_phase >= TAU {
                self.lfo_phase -= TAU;
            }
        }
    }

    pub fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
        self.lfo_phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ChorusConfig {
        ChorusConfig::default()
    }

    #[test]
    fn test_silence_in_silence_out() {
        let mut chorus = Chorus::new(48_000.0, &config());
        let input = vec![0.0; 512];
        let mut out_l = vec![0.0; 512];
        let mut out_r = vec![0.0; 512];
        chorus.process(&input, &input, &mut out_l, &mut out_r);
        assert!(out_l.iter().all(|&s| s == 0.0));
        assert!(out_r.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_wet_signal_arrives_after_base_delay() {
        let mut chorus = Chorus::new(48_000.0, &config());
        // One impulse, then silence
        let mut input = vec![0.0; 4096];
        input[0] = 1.0;
        let mut out_l = vec![0.0; 4096];
        let mut out_r = vec![0.0; 4096];
        chorus.process(&input, &input, &mut out_l, &mut out_r);

        assert_eq!(out_l[0], 0.0, "wet path cannot be instantaneous");
        assert!(
            out_l.iter().any(|&s| s.abs() > 0.1),
            "the delayed impulse should appear in the wet output"
        );
    }

    #[test]
    fn test_output_is_additive() {
        let mut chorus = Chorus::new(48_000.0, &config());
        let input = vec![0.0; 256];
        let mut out_l = vec![0.25; 256];
        let mut out_r = vec![0.25; 256];
        chorus.process(&input, &input, &mut out_l, &mut out_r);
        // Silent bus input must leave existing output untouched
        assert!(out_l.iter().all(|&s| (s - 0.25).abs() < 1e-9));
    }
}
