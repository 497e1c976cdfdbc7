//! Sine LFO for voice modulation, running at control rate.

use std::f64::consts::PI;

use crate::utils::{cents_to_hz, timecents_to_seconds};

// -------------------------------------------------------------------------------------------------

/// Highest LFO rate in Hz. Rates above get clamped.
const MAX_RATE: f64 = 100.0;

// -------------------------------------------------------------------------------------------------

/// Simple sine oscillator with a start delay. Advanced once per control tick.
///
/// Output values are in range 0..=1 centered at 0.5, so a bipolar source transform maps them
/// to -1..=1. While delayed, the output stays at the center.
#[derive(Debug, Default, Clone)]
pub struct Lfo {
    phase: f64,
    delay_time: f64,
    output: f64,
}

impl Lfo {
    pub fn new() -> Self {
        Self {
            phase: 0.0,
            delay_time: 0.0,
            output: 0.5,
        }
    }

    /// Last calculated output value.
    pub fn output(&self) -> f64 {
        self.output
    }

    /// Restart the LFO at phase zero.
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.delay_time = 0.0;
        self.output = 0.5;
    }

    /// Advance the LFO by `time_step` seconds with the given delay in timecents and frequency
    /// in absolute cents, and return the new output value.
    pub fn tick(&mut self, delay: f64, frequency: f64, time_step: f64) -> f64 {
        let delay = timecents_to_seconds(delay);
        let mut step = time_step;
        if self.delay_time < delay {
            self.delay_time += step;
            if self.delay_time < delay {
                self.output = 0.5;
                return self.output;
            }
            step = self.delay_time - delay;
        }
        let rate = cents_to_hz(frequency).clamp(0.0, MAX_RATE);
        self.phase += 2.0 * PI * rate * step;
        while self.phase >= 2.0 * PI {
            self.phase -= 2.0 * PI;
        }
        self.output = 0.5 + 0.5 * self.phase.sin();
        self.output
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_and_range() {
        let mut lfo = Lfo::new();
        // 1 second delay, 5 Hz
        let frequency = 6900.0 + 1200.0 * (5.0f64 / 440.0).log2();
        for _ in 0..99 {
            assert_eq!(lfo.tick(0.0, frequency, 0.01), 0.5);
        }
        let mut min = 1.0f64;
        let mut max = 0.0f64;
        for _ in 0..200 {
            let value = lfo.tick(0.0, frequency, 0.01);
            min = min.min(value);
            max = max.max(value);
        }
        assert!((0.0..0.05).contains(&min));
        assert!((0.95..=1.0).contains(&max));
    }
}
