pub mod buffer;
pub mod dsp;
pub mod resampler;

use std::sync::atomic::{AtomicUsize, Ordering};

// -------------------------------------------------------------------------------------------------

const MINUS_INF_IN_DB: f32 = -200.0f32;

/// Timecent values at or below this are treated as "instant" (zero seconds).
pub(crate) const TIMECENTS_INSTANT: f64 = -12000.0;

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
macro_rules! assert_eq_with_epsilon {
    ($x:expr, $y:expr, $d:expr) => {
        let (x, y, d) = ($x, $y, $d);
        if (x - y).abs() > d {
            panic!("{} != {} (epsilon: {})", x, y, d);
        }
    };
}
#[cfg(test)]
pub(crate) use assert_eq_with_epsilon;

// -------------------------------------------------------------------------------------------------

/// Generates a unique usize number, by simply counting atomically upwards from 1.
pub fn unique_usize_id() -> usize {
    static ID_COUNTER: AtomicUsize = AtomicUsize::new(1);
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

// -------------------------------------------------------------------------------------------------

pub fn linear_to_db(value: f32) -> f32 {
    let lin_to_db_factor = 20.0f32 / 10.0f32.ln();
    if value == 1.0 {
        return 0.0; // avoid rounding errors at exactly 0 dB
    } else if value > 1e-12f32 {
        return value.ln() * lin_to_db_factor;
    }
    MINUS_INF_IN_DB
}

pub fn db_to_linear(value: f32) -> f32 {
    let db_to_lin_factor = 10.0f32.ln() / 20.0f32;
    if value == 0.0f32 {
        return 1.0f32; // avoid rounding errors at exactly 0 dB
    } else if value > MINUS_INF_IN_DB {
        return (value * db_to_lin_factor).exp();
    }
    0.0f32
}

// -------------------------------------------------------------------------------------------------

/// Converts a gain in centibels (1/10 dB) to a linear amplitude factor.
pub fn centibels_to_linear(value: f64) -> f64 {
    if value == 0.0 {
        return 1.0;
    }
    (value * (10.0f64.ln() / 200.0)).exp()
}

/// Converts a duration in timecents to seconds.
pub fn timecents_to_seconds(value: f64) -> f64 {
    if value <= TIMECENTS_INSTANT {
        return 0.0;
    }
    (value / 1200.0).exp2()
}

/// Converts an absolute pitch in cents (MIDI key * 100) to a frequency in Hz.
pub fn cents_to_hz(value: f64) -> f64 {
    440.0 * ((value - 6900.0) / 1200.0).exp2()
}

/// Converts a relative pitch offset in cents to a playback speed factor.
pub fn cents_to_ratio(value: f64) -> f64 {
    (value / 1200.0).exp2()
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lin_db_conversion() {
        assert_eq!(linear_to_db(1.0), 0.0);
        assert_eq!(linear_to_db(0.0), MINUS_INF_IN_DB);
        assert_eq!(db_to_linear(MINUS_INF_IN_DB), 0.0);
        assert_eq!(db_to_linear(0.0), 1.0);
        assert_eq_with_epsilon!(linear_to_db(db_to_linear(20.0)), 20.0, 0.0001);
        assert_eq_with_epsilon!(linear_to_db(db_to_linear(-20.0)), -20.0, 0.0001);
    }

    #[test]
    fn synthesis_units() {
        assert_eq!(centibels_to_linear(0.0), 1.0);
        assert_eq_with_epsilon!(centibels_to_linear(-200.0), 0.1, 1e-9);
        assert_eq!(timecents_to_seconds(-12000.0), 0.0);
        assert_eq_with_epsilon!(timecents_to_seconds(0.0), 1.0, 1e-12);
        assert_eq_with_epsilon!(timecents_to_seconds(1200.0), 2.0, 1e-12);
        assert_eq_with_epsilon!(cents_to_hz(6900.0), 440.0, 1e-9);
        assert_eq_with_epsilon!(cents_to_hz(8100.0), 880.0, 1e-9);
        assert_eq_with_epsilon!(cents_to_ratio(-1200.0), 0.5, 1e-12);
    }
}
