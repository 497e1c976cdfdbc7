use std::f64::consts::PI;

use strum::{Display, EnumIter, EnumString};

use crate::utils::buffer::SILENCE_THRESHOLD;

// -------------------------------------------------------------------------------------------------

/// Lowest cutoff frequency in Hz the filter accepts.
const MIN_CUTOFF: f64 = 5.0;
/// Highest cutoff frequency relative to the sample rate the filter accepts.
const MAX_CUTOFF_FACTOR: f64 = 0.45;
/// Lowest sample rate used to calculate coefficients.
const MIN_SAMPLE_RATE: u32 = 1000;
/// Resonance range in dB.
const MAX_RESONANCE_DB: f64 = 24.0;

// -------------------------------------------------------------------------------------------------

/// Available filter types for the voice filter.
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Display, EnumIter, EnumString)]
pub enum FilterType {
    LowPass6,
    #[default]
    LowPass12,
    LowPass24,
    HighPass12,
    HighPass24,
    BandPass12,
    Notch12,
}

impl FilterType {
    /// Map a filter type cell value to a filter type. Out of range values are clamped.
    pub fn from_index(index: i32) -> Self {
        match index {
            i32::MIN..=0 => Self::LowPass6,
            1 => Self::LowPass12,
            2 => Self::LowPass24,
            3 => Self::HighPass12,
            4 => Self::HighPass24,
            5 => Self::BandPass12,
            _ => Self::Notch12,
        }
    }

    /// Number of cascaded biquad stages this type runs.
    fn stage_count(self) -> usize {
        match self {
            Self::LowPass24 | Self::HighPass24 => 2,
            _ => 1,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Normalized direct form biquad coefficients (a0 = 1).
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct BiquadCoefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Default for BiquadCoefficients {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl BiquadCoefficients {
    /// Coefficients which pass the signal unmodified.
    pub const IDENTITY: Self = Self {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Calculate coefficients for the given type and parameters. Parameters are clamped into
    /// a numerically safe range.
    pub fn new(filter_type: FilterType, sample_rate: u32, cutoff: f64, resonance_db: f64) -> Self {
        let sample_rate = sample_rate.max(MIN_SAMPLE_RATE) as f64;
        let cutoff = if cutoff.is_nan() {
            sample_rate * MAX_CUTOFF_FACTOR
        } else {
            cutoff.clamp(MIN_CUTOFF, sample_rate * MAX_CUTOFF_FACTOR)
        };
        let resonance_db = if resonance_db.is_nan() {
            0.0
        } else {
            resonance_db.clamp(0.0, MAX_RESONANCE_DB)
        };

        if filter_type == FilterType::LowPass6 {
            // first order bilinear lowpass
            let k = (PI * cutoff / sample_rate).tan();
            let b0 = k / (1.0 + k);
            return Self {
                b0,
                b1: b0,
                b2: 0.0,
                a1: (k - 1.0) / (k + 1.0),
                a2: 0.0,
            };
        }

        let q = std::f64::consts::FRAC_1_SQRT_2 * 10.0f64.powf(resonance_db / 20.0);
        let w0 = 2.0 * PI * cutoff / sample_rate;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let a0 = 1.0 + alpha;

        let (b0, b1, b2) = match filter_type {
            FilterType::LowPass6 | FilterType::LowPass12 | FilterType::LowPass24 => {
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0)
            }
            FilterType::HighPass12 | FilterType::HighPass24 => {
                let b1 = -(1.0 + cos_w0);
                (-b1 / 2.0, b1, -b1 / 2.0)
            }
            FilterType::BandPass12 => (alpha, 0.0, -alpha),
            FilterType::Notch12 => (1.0, -2.0 * cos_w0, 1.0),
        };
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Linear interpolation between self and `other` at position `t` (0..=1).
    #[inline]
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        Self {
            b0: self.b0 + (other.b0 - self.b0) * t,
            b1: self.b1 + (other.b1 - self.b1) * t,
            b2: self.b2 + (other.b2 - self.b2) * t,
            a1: self.a1 + (other.a1 - self.a1) * t,
            a2: self.a2 + (other.a2 - self.a2) * t,
        }
    }

    /// Largest absolute difference of all coefficients.
    pub fn max_distance(&self, other: &Self) -> f64 {
        [
            self.b0 - other.b0,
            self.b1 - other.b1,
            self.b2 - other.b2,
            self.a1 - other.a1,
            self.a2 - other.a2,
        ]
        .into_iter()
        .fold(0.0, |max, d| max.max(d.abs()))
    }
}

// -------------------------------------------------------------------------------------------------

#[derive(Default, Clone, Copy, Debug)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, c: &BiquadCoefficients, x: f64) -> f64 {
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }

    fn flush_denormals(&mut self) {
        let threshold = SILENCE_THRESHOLD as f64;
        for value in [&mut self.x1, &mut self.x2, &mut self.y1, &mut self.y2] {
            if value.abs() < threshold {
                *value = 0.0;
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Direct form I biquad filter with up to two cascaded stages (for the 24 dB/oct variants).
///
/// Coefficients are recalculated only when the filter parameters change, and then are linearly
/// interpolated sample by sample across the next processed block, starting from the set that
/// was applied at the end of the previous block.
#[derive(Clone, Debug)]
pub struct BiquadFilter {
    sample_rate: u32,
    filter_type: FilterType,
    cutoff: f64,
    resonance_db: f64,
    applied: BiquadCoefficients,
    target: BiquadCoefficients,
    initialized: bool,
    stages: [BiquadState; 2],
}

impl BiquadFilter {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            filter_type: FilterType::default(),
            cutoff: f64::NAN,
            resonance_db: 0.0,
            applied: BiquadCoefficients::IDENTITY,
            target: BiquadCoefficients::IDENTITY,
            initialized: false,
            stages: [BiquadState::default(); 2],
        }
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }
    pub fn cutoff(&self) -> f64 {
        self.cutoff
    }
    pub fn resonance(&self) -> f64 {
        self.resonance_db
    }

    /// Coefficients applied at the end of the last processed block.
    pub fn applied_coefficients(&self) -> BiquadCoefficients {
        self.applied
    }
    /// Coefficients the filter ramps to in the next processed block.
    pub fn target_coefficients(&self) -> BiquadCoefficients {
        self.target
    }

    /// Coefficients used for the sample at `frame` in a block of `frames` samples.
    #[inline]
    pub fn coefficients_at(&self, frame: usize, frames: usize) -> BiquadCoefficients {
        if self.applied == self.target || frames == 0 {
            self.target
        } else {
            let t = (frame + 1) as f64 / frames as f64;
            self.applied.lerp(&self.target, t)
        }
    }

    /// Set new filter parameters: cutoff in Hz, resonance in dB.
    /// Coefficients only get recalculated when something actually changed.
    pub fn set_parameters(&mut self, filter_type: FilterType, cutoff: f64, resonance_db: f64) {
        let dirty = self.filter_type != filter_type
            || self.cutoff != cutoff
            || self.resonance_db != resonance_db;
        if !dirty {
            return;
        }
        if self.filter_type.stage_count() != filter_type.stage_count() {
            self.stages[1] = BiquadState::default();
        }
        self.filter_type = filter_type;
        self.cutoff = cutoff;
        self.resonance_db = resonance_db;
        self.target = BiquadCoefficients::new(filter_type, self.sample_rate, cutoff, resonance_db);
        if !self.initialized {
            // nothing to ramp from
            self.applied = self.target;
            self.initialized = true;
        }
    }

    /// Filter the given buffer in place.
    pub fn process(&mut self, buffer: &mut [f32]) {
        let frames = buffer.len();
        let stage_count = self.filter_type.stage_count();
        if self.applied == self.target {
            let c = self.target;
            for sample in buffer.iter_mut() {
                let mut value = *sample as f64;
                for stage in &mut self.stages[..stage_count] {
                    value = stage.process(&c, value);
                }
                *sample = value as f32;
            }
        } else {
            for (frame, sample) in buffer.iter_mut().enumerate() {
                let c = self.coefficients_at(frame, frames);
                let mut value = *sample as f64;
                for stage in &mut self.stages[..stage_count] {
                    value = stage.process(&c, value);
                }
                *sample = value as f32;
            }
            self.applied = self.target;
        }
        for stage in &mut self.stages {
            stage.flush_denormals();
        }
    }

    /// Reset filter state and forget the last applied coefficients, so the next parameter
    /// change applies without a ramp.
    pub fn reset(&mut self) {
        self.stages = [BiquadState::default(); 2];
        self.initialized = false;
        self.cutoff = f64::NAN;
        self.applied = BiquadCoefficients::IDENTITY;
        self.target = BiquadCoefficients::IDENTITY;
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn coefficient_ramps_are_click_free() {
        const BLOCK_SIZE: usize = 64;
        let mut filter = BiquadFilter::new(44100);
        filter.set_parameters(FilterType::LowPass12, 500.0, 0.0);
        let mut buffer = vec![0.5f32; BLOCK_SIZE];
        filter.process(&mut buffer);
        let old = filter.applied_coefficients();

        filter.set_parameters(FilterType::LowPass12, 8000.0, 6.0);
        let new = filter.target_coefficients();
        let max_step = old.max_distance(&new) / BLOCK_SIZE as f64;

        let mut previous = old;
        for frame in 0..BLOCK_SIZE {
            let current = filter.coefficients_at(frame, BLOCK_SIZE);
            assert!(previous.max_distance(&current) <= max_step + 1e-12);
            previous = current;
        }
        assert!(previous.max_distance(&new) < 1e-12);

        filter.process(&mut buffer);
        assert_eq!(filter.applied_coefficients(), new);
    }

    #[test]
    fn unchanged_parameters_keep_coefficients() {
        let mut filter = BiquadFilter::new(48000);
        filter.set_parameters(FilterType::HighPass24, 1000.0, 3.0);
        let coefficients = filter.target_coefficients();
        let mut buffer = vec![1.0f32; 32];
        filter.process(&mut buffer);
        filter.set_parameters(FilterType::HighPass24, 1000.0, 3.0);
        assert_eq!(filter.applied_coefficients(), coefficients);
        assert_eq!(filter.coefficients_at(0, 32), coefficients);
    }

    #[test]
    fn clamps_extreme_parameters() {
        for filter_type in FilterType::iter() {
            for (sample_rate, cutoff, resonance) in [
                (44100, 1.0e9, 1000.0),
                (44100, -10.0, -10.0),
                (0, 1000.0, 0.0),
                (44100, f64::NAN, f64::NAN),
            ] {
                let mut filter = BiquadFilter::new(sample_rate);
                filter.set_parameters(filter_type, cutoff, resonance);
                let mut buffer = vec![0.0f32; 256];
                buffer[0] = 1.0;
                filter.process(&mut buffer);
                assert!(
                    buffer.iter().all(|s| s.is_finite() && s.abs() < 100.0),
                    "{filter_type} is unstable"
                );
            }
        }
    }

    #[test]
    fn lowpass_attenuates_high_frequencies() {
        let mut filter = BiquadFilter::new(44100);
        filter.set_parameters(FilterType::LowPass24, 200.0, 0.0);
        // nyquist frequency alternating signal
        let mut buffer = (0..1024)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect::<Vec<f32>>();
        filter.process(&mut buffer);
        assert!(buffer[512..].iter().all(|s| s.abs() < 1.0e-3));
    }

    #[test]
    fn flushes_denormals() {
        let mut filter = BiquadFilter::new(44100);
        filter.set_parameters(FilterType::LowPass12, 1000.0, 0.0);
        let mut buffer = vec![1.0e-20f32; 16];
        filter.process(&mut buffer);
        assert!(filter.stages.iter().all(|s| s.x1 == 0.0 && s.y1 == 0.0));
    }

    #[test]
    fn filter_type_index_mapping() {
        assert_eq!(FilterType::from_index(-3), FilterType::LowPass6);
        assert_eq!(FilterType::from_index(1), FilterType::LowPass12);
        assert_eq!(FilterType::from_index(4), FilterType::HighPass24);
        assert_eq!(FilterType::from_index(99), FilterType::Notch12);
    }
}
