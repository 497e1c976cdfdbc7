use super::Interpolator;

// -------------------------------------------------------------------------------------------------

/// Linear interpolation between two neighbouring frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearInterpolator;

impl Interpolator for LinearInterpolator {
    fn padding(&self) -> usize {
        2
    }

    #[inline]
    fn value_at(&self, input: &[f32], index: usize, fraction: f64, _pitch: f64) -> f32 {
        let y0 = input[index];
        let y1 = input[index + 1];
        y0 + (y1 - y0) * fraction as f32
    }
}

// -------------------------------------------------------------------------------------------------

/// Linear interpolation which advances a 32.32 fixed point read position and uses a 15 bit
/// fraction. Produces slightly different results than [`LinearInterpolator`], but avoids the
/// float position drift on long reads.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearFixedInterpolator;

impl LinearFixedInterpolator {
    const FRACTION_BITS: u32 = 32;
    const FRACTION_SCALE: f64 = (1u64 << Self::FRACTION_BITS) as f64;
    const FRACTION_MASK: u64 = (1u64 << Self::FRACTION_BITS) - 1;
    const QUANTIZED_SHIFT: u32 = Self::FRACTION_BITS - 15;
    const QUANTIZED_SCALE: f32 = 1.0 / (1u32 << 15) as f32;
}

impl Interpolator for LinearFixedInterpolator {
    fn padding(&self) -> usize {
        2
    }

    #[inline]
    fn value_at(&self, input: &[f32], index: usize, fraction: f64, _pitch: f64) -> f32 {
        let fixed = (fraction * Self::FRACTION_SCALE) as u64 & Self::FRACTION_MASK;
        let fraction = (fixed >> Self::QUANTIZED_SHIFT) as f32 * Self::QUANTIZED_SCALE;
        let y0 = input[index];
        let y1 = input[index + 1];
        y0 + (y1 - y0) * fraction
    }

    fn interpolate(
        &self,
        input: &[f32],
        position: &mut f64,
        pitch: f64,
        output: &mut [f32],
    ) -> usize {
        let end = (input.len().saturating_sub(self.padding()) as u64) << Self::FRACTION_BITS;
        let step = (pitch * Self::FRACTION_SCALE) as u64;
        let mut fixed_position = (*position * Self::FRACTION_SCALE) as u64;
        let mut written = 0;
        for out in output.iter_mut() {
            if fixed_position >= end {
                break;
            }
            let index = (fixed_position >> Self::FRACTION_BITS) as usize;
            let fraction = ((fixed_position & Self::FRACTION_MASK) >> Self::QUANTIZED_SHIFT)
                as f32
                * Self::QUANTIZED_SCALE;
            let y0 = input[index];
            let y1 = input[index + 1];
            *out = y0 + (y1 - y0) * fraction;
            fixed_position += step;
            written += 1;
        }
        *position = fixed_position as f64 / Self::FRACTION_SCALE;
        written
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_and_float_agree() {
        let input = (0..64).map(|i| (i as f32 * 0.3).sin()).collect::<Vec<_>>();
        let mut float_output = vec![0.0; 40];
        let mut fixed_output = vec![0.0; 40];
        let mut float_position = 2.0;
        let mut fixed_position = 2.0;
        let written = LinearInterpolator.interpolate(
            &input,
            &mut float_position,
            1.37,
            &mut float_output,
        );
        let fixed_written = LinearFixedInterpolator.interpolate(
            &input,
            &mut fixed_position,
            1.37,
            &mut fixed_output,
        );
        assert_eq!(written, fixed_written);
        assert!((float_position - fixed_position).abs() < 1e-6);
        for (a, b) in float_output.iter().zip(&fixed_output) {
            assert!((a - b).abs() < 1e-3);
        }
    }
}
