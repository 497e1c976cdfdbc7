use super::Interpolator;

// -------------------------------------------------------------------------------------------------

/// 4 point, 3rd order Hermite interpolation. A good tradeoff between speed and quality when
/// playing loads of voices at the same time.
#[derive(Debug, Default, Clone, Copy)]
pub struct CubicInterpolator;

impl Interpolator for CubicInterpolator {
    fn padding(&self) -> usize {
        3
    }

    #[inline]
    fn value_at(&self, input: &[f32], index: usize, fraction: f64, _pitch: f64) -> f32 {
        // This is the 4-point, 3rd-order Hermite interpolation x-form algorithm from "Polynomial
        // Interpolators for High-Quality Resampling of Oversampled Audio" by Olli Niemitalo, p. 43:
        // http://yehar.com/blog/wp-content/uploads/2009/08/deip.pdf
        let fraction = fraction as f32;
        let ym1 = input[index - 1];
        let y0 = input[index];
        let y1 = input[index + 1];
        let y2 = input[index + 2];
        let c0 = y0;
        let c1 = (y1 - ym1) * 0.5;
        let c2 = ym1 - y0 * 2.5 + y1 * 2.0 - y2 * 0.5;
        let c3 = (y2 - ym1) * 0.5 + (y0 - y1) * 1.5;
        ((c3 * fraction + c2) * fraction + c1) * fraction + c0
    }
}
