use super::Interpolator;

// -------------------------------------------------------------------------------------------------

/// Nearest neighbour "interpolation". Cheapest kernel with the most aliasing.
#[derive(Debug, Default, Clone, Copy)]
pub struct PointInterpolator;

impl Interpolator for PointInterpolator {
    fn padding(&self) -> usize {
        1
    }

    #[inline]
    fn value_at(&self, input: &[f32], index: usize, fraction: f64, _pitch: f64) -> f32 {
        if fraction < 0.5 {
            input[index]
        } else {
            input[index + 1]
        }
    }
}
