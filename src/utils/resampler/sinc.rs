use std::{f64::consts::PI, sync::LazyLock};

use super::Interpolator;

// -------------------------------------------------------------------------------------------------

const HALF_TAPS: usize = 16;
const TAPS: usize = 2 * HALF_TAPS;
const FRACTIONS: usize = 64;
const SCALES: usize = 8;
const MAX_SCALE: f64 = 4.0;

// -------------------------------------------------------------------------------------------------

/// Blackman windowed sinc interpolation with 32 taps.
///
/// When pitching up, the kernel's cutoff gets lowered to avoid aliasing. Kernels for 8 cutoff
/// scales from 1 to 4 are precalculated, higher pitches use the widest one.
pub struct SincInterpolator {
    // SCALES * (FRACTIONS + 1) rows of TAPS normalized weights
    table: Vec<[f32; TAPS]>,
}

impl SincInterpolator {
    /// Shared instance. The kernel table is built on first use.
    pub fn shared() -> &'static Self {
        static INSTANCE: LazyLock<SincInterpolator> = LazyLock::new(SincInterpolator::new);
        &INSTANCE
    }

    fn new() -> Self {
        let mut table = Vec::with_capacity(SCALES * (FRACTIONS + 1));
        for s in 0..SCALES {
            let scale = 1.0 + (MAX_SCALE - 1.0) * s as f64 / (SCALES - 1) as f64;
            for f in 0..=FRACTIONS {
                let fraction = f as f64 / FRACTIONS as f64;
                let mut weights = [0.0f64; TAPS];
                for (tap, weight) in weights.iter_mut().enumerate() {
                    let x = tap as f64 - (HALF_TAPS - 1) as f64 - fraction;
                    *weight = sinc(x / scale) / scale * blackman(x);
                }
                let sum = weights.iter().sum::<f64>();
                let mut row = [0.0f32; TAPS];
                for (r, w) in row.iter_mut().zip(weights) {
                    *r = (w / sum) as f32;
                }
                table.push(row);
            }
        }
        Self { table }
    }

    fn row(&self, fraction: f64, pitch: f64) -> &[f32; TAPS] {
        let scale = pitch.clamp(1.0, MAX_SCALE);
        let s = ((scale - 1.0) / (MAX_SCALE - 1.0) * (SCALES - 1) as f64).round() as usize;
        let f = (fraction * FRACTIONS as f64).round() as usize;
        &self.table[s * (FRACTIONS + 1) + f]
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1.0e-9 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Blackman window centered at 0, spanning `-HALF_TAPS..HALF_TAPS`.
fn blackman(x: f64) -> f64 {
    let width = HALF_TAPS as f64;
    if x.abs() >= width {
        return 0.0;
    }
    let n = (x + width) / (2.0 * width);
    0.42 - 0.5 * (2.0 * PI * n).cos() + 0.08 * (4.0 * PI * n).cos()
}

impl Interpolator for SincInterpolator {
    fn padding(&self) -> usize {
        HALF_TAPS + 1
    }

    #[inline]
    fn value_at(&self, input: &[f32], index: usize, fraction: f64, pitch: f64) -> f32 {
        let row = self.row(fraction, pitch);
        let start = index + 1 - HALF_TAPS;
        input[start..start + TAPS]
            .iter()
            .zip(row)
            .map(|(x, w)| x * w)
            .sum()
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernels_are_normalized() {
        let interpolator = SincInterpolator::shared();
        for row in &interpolator.table {
            let sum = row.iter().sum::<f32>();
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn dc_passes_at_all_pitches() {
        let interpolator = SincInterpolator::shared();
        let input = vec![0.5f32; 64];
        for pitch in [0.5, 1.0, 2.5, 8.0] {
            let value = interpolator.value_at(&input, 30, 0.3, pitch);
            assert!((value - 0.5).abs() < 1e-4);
        }
    }
}
