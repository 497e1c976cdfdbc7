use std::{f64::consts::PI, sync::LazyLock};

use super::Interpolator;

// -------------------------------------------------------------------------------------------------

const LOBES: usize = 4;
const TAPS: usize = 2 * LOBES;
const FRACTIONS: usize = 256;

// -------------------------------------------------------------------------------------------------

/// Lanczos windowed sinc interpolation with a precalculated kernel table.
pub struct LanczosInterpolator {
    // FRACTIONS + 1 rows of TAPS weights for input frames index - 3 ..= index + 4
    table: Vec<[f32; TAPS]>,
}

impl LanczosInterpolator {
    /// Shared instance. The kernel table is built on first use.
    pub fn shared() -> &'static Self {
        static INSTANCE: LazyLock<LanczosInterpolator> = LazyLock::new(LanczosInterpolator::new);
        &INSTANCE
    }

    fn new() -> Self {
        let table = (0..=FRACTIONS)
            .map(|f| {
                let fraction = f as f64 / FRACTIONS as f64;
                let mut weights = [0.0; TAPS];
                for (tap, weight) in weights.iter_mut().enumerate() {
                    let x = tap as f64 - (LOBES - 1) as f64 - fraction;
                    *weight = lanczos(x) as f32;
                }
                weights
            })
            .collect();
        Self { table }
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1.0e-9 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

fn lanczos(x: f64) -> f64 {
    if x.abs() >= LOBES as f64 {
        0.0
    } else {
        sinc(x) * sinc(x / LOBES as f64)
    }
}

impl Interpolator for LanczosInterpolator {
    fn padding(&self) -> usize {
        LOBES + 1
    }

    #[inline]
    fn value_at(&self, input: &[f32], index: usize, fraction: f64, _pitch: f64) -> f32 {
        let row = &self.table[(fraction * FRACTIONS as f64).round() as usize];
        let start = index + 1 - LOBES;
        input[start..start + TAPS]
            .iter()
            .zip(row)
            .map(|(x, w)| x * w)
            .sum()
    }
}
