//! In-place complex FFT on interleaved real/imaginary buffers.

use std::f64::consts::PI;

use crate::Error;

// -------------------------------------------------------------------------------------------------

/// Transform direction. The sign is the sign of the exponent in the transform's kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    Inverse,
}

impl FftDirection {
    pub fn sign(self) -> f64 {
        match self {
            Self::Forward => -1.0,
            Self::Inverse => 1.0,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Fixed size radix-4/radix-2 decimation in time FFT.
///
/// Twiddle factors and the bit-reversal permutation are calculated once in `new`, so an
/// instance should be reused for all transforms of the same size. Transforms are not
/// normalized: a forward transform followed by an inverse one scales the data by `size`.
pub struct Fft {
    size: usize,
    sign: f64,
    // interleaved cos/sin of 2*pi*k/size for k in 0..size/2
    twiddles: Vec<f64>,
    bit_reversed: Vec<usize>,
}

impl Fft {
    /// Create a new FFT for `size` complex values. Size must be a power of two.
    pub fn new(size: usize, direction: FftDirection) -> Result<Self, Error> {
        if size < 2 || !size.is_power_of_two() {
            return Err(Error::ParameterError(format!(
                "FFT size must be a power of two >= 2, but is {size}"
            )));
        }
        let sign = direction.sign();
        let twiddles = (0..size / 2)
            .flat_map(|k| {
                let angle = 2.0 * PI * k as f64 / size as f64;
                [angle.cos(), sign * angle.sin()]
            })
            .collect();
        let bits = size.trailing_zeros();
        let bit_reversed = (0..size)
            .map(|i| i.reverse_bits() >> (usize::BITS - bits))
            .collect();
        Ok(Self {
            size,
            sign,
            twiddles,
            bit_reversed,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn direction(&self) -> FftDirection {
        if self.sign < 0.0 {
            FftDirection::Forward
        } else {
            FftDirection::Inverse
        }
    }

    /// Transform the given interleaved complex buffer in place. The buffer must hold
    /// exactly `2 * size` values.
    pub fn transform(&self, data: &mut [f64]) -> Result<(), Error> {
        if data.len() != 2 * self.size {
            return Err(Error::ParameterError(format!(
                "FFT buffer must hold {} values, but holds {}",
                2 * self.size,
                data.len()
            )));
        }
        self.permute(data);

        // odd powers of two: one radix-2 pass first
        let mut length = if self.size.trailing_zeros() % 2 == 1 {
            for pair in data.chunks_exact_mut(4) {
                let (re0, im0, re1, im1) = (pair[0], pair[1], pair[2], pair[3]);
                pair[0] = re0 + re1;
                pair[1] = im0 + im1;
                pair[2] = re0 - re1;
                pair[3] = im0 - im1;
            }
            4
        } else {
            2
        };
        // then radix-4 passes, each combining the radix-2 stages of size `length` and `2*length`
        while length < self.size {
            self.radix4_pass(data, length);
            length *= 4;
        }
        Ok(())
    }

    #[inline]
    fn twiddle(&self, index: usize) -> (f64, f64) {
        (self.twiddles[2 * index], self.twiddles[2 * index + 1])
    }

    fn permute(&self, data: &mut [f64]) {
        for (i, &j) in self.bit_reversed.iter().enumerate() {
            if i < j {
                data.swap(2 * i, 2 * j);
                data.swap(2 * i + 1, 2 * j + 1);
            }
        }
    }

    /// Run the two radix-2 stages of sizes `length` and `2 * length` as a single radix-4
    /// butterfly pass.
    fn radix4_pass(&self, data: &mut [f64], length: usize) {
        let n = self.size;
        let half = length / 2;
        // W(2L)^(L/2) = exp(sign * i * pi / 2)
        let (j_re, j_im) = (0.0, self.sign);
        for start in (0..n).step_by(2 * length) {
            for k in 0..half {
                let (wa_re, wa_im) = self.twiddle(k * (n / length));
                let (wb_re, wb_im) = self.twiddle(k * (n / (2 * length)));
                let (wc_re, wc_im) = (wb_re * j_re - wb_im * j_im, wb_re * j_im + wb_im * j_re);

                let i0 = 2 * (start + k);
                let i1 = 2 * (start + k + half);
                let i2 = 2 * (start + k + length);
                let i3 = 2 * (start + k + length + half);

                let (x0_re, x0_im) = (data[i0], data[i0 + 1]);
                let (x1_re, x1_im) = complex_mul(data[i1], data[i1 + 1], wa_re, wa_im);
                let (x2_re, x2_im) = (data[i2], data[i2 + 1]);
                let (x3_re, x3_im) = complex_mul(data[i3], data[i3 + 1], wa_re, wa_im);

                // first stage
                let (a0_re, a0_im) = (x0_re + x1_re, x0_im + x1_im);
                let (a1_re, a1_im) = (x0_re - x1_re, x0_im - x1_im);
                let (a2_re, a2_im) = (x2_re + x3_re, x2_im + x3_im);
                let (a3_re, a3_im) = (x2_re - x3_re, x2_im - x3_im);

                // second stage
                let (b2_re, b2_im) = complex_mul(a2_re, a2_im, wb_re, wb_im);
                let (b3_re, b3_im) = complex_mul(a3_re, a3_im, wc_re, wc_im);

                data[i0] = a0_re + b2_re;
                data[i0 + 1] = a0_im + b2_im;
                data[i2] = a0_re - b2_re;
                data[i2 + 1] = a0_im - b2_im;
                data[i1] = a1_re + b3_re;
                data[i1 + 1] = a1_im + b3_im;
                data[i3] = a1_re - b3_re;
                data[i3 + 1] = a1_im - b3_im;
            }
        }
    }
}

#[inline(always)]
fn complex_mul(a_re: f64, a_im: f64, b_re: f64, b_im: f64) -> (f64, f64) {
    (a_re * b_re - a_im * b_im, a_re * b_im + a_im * b_re)
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn naive_dft(data: &[f64], sign: f64) -> Vec<f64> {
        let n = data.len() / 2;
        let mut out = vec![0.0; data.len()];
        for k in 0..n {
            for t in 0..n {
                let angle = sign * 2.0 * PI * (k * t) as f64 / n as f64;
                let (c, s) = (angle.cos(), angle.sin());
                out[2 * k] += data[2 * t] * c - data[2 * t + 1] * s;
                out[2 * k + 1] += data[2 * t] * s + data[2 * t + 1] * c;
            }
        }
        out
    }

    #[test]
    fn matches_naive_dft() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        for size in [2, 4, 8, 16, 32, 64] {
            let data = (0..2 * size)
                .map(|_| rng.random_range(-1.0..1.0))
                .collect::<Vec<f64>>();
            let expected = naive_dft(&data, -1.0);
            let mut actual = data.clone();
            Fft::new(size, FftDirection::Forward)?.transform(&mut actual)?;
            for (a, e) in actual.iter().zip(&expected) {
                assert!((a - e).abs() < 1e-9, "size {size}: {a} != {e}");
            }
        }
        Ok(())
    }

    #[test]
    fn round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = SmallRng::seed_from_u64(42);
        for bits in 1..=14 {
            let size = 1usize << bits;
            let data = (0..2 * size)
                .map(|_| rng.random_range(-1.0..1.0))
                .collect::<Vec<f64>>();
            let mut buffer = data.clone();
            Fft::new(size, FftDirection::Forward)?.transform(&mut buffer)?;
            Fft::new(size, FftDirection::Inverse)?.transform(&mut buffer)?;
            for (value, original) in buffer.iter().zip(&data) {
                assert!((value / size as f64 - original).abs() < 1e-9);
            }
        }
        Ok(())
    }

    #[test]
    fn rejects_invalid_sizes() {
        assert!(Fft::new(0, FftDirection::Forward).is_err());
        assert!(Fft::new(12, FftDirection::Forward).is_err());
        let fft = Fft::new(8, FftDirection::Inverse).unwrap();
        assert!(fft.transform(&mut [0.0; 8]).is_err());
    }
}
