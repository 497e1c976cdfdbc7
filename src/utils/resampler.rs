//! Interpolating resamplers which read oscillator streams at a live, variable pitch.

use strum::{Display, EnumIter, EnumString};

use crate::performer::OscillatorStream;

mod cubic;
mod lanczos;
mod linear;
mod point;
mod sinc;

pub use cubic::CubicInterpolator;
pub use lanczos::LanczosInterpolator;
pub use linear::{LinearFixedInterpolator, LinearInterpolator};
pub use point::PointInterpolator;
pub use sinc::SincInterpolator;

// -------------------------------------------------------------------------------------------------

/// Frames read from the source stream in one go.
const SECTOR_SIZE: usize = 512;

/// Max playback speed factor. Higher pitches get clamped.
pub const MAX_PITCH: f64 = 256.0;

// -------------------------------------------------------------------------------------------------

/// Available interpolation kernels.
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Display, EnumIter, EnumString)]
pub enum ResamplerKind {
    /// Nearest sample, no interpolation.
    Point,
    /// Linear interpolation with a floating point read position.
    #[default]
    Linear,
    /// Linear interpolation with a fixed point read position and quantized fraction.
    LinearFixed,
    /// 4 point Hermite interpolation.
    Cubic,
    /// Lanczos windowed sinc with 8 taps.
    Lanczos,
    /// Blackman windowed sinc with 32 taps and anti-aliasing when pitching up.
    Sinc,
}

impl ResamplerKind {
    /// The shared, stateless interpolator for this kind.
    pub fn interpolator(self) -> &'static dyn Interpolator {
        match self {
            Self::Point => &PointInterpolator,
            Self::Linear => &LinearInterpolator,
            Self::LinearFixed => &LinearFixedInterpolator,
            Self::Cubic => &CubicInterpolator,
            Self::Lanczos => LanczosInterpolator::shared(),
            Self::Sinc => SincInterpolator::shared(),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Interpolation kernel interface.
///
/// Kernels read `padding()` frames on both sides of the interpolated position, so callers must
/// keep that many frames of history before and lookahead after the read position.
pub trait Interpolator: Send + Sync {
    /// Frames the kernel may read before and after the interpolation position.
    fn padding(&self) -> usize;

    /// Interpolate a single value at `input[index] + fraction`.
    fn value_at(&self, input: &[f32], index: usize, fraction: f64, pitch: f64) -> f32;

    /// Interpolate values into `output`, starting at `*position` and advancing by `pitch` per
    /// output sample. Stops when `output` is full or when the kernel would read past the end
    /// of `input`. Returns the number of written samples and updates `position`.
    fn interpolate(
        &self,
        input: &[f32],
        position: &mut f64,
        pitch: f64,
        output: &mut [f32],
    ) -> usize {
        let end = input.len().saturating_sub(self.padding()) as f64;
        let mut written = 0;
        for out in output.iter_mut() {
            if *position >= end {
                break;
            }
            let index = *position as usize;
            let fraction = *position - index as f64;
            *out = self.value_at(input, index, fraction, pitch);
            *position += pitch;
            written += 1;
        }
        written
    }
}

// -------------------------------------------------------------------------------------------------

/// Snapshot of a [`ResampledStream`]'s buffers and read position.
#[derive(Clone)]
struct StreamMark {
    windows: Vec<Vec<f32>>,
    position: f64,
    end_position: Option<f64>,
    source_finished: bool,
}

/// Reads an oscillator stream through an interpolation kernel at a variable pitch.
///
/// Each channel keeps a padded window of source frames: `padding` frames of history before the
/// read position, and at least `padding` frames of lookahead, so the kernel never reads out of
/// bounds at buffer seams. Reading in chunks of any size produces the same samples as reading
/// everything at once.
pub struct ResampledStream {
    source: Box<dyn OscillatorStream>,
    interpolator: &'static dyn Interpolator,
    padding: usize,
    windows: Vec<Vec<f32>>,
    read_buffer: Vec<Vec<f32>>,
    position: f64,
    end_position: Option<f64>,
    source_finished: bool,
    mark: Option<StreamMark>,
}

impl ResampledStream {
    pub fn new(source: Box<dyn OscillatorStream>, kind: ResamplerKind) -> Self {
        let interpolator = kind.interpolator();
        let padding = interpolator.padding();
        let channel_count = source.channel_count().max(1);
        let windows = vec![Vec::with_capacity(2 * SECTOR_SIZE + 2 * padding); channel_count];
        let read_buffer = vec![vec![0.0; SECTOR_SIZE]; channel_count];
        let mut stream = Self {
            source,
            interpolator,
            padding,
            windows,
            read_buffer,
            position: 0.0,
            end_position: None,
            source_finished: false,
            mark: None,
        };
        stream.rewind_windows();
        stream
    }

    /// Number of channels the stream produces.
    pub fn channel_count(&self) -> usize {
        self.windows.len()
    }

    /// True when all source frames have been read.
    pub fn is_finished(&self) -> bool {
        self.end_position.is_some_and(|end| self.position >= end)
    }

    /// Forward a note off to the source stream (ends release loops).
    pub fn note_off(&mut self) {
        self.source.note_off();
    }

    /// Remember the current read state. See [`Self::reset`].
    pub fn mark(&mut self) {
        self.source.mark();
        self.mark = Some(StreamMark {
            windows: self.windows.clone(),
            position: self.position,
            end_position: self.end_position,
            source_finished: self.source_finished,
        });
    }

    /// Rewind to the last mark. Without a mark this rewinds to the stream's start.
    pub fn reset(&mut self) {
        self.source.reset();
        if let Some(mark) = &self.mark {
            for (window, marked) in self.windows.iter_mut().zip(&mark.windows) {
                window.clear();
                window.extend_from_slice(marked);
            }
            self.position = mark.position;
            self.end_position = mark.end_position;
            self.source_finished = mark.source_finished;
        } else {
            self.rewind_windows();
        }
    }

    /// Read `frames` resampled frames at the given pitch (source frames per output frame) into
    /// `output[channel][offset..offset + frames]`. Frames past the end of the source are
    /// filled with silence.
    pub fn read(&mut self, output: &mut [Vec<f32>], offset: usize, frames: usize, pitch: f64) {
        debug_assert!(output.len() >= self.windows.len());
        let pitch = if pitch.is_finite() {
            pitch.clamp(1.0e-6, MAX_PITCH)
        } else {
            1.0
        };
        let mut written = 0;
        while written < frames {
            let mut wanted = frames - written;
            if let Some(end) = self.end_position {
                if self.position >= end {
                    break;
                }
                let until_end = ((end - self.position) / pitch).ceil() as usize;
                wanted = wanted.min(until_end.max(1));
            }
            let range = offset + written..offset + written + wanted;
            let mut produced = 0;
            let mut new_position = self.position;
            for (window, out) in self.windows.iter().zip(output.iter_mut()) {
                let mut position = self.position;
                produced = self.interpolator.interpolate(
                    window,
                    &mut position,
                    pitch,
                    &mut out[range.clone()],
                );
                new_position = position;
            }
            self.position = new_position;
            written += produced;
            if produced < wanted {
                self.fill();
            }
        }
        if written < frames {
            for out in output.iter_mut().take(self.windows.len()) {
                out[offset + written..offset + frames].fill(0.0);
            }
        }
    }

    fn rewind_windows(&mut self) {
        for window in &mut self.windows {
            window.clear();
            window.resize(self.padding, 0.0);
        }
        self.position = self.padding as f64;
        self.end_position = None;
        self.source_finished = false;
    }

    /// Drop consumed frames and append the next sector from the source.
    ///
    /// At high pitches the read position may lie beyond the window's end: the whole window gets
    /// dropped then, and the following calls skip the rest of the consumed source frames.
    fn fill(&mut self) {
        let consumed = (self.position as usize)
            .saturating_sub(self.padding)
            .min(self.windows[0].len());
        if consumed > 0 {
            for window in &mut self.windows {
                window.drain(..consumed);
            }
            self.position -= consumed as f64;
            if let Some(end) = &mut self.end_position {
                *end -= consumed as f64;
            }
        }
        let read = if self.source_finished {
            0
        } else {
            self.source.read(&mut self.read_buffer, 0, SECTOR_SIZE)
        };
        if read < SECTOR_SIZE && !self.source_finished {
            self.source_finished = true;
            self.end_position = Some((self.windows[0].len() + read) as f64);
        }
        for (window, buffer) in self.windows.iter_mut().zip(&self.read_buffer) {
            window.extend_from_slice(&buffer[..read]);
            window.resize(window.len() + SECTOR_SIZE - read, 0.0);
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use strum::IntoEnumIterator;

    use super::*;
    use crate::performer::{LoopMode, Oscillator, SampleLoop, SampleOscillator};

    fn test_oscillator(loop_mode: LoopMode) -> SampleOscillator {
        let frames = 3000;
        let left = (0..frames)
            .map(|i| (i as f32 * 0.05).sin())
            .collect::<Vec<_>>();
        let right = (0..frames)
            .map(|i| (i as f32 * 0.031).cos() * 0.5)
            .collect::<Vec<_>>();
        let sample_loop = SampleLoop {
            start: 1000,
            length: 1500,
            mode: loop_mode,
        };
        SampleOscillator::new(Arc::new(vec![left, right]), 44100, 60.0)
            .with_loop(sample_loop)
    }

    fn read_chunked(
        oscillator: &SampleOscillator,
        kind: ResamplerKind,
        chunks: &[usize],
        pitch: f64,
    ) -> Vec<Vec<f32>> {
        let stream = oscillator.open(44100).unwrap();
        let mut resampled = ResampledStream::new(stream, kind);
        let total = chunks.iter().sum::<usize>();
        let mut output = vec![vec![0.0; total]; 2];
        let mut offset = 0;
        for chunk in chunks {
            resampled.read(&mut output, offset, *chunk, pitch);
            offset += chunk;
        }
        output
    }

    #[test]
    fn chunked_reads_match_single_reads() {
        let oscillator = test_oscillator(LoopMode::None);
        const FRAMES: usize = 2500;
        for kind in ResamplerKind::iter() {
            for pitch in [0.37, 1.0, 1.61, 3.3, 4.9, 20.0, 100.0, MAX_PITCH] {
                let expected = read_chunked(&oscillator, kind, &[FRAMES], pitch);
                for split in [1, 17, 512, 1000, 2499] {
                    let actual = read_chunked(&oscillator, kind, &[split, FRAMES - split], pitch);
                    for (a, e) in actual.iter().flatten().zip(expected.iter().flatten()) {
                        assert!(
                            (a - e).abs() < 1e-5,
                            "{kind} at pitch {pitch} and split {split}: {a} != {e}"
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn high_pitches_skip_source_frames() {
        const FRAMES: usize = 100_000;
        let samples = (0..FRAMES)
            .map(|i| (i as f32 * 0.001).sin())
            .collect::<Vec<_>>();
        let oscillator = SampleOscillator::new(Arc::new(vec![samples.clone()]), 44100, 60.0);
        for pitch in [4.0, 20.0, 100.0, MAX_PITCH] {
            let stream = oscillator.open(44100).unwrap();
            let mut resampled = ResampledStream::new(stream, ResamplerKind::Linear);
            let mut output = vec![vec![0.0; 256]];
            for block in 0..20 {
                resampled.read(&mut output, 0, 256, pitch);
                for (frame, value) in output[0].iter().enumerate() {
                    let source_frame = ((block * 256 + frame) as f64 * pitch) as usize;
                    let expected = samples.get(source_frame).copied().unwrap_or(0.0);
                    assert!(
                        (value - expected).abs() < 1e-5,
                        "pitch {pitch}, block {block}, frame {frame}: {value} != {expected}"
                    );
                }
            }
        }
    }

    #[test]
    fn unity_pitch_reproduces_source() {
        let oscillator = test_oscillator(LoopMode::None);
        for kind in ResamplerKind::iter() {
            let output = read_chunked(&oscillator, kind, &[700, 700], 1.0);
            for (i, value) in output[0].iter().enumerate().take(1400) {
                let expected = (i as f32 * 0.05).sin();
                assert!((value - expected).abs() < 1e-4, "{kind} differs at {i}");
            }
        }
    }

    #[test]
    fn stream_finishes_and_fills_silence() {
        let oscillator = test_oscillator(LoopMode::None);
        let stream = oscillator.open(44100).unwrap();
        let mut resampled = ResampledStream::new(stream, ResamplerKind::Cubic);
        let mut output = vec![vec![1.0; 2000]; 2];
        resampled.read(&mut output, 0, 2000, 2.0);
        assert!(resampled.is_finished());
        assert!(output[0][1600..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn looping_stream_never_finishes() {
        let oscillator = test_oscillator(LoopMode::Forward);
        let stream = oscillator.open(44100).unwrap();
        let mut resampled = ResampledStream::new(stream, ResamplerKind::Linear);
        let mut output = vec![vec![0.0; 4096]; 2];
        for _ in 0..10 {
            resampled.read(&mut output, 0, 4096, 1.5);
        }
        assert!(!resampled.is_finished());
    }

    #[test]
    fn reset_rewinds_to_mark() {
        let oscillator = test_oscillator(LoopMode::Forward);
        for kind in ResamplerKind::iter() {
            let stream = oscillator.open(44100).unwrap();
            let mut resampled = ResampledStream::new(stream, kind);
            let mut output = vec![vec![0.0; 777]; 2];
            resampled.read(&mut output, 0, 777, 1.3);
            resampled.mark();
            let mut first = vec![vec![0.0; 1500]; 2];
            resampled.read(&mut first, 0, 1500, 1.3);
            resampled.reset();
            let mut second = vec![vec![0.0; 1500]; 2];
            resampled.read(&mut second, 0, 1500, 1.3);
            assert_eq!(first, second, "{kind} failed to rewind");
        }
    }
}
