use std::sync::Arc;

use strum::{Display, EnumIter, EnumString};

use super::{Oscillator, OscillatorStream};
use crate::Error;

// -------------------------------------------------------------------------------------------------

/// How a sample oscillator loops.
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Display, EnumIter, EnumString)]
pub enum LoopMode {
    /// Play the sample once.
    #[default]
    None,
    /// Loop forever, also after note off.
    Forward,
    /// Loop until note off, then play on to the end of the sample.
    Release,
}

/// Sample loop range in frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SampleLoop {
    pub start: usize,
    pub length: usize,
    pub mode: LoopMode,
}

impl SampleLoop {
    pub fn end(&self) -> usize {
        self.start + self.length
    }
}

// -------------------------------------------------------------------------------------------------

/// Oscillator playing an in-memory, planar float sample.
#[derive(Clone, Debug)]
pub struct SampleOscillator {
    data: Arc<Vec<Vec<f32>>>,
    frame_count: usize,
    sample_rate: u32,
    root_key: f64,
    pitch_correction: f64,
    attenuation: f64,
    sample_loop: Option<SampleLoop>,
}

impl SampleOscillator {
    /// Create a new oscillator from planar sample data (one buffer per channel), its sample rate
    /// and the MIDI key at which the sample plays at its native rate.
    pub fn new(data: Arc<Vec<Vec<f32>>>, sample_rate: u32, root_key: f64) -> Self {
        let frame_count = data.iter().map(Vec::len).min().unwrap_or(0);
        Self {
            data,
            frame_count,
            sample_rate,
            root_key,
            pitch_correction: 0.0,
            attenuation: 0.0,
            sample_loop: None,
        }
    }

    /// Set a loop range. Empty loops are ignored, loops exceeding the sample get clamped.
    pub fn with_loop(mut self, sample_loop: SampleLoop) -> Self {
        if sample_loop.mode == LoopMode::None {
            self.sample_loop = None;
            return self;
        }
        let start = sample_loop.start.min(self.frame_count);
        let end = sample_loop.end().min(self.frame_count);
        if end <= start {
            log::warn!(
                "Ignoring empty sample loop {}..{} in a sample with {} frames",
                sample_loop.start,
                sample_loop.end(),
                self.frame_count
            );
            self.sample_loop = None;
        } else {
            self.sample_loop = Some(SampleLoop {
                start,
                length: end - start,
                mode: sample_loop.mode,
            });
        }
        self
    }

    /// Pitch correction in cents, added to the sample's pitch.
    pub fn with_pitch_correction(mut self, cents: f64) -> Self {
        self.pitch_correction = cents;
        self
    }

    /// Attenuation in centibels.
    pub fn with_attenuation(mut self, centibels: f64) -> Self {
        self.attenuation = centibels;
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frame_count
    }
}

impl Oscillator for SampleOscillator {
    fn channel_count(&self) -> usize {
        self.data.len()
    }

    fn attenuation(&self) -> f64 {
        self.attenuation
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn root_pitch(&self) -> f64 {
        self.root_key * 100.0 - self.pitch_correction
    }

    fn sample_loop(&self) -> Option<SampleLoop> {
        self.sample_loop
    }

    fn open(&self, _output_sample_rate: u32) -> Result<Box<dyn OscillatorStream>, Error> {
        if self.data.is_empty() || self.frame_count == 0 {
            return Err(Error::ParameterError(
                "sample oscillator has no sample data".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(Error::ParameterError(
                "sample oscillator has a zero sample rate".to_string(),
            ));
        }
        Ok(Box::new(SampleStream::new(
            Arc::clone(&self.data),
            self.frame_count,
            self.sample_loop,
        )))
    }
}

// -------------------------------------------------------------------------------------------------

/// Stream of a [`SampleOscillator`], reading sample frames at the sample's native rate.
pub struct SampleStream {
    data: Arc<Vec<Vec<f32>>>,
    frame_count: usize,
    sample_loop: Option<SampleLoop>,
    position: usize,
    looping: bool,
    mark: Option<(usize, bool)>,
}

impl SampleStream {
    fn new(data: Arc<Vec<Vec<f32>>>, frame_count: usize, sample_loop: Option<SampleLoop>) -> Self {
        let looping = sample_loop.is_some();
        Self {
            data,
            frame_count,
            sample_loop,
            position: 0,
            looping,
            mark: None,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }
}

impl OscillatorStream for SampleStream {
    fn channel_count(&self) -> usize {
        self.data.len()
    }

    fn read(&mut self, output: &mut [Vec<f32>], offset: usize, frames: usize) -> usize {
        let mut written = 0;
        while written < frames {
            let (end, restart) = match self.sample_loop {
                Some(sample_loop) if self.looping && self.position < sample_loop.end() => {
                    (sample_loop.end(), Some(sample_loop.start))
                }
                _ => (self.frame_count, None),
            };
            if self.position >= end {
                match restart {
                    Some(start) => {
                        self.position = start;
                        continue;
                    }
                    None => break,
                }
            }
            let count = (end - self.position).min(frames - written);
            let range = self.position..self.position + count;
            for (out, channel) in output.iter_mut().zip(self.data.iter()) {
                out[offset + written..offset + written + count].copy_from_slice(&channel[range.clone()]);
            }
            written += count;
            self.position += count;
            if let (Some(start), true) = (restart, self.position >= end) {
                self.position = start;
            }
        }
        written
    }

    fn note_off(&mut self) {
        if self
            .sample_loop
            .is_some_and(|sample_loop| sample_loop.mode == LoopMode::Release)
        {
            self.looping = false;
        }
    }

    fn mark(&mut self) {
        self.mark = Some((self.position, self.looping));
    }

    fn reset(&mut self) {
        let (position, looping) = self
            .mark
            .unwrap_or((0, self.sample_loop.is_some()));
        self.position = position;
        self.looping = looping;
    }
}

// -------------------------------------------------------------------------------------------------
