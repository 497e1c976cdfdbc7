//! Raw PCM playback line: interleaved float audio written by the application.

use std::{
    f32::consts::FRAC_PI_2,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use rb::{Consumer, Producer, RbConsumer, RbProducer, SpscRb, RB};

use crate::{
    mixer::{buffers::MixBuffers, MixerLine},
    options::PcmLineOptions,
    performer::OscillatorStream,
    utils::{
        buffer::{add_buffers_scaled, interleaved_to_planar},
        resampler::ResampledStream,
    },
    Error,
};

// -------------------------------------------------------------------------------------------------

/// Time a blocking [`PcmWriter::write`] sleeps while the line's buffer is full.
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(2);

/// Max frames a ring buffer stream reads at once.
const READ_CHUNK_FRAMES: usize = 1024;

// -------------------------------------------------------------------------------------------------

/// Reads interleaved frames from the line's ring buffer as an endless oscillator stream.
/// Underruns read silence.
struct RingBufferStream {
    consumer: Consumer<f32>,
    channel_count: usize,
    interleaved: Vec<f32>,
}

impl RingBufferStream {
    fn new(consumer: Consumer<f32>, channel_count: usize) -> Self {
        Self {
            consumer,
            channel_count,
            interleaved: vec![0.0; READ_CHUNK_FRAMES * channel_count],
        }
    }
}

impl OscillatorStream for RingBufferStream {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn read(&mut self, output: &mut [Vec<f32>], offset: usize, frames: usize) -> usize {
        let mut position = 0;
        while position < frames {
            let chunk_frames = (frames - position).min(READ_CHUNK_FRAMES);
            let chunk = &mut self.interleaved[..chunk_frames * self.channel_count];
            let read_frames = self.consumer.read(chunk).unwrap_or(0) / self.channel_count;
            interleaved_to_planar(chunk, output, offset + position, read_frames);
            position += read_frames;
            if read_frames < chunk_frames {
                break;
            }
        }
        if position < frames {
            for channel in output.iter_mut() {
                channel[offset + position..offset + frames].fill(0.0);
            }
        }
        frames
    }

    fn note_off(&mut self) {}
    fn mark(&mut self) {}
    fn reset(&mut self) {}
}

// -------------------------------------------------------------------------------------------------

enum PcmReader {
    Direct(RingBufferStream),
    Resampled { stream: ResampledStream, pitch: f64 },
}

impl PcmReader {
    fn read(&mut self, output: &mut [Vec<f32>], frames: usize) {
        match self {
            Self::Direct(stream) => {
                stream.read(output, 0, frames);
            }
            Self::Resampled { stream, pitch } => stream.read(output, 0, frames, *pitch),
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// A [`MixerLine`] which plays back interleaved float PCM data, written by a [`PcmWriter`].
///
/// Data with a sample rate other than the mixer's gets resampled. When the writer can't keep
/// up, the line plays silence.
pub struct PcmLine {
    channel_count: usize,
    reader: PcmReader,
    buffer: Vec<Vec<f32>>,
    volume: f32,
    pan: f32,
    reverb_send: f32,
    chorus_send: f32,
    closed: Arc<AtomicBool>,
}

impl PcmLine {
    /// Create a new line rendering at the given mixer rate and block size, and its writer.
    pub fn new(
        mixer_sample_rate: u32,
        block_size: usize,
        options: PcmLineOptions,
    ) -> Result<(Self, PcmWriter), Error> {
        options.validate()?;
        let channel_count = options.channel_count;
        let ring_buffer = SpscRb::new(options.buffer_frames * channel_count);
        let stream = RingBufferStream::new(ring_buffer.consumer(), channel_count);
        let reader = if options.sample_rate == mixer_sample_rate {
            PcmReader::Direct(stream)
        } else {
            log::debug!(
                "Resampling pcm line from {} to {} Hz",
                options.sample_rate,
                mixer_sample_rate
            );
            PcmReader::Resampled {
                stream: ResampledStream::new(Box::new(stream), options.resampler),
                pitch: options.sample_rate as f64 / mixer_sample_rate as f64,
            }
        };
        let closed = Arc::new(AtomicBool::new(false));
        let writer = PcmWriter {
            producer: ring_buffer.producer(),
            channel_count,
            closed: Arc::clone(&closed),
        };
        let line = Self {
            channel_count,
            reader,
            buffer: vec![vec![0.0; block_size]; channel_count],
            volume: options.volume,
            pan: options.pan,
            reverb_send: 0.0,
            chorus_send: 0.0,
            closed,
        };
        Ok((line, writer))
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }
    /// Set linear volume of the line.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.max(0.0);
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }
    /// Set panning in range -1..=1. Stereo data gets balanced instead.
    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan.clamp(-1.0, 1.0);
    }

    pub fn reverb_send(&self) -> f32 {
        self.reverb_send
    }
    pub fn set_reverb_send(&mut self, send: f32) {
        self.reverb_send = send.clamp(0.0, 1.0);
    }

    pub fn chorus_send(&self) -> f32 {
        self.chorus_send
    }
    pub fn set_chorus_send(&mut self, send: f32) {
        self.chorus_send = send.clamp(0.0, 1.0);
    }

    fn gains(&self) -> (f32, f32) {
        let position = (self.pan + 1.0) * 0.5;
        if self.channel_count == 1 {
            let (left, right) = ((position * FRAC_PI_2).cos(), (position * FRAC_PI_2).sin());
            // unity gain in both channels when centered
            let scale = std::f32::consts::SQRT_2 * self.volume;
            (left * scale, right * scale)
        } else {
            (
                (2.0 * (1.0 - position)).min(1.0) * self.volume,
                (2.0 * position).min(1.0) * self.volume,
            )
        }
    }
}

impl Drop for PcmLine {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

impl MixerLine for PcmLine {
    fn name(&self) -> &'static str {
        "PcmLine"
    }

    fn control_tick(&mut self, _interval: usize) {}

    fn render(&mut self, buffers: &mut MixBuffers) {
        let frames = buffers.frames();
        self.reader.read(&mut self.buffer, frames);
        let (left_gain, right_gain) = self.gains();
        let bus = &mut buffers.main;
        let (left, right) = if self.channel_count == 1 {
            (&self.buffer[0][..frames], &self.buffer[0][..frames])
        } else {
            (&self.buffer[0][..frames], &self.buffer[1][..frames])
        };
        add_buffers_scaled(&mut bus.left, left, left_gain);
        add_buffers_scaled(&mut bus.right, right, right_gain);
        if self.reverb_send > 0.0 || self.chorus_send > 0.0 {
            let send_gain = 0.5 * self.volume;
            add_buffers_scaled(&mut bus.effect1, left, send_gain * self.reverb_send);
            add_buffers_scaled(&mut bus.effect1, right, send_gain * self.reverb_send);
            add_buffers_scaled(&mut bus.effect2, left, send_gain * self.chorus_send);
            add_buffers_scaled(&mut bus.effect2, right, send_gain * self.chorus_send);
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Writes interleaved float PCM data into a [`PcmLine`].
pub struct PcmWriter {
    producer: Producer<f32>,
    channel_count: usize,
    closed: Arc<AtomicBool>,
}

impl PcmWriter {
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// True when the line got removed from its mixer.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    /// Write as many interleaved samples as fit into the line's buffer without blocking.
    /// Returns the number of written samples.
    pub fn try_write(&self, samples: &[f32]) -> Result<usize, Error> {
        if self.is_closed() {
            return Err(Error::SinkClosed);
        }
        let writable = samples.len() - samples.len() % self.channel_count;
        Ok(self.producer.write(&samples[..writable]).unwrap_or(0))
    }

    /// Write interleaved samples, blocking while the line's buffer is full. Fails when the line
    /// got closed, or when the samples don't contain whole frames.
    pub fn write(&self, samples: &[f32]) -> Result<(), Error> {
        if samples.len() % self.channel_count != 0 {
            return Err(Error::ParameterError(format!(
                "pcm line writes must contain whole frames of {} channels, but got {} samples",
                self.channel_count,
                samples.len()
            )));
        }
        let mut remaining = samples;
        while !remaining.is_empty() {
            if self.is_closed() {
                return Err(Error::SinkClosed);
            }
            match self.producer.write(remaining) {
                Ok(written) => remaining = &remaining[written..],
                Err(_) => thread::sleep(WRITE_RETRY_DELAY),
            }
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{options::MixerOptions, Mixer};

    const BLOCK: usize = 64;

    fn mixer() -> Mixer {
        Mixer::new(
            MixerOptions::default()
                .block_size(BLOCK)
                .reverb_light(true)
                .chorus(false),
        )
        .unwrap()
    }

    #[test]
    fn plays_written_frames_then_silence() -> Result<(), Box<dyn std::error::Error>> {
        let mixer = mixer();
        let (_line, writer) = mixer.open_pcm_line(PcmLineOptions::default())?;
        writer.write(&[0.5; BLOCK * 2])?;
        let mut output = vec![0.0; mixer.block_samples()];
        mixer.render(&mut output)?;
        assert!(output.iter().all(|s| (*s - 0.5).abs() < 1e-6));
        mixer.render(&mut output)?;
        assert!(output.iter().all(|s| *s == 0.0));
        Ok(())
    }

    #[test]
    fn volume_and_pan() -> Result<(), Box<dyn std::error::Error>> {
        let mixer = mixer();
        let (line, writer) =
            mixer.open_pcm_line(PcmLineOptions::default().channel_count(1))?;
        line.with(|line| {
            line.set_volume(0.5);
            line.set_pan(1.0);
        })?;
        writer.write(&[1.0; BLOCK])?;
        let mut output = vec![0.0; mixer.block_samples()];
        mixer.render(&mut output)?;
        for frame in output.chunks_exact(2) {
            assert!(frame[0].abs() < 1e-6);
            assert!((frame[1] - 0.5 * std::f32::consts::SQRT_2).abs() < 1e-5);
        }
        Ok(())
    }

    #[test]
    fn resamples_other_rates() -> Result<(), Box<dyn std::error::Error>> {
        let mixer = mixer();
        let (_line, writer) =
            mixer.open_pcm_line(PcmLineOptions::default().sample_rate(22050).channel_count(1))?;
        let sine = (0..4096)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect::<Vec<_>>();
        writer.write(&sine)?;
        let mut output = vec![0.0; mixer.block_samples()];
        let mut peak = 0.0f32;
        for _ in 0..16 {
            mixer.render(&mut output)?;
            assert!(output.iter().all(|s| s.is_finite()));
            peak = output.iter().fold(peak, |peak, s| peak.max(s.abs()));
        }
        assert!(peak > 0.3 && peak < 0.6);
        Ok(())
    }

    #[test]
    fn writers_fail_after_close() -> Result<(), Box<dyn std::error::Error>> {
        let mixer = mixer();
        let (line, writer) = mixer.open_pcm_line(PcmLineOptions::default())?;
        assert!(writer.write(&[0.0; 3]).is_err());
        line.close();
        let mut output = vec![0.0; mixer.block_samples()];
        mixer.render(&mut output)?;
        assert!(writer.is_closed());
        assert!(matches!(writer.write(&[0.0; 2]), Err(Error::SinkClosed)));
        Ok(())
    }
}
