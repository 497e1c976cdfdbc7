use std::io;

use crate::{output::SampleFormat, Mixer};

// -------------------------------------------------------------------------------------------------

/// Pull based consumer of a [`Mixer`]: renders blocks on demand and reads them as encoded,
/// interleaved PCM bytes.
///
/// Unless a length is given, the stream never ends.
pub struct MixerStream {
    mixer: Mixer,
    format: SampleFormat,
    block: Vec<f32>,
    bytes: Vec<u8>,
    position: usize,
    frames_left: Option<u64>,
}

impl MixerStream {
    pub fn new(mixer: &Mixer, format: SampleFormat) -> Self {
        let block = vec![0.0; mixer.block_samples()];
        let bytes = Vec::with_capacity(block.len() * format.bytes_per_sample());
        Self {
            mixer: mixer.clone(),
            format,
            block,
            bytes,
            position: 0,
            frames_left: None,
        }
    }

    /// Create a stream which ends after the given number of frames.
    pub fn with_length(mixer: &Mixer, format: SampleFormat, frames: u64) -> Self {
        Self {
            frames_left: Some(frames),
            ..Self::new(mixer, format)
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Bytes of one interleaved frame.
    pub fn frame_bytes(&self) -> usize {
        self.mixer.options().channel_count * self.format.bytes_per_sample()
    }

    fn render_next(&mut self) -> io::Result<bool> {
        let block_frames = self.mixer.options().block_size;
        let frames = match self.frames_left {
            Some(0) => return Ok(false),
            Some(left) => (left as usize).min(block_frames),
            None => block_frames,
        };
        self.mixer.render(&mut self.block).map_err(io::Error::other)?;
        let samples = frames * self.mixer.options().channel_count;
        self.bytes
            .resize(samples * self.format.bytes_per_sample(), 0);
        self.format.encode(&self.block[..samples], &mut self.bytes);
        self.position = 0;
        if let Some(left) = &mut self.frames_left {
            *left -= frames as u64;
        }
        Ok(true)
    }
}

impl io::Read for MixerStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.position >= self.bytes.len() && !self.render_next()? {
            return Ok(0);
        }
        let available = &self.bytes[self.position..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.position += count;
        Ok(count)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;
    use crate::{mixer::MixerLine, mixer::buffers::MixBuffers, MixerOptions};

    struct Dc;

    impl MixerLine for Dc {
        fn name(&self) -> &'static str {
            "Dc"
        }
        fn control_tick(&mut self, _interval: usize) {}
        fn render(&mut self, buffers: &mut MixBuffers) {
            buffers.main.left.fill(0.25);
            buffers.main.right.fill(-0.25);
        }
    }

    #[test]
    fn reads_encoded_frames() -> Result<(), Box<dyn std::error::Error>> {
        let mixer = Mixer::new(MixerOptions::default().block_size(32).chorus(false))?;
        let _line = mixer.open_line(Dc);
        let mut stream = MixerStream::with_length(&mixer, SampleFormat::I16, 100);
        assert_eq!(stream.frame_bytes(), 4);

        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes)?;
        assert_eq!(bytes.len(), 400);
        let first = i16::from_le_bytes([bytes[0], bytes[1]]);
        let second = i16::from_le_bytes([bytes[2], bytes[3]]);
        assert_eq!((first, second), (8192, -8192));
        Ok(())
    }

    #[test]
    fn endless_streams_fill_any_buffer() -> Result<(), Box<dyn std::error::Error>> {
        let mixer = Mixer::new(MixerOptions::default().block_size(32))?;
        let mut stream = MixerStream::new(&mixer, SampleFormat::F32);
        let mut buffer = vec![1; 1000];
        stream.read_exact(&mut buffer)?;
        assert!(buffer.iter().all(|byte| *byte == 0));
        Ok(())
    }
}
