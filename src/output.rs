//! Audio sinks and the ways the mixer feeds them: a pusher thread which writes blocks into a
//! blocking sink, or a pull based byte stream.

use byteorder::{ByteOrder, LittleEndian};
use strum::{Display, EnumIter, EnumString};

use crate::Error;

// -------------------------------------------------------------------------------------------------

pub mod pusher;
pub mod stream;

#[cfg(feature = "cpal-output")]
pub mod cpal;
#[cfg(feature = "wav-output")]
pub mod wav;

// -------------------------------------------------------------------------------------------------

/// Encoding of PCM samples in byte streams and files.
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug, Display, EnumIter, EnumString)]
pub enum SampleFormat {
    /// 32 bit little endian floats.
    #[default]
    F32,
    /// 16 bit little endian signed integers.
    I16,
}

impl SampleFormat {
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::F32 => 4,
            Self::I16 => 2,
        }
    }

    /// Encode `samples` into `output`, which must hold exactly
    /// `samples.len() * self.bytes_per_sample()` bytes. Integer samples get clipped.
    pub fn encode(self, samples: &[f32], output: &mut [u8]) {
        debug_assert_eq!(output.len(), samples.len() * self.bytes_per_sample());
        match self {
            Self::F32 => {
                for (bytes, sample) in output.chunks_exact_mut(4).zip(samples) {
                    LittleEndian::write_f32(bytes, *sample);
                }
            }
            Self::I16 => {
                for (bytes, sample) in output.chunks_exact_mut(2).zip(samples) {
                    LittleEndian::write_i16(bytes, to_i16(*sample));
                }
            }
        }
    }
}

pub(crate) fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

// -------------------------------------------------------------------------------------------------

/// Sample rate and channel layout a sink accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkFormat {
    pub sample_rate: u32,
    pub channel_count: usize,
}

/// Consumer of the rendered audio: a live device, a file or anything else which accepts blocks
/// of interleaved float samples.
///
/// Sinks apply backpressure by blocking in [`Self::write`] until they can accept more data.
pub trait AudioSink: Send + 'static {
    /// Sample rate and channel layout the sink got opened with.
    fn format(&self) -> SinkFormat;

    /// Preferred number of frames per write.
    fn buffer_size(&self) -> usize;

    /// Write one block of interleaved samples, blocking while the sink is busy.
    fn write(&mut self, samples: &[f32]) -> Result<(), Error>;

    /// Flush and release the sink. Writes after closing fail with [`Error::SinkClosed`].
    fn close(&mut self) -> Result<(), Error>;
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_little_endian() {
        let samples = [0.5, -2.0];
        let mut bytes = vec![0; 4];
        SampleFormat::I16.encode(&samples, &mut bytes);
        assert_eq!(bytes, [0x00, 0x40, 0x01, 0x80]);

        let mut bytes = vec![0; 8];
        SampleFormat::F32.encode(&samples, &mut bytes);
        assert_eq!(&bytes[..4], &0.5f32.to_le_bytes());
        assert_eq!(&bytes[4..], &(-2.0f32).to_le_bytes());
    }

    #[test]
    fn formats_parse_by_name() {
        assert_eq!("I16".parse::<SampleFormat>().ok(), Some(SampleFormat::I16));
        assert_eq!(SampleFormat::F32.to_string(), "F32");
    }
}
